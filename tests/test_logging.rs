//! Tests for logging configuration
//!
//! The parsing helpers are pure; initialization is only checked for being
//! safe to repeat, since the global subscriber can be installed once per
//! process.

use connect_agent::observability::logging::{
    build_filter, init_logging, parse_level, parse_spans_flag, LogFormat,
};
use connect_agent::{exchange_span, lifecycle_span};
use tracing::Level;

#[test]
fn test_log_format_parse_is_case_insensitive() {
    for (input, expected) in [
        ("json", LogFormat::Json),
        ("Json", LogFormat::Json),
        ("pretty", LogFormat::Pretty),
        ("PRETTY", LogFormat::Pretty),
        ("compact", LogFormat::Compact),
        ("Compact", LogFormat::Compact),
    ] {
        assert_eq!(LogFormat::parse(input), expected, "input: {input}");
    }
}

#[test]
fn test_log_format_parse_invalid_defaults_to_json() {
    // Unknown formats fall back to JSON for log aggregation
    for input in ["invalid", "", "xml", "yaml", "123", "  pretty  "] {
        assert_eq!(LogFormat::parse(input), LogFormat::Json, "input: {input:?}");
    }
}

#[test]
fn test_level_and_spans_parsing() {
    assert_eq!(parse_level("warn"), Level::WARN);
    assert_eq!(parse_level("TRACE"), Level::TRACE);
    assert_eq!(parse_level("verbose"), Level::INFO);

    assert!(parse_spans_flag("True"));
    assert!(!parse_spans_flag("on"));
}

#[test]
fn test_filter_quiets_dependencies() {
    let filter = build_filter(Level::DEBUG).to_string();

    assert!(filter.contains("debug"));
    assert!(filter.contains("rustls=warn"));
    assert!(filter.contains("tokio=warn"));
}

#[test]
fn test_init_logging_can_be_repeated() {
    init_logging(Level::INFO, LogFormat::Compact, false);
    // A second call finds a subscriber already installed and backs off
    init_logging(Level::DEBUG, LogFormat::Json, true);

    let span = exchange_span!(url = "/p/telemetry", port = 443);
    let _guard = span.enter();
    tracing::info!("logging inside an exchange");

    let lifecycle = lifecycle_span!(event = "startup");
    lifecycle.in_scope(|| tracing::debug!("inside lifecycle span"));
}

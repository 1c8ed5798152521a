//! Test helpers and utilities for integration tests

use connect_agent::agent::Connect;
use connect_agent::config::{Configuration, TimingSection};
use connect_agent::testing::{MockDevice, StaticConfigSource};
use std::sync::Arc;
use std::time::Duration;

pub const TEST_TOKEN: &str = "test-token";

/// Plain-TCP configuration pointing at a local test server
#[allow(dead_code)]
pub fn local_config(port: u16) -> Configuration {
    Configuration {
        host: "127.0.0.1".to_string(),
        token: TEST_TOKEN.to_string(),
        port,
        tls: false,
        enabled: true,
    }
}

/// Short timings so failures do not hold tests up
#[allow(dead_code)]
pub fn fast_timing() -> TimingSection {
    TimingSection {
        telemetry_interval_ms: 1000,
        retry_base_ms: 100,
        retry_max_ms: 400,
        io_timeout_ms: 2000,
    }
}

/// A loop over `config` with a mock device; the source handle lets the test
/// change the configuration between iterations
#[allow(dead_code)]
pub fn test_connect(
    config: Configuration,
    device: Arc<MockDevice>,
) -> (Connect<StaticConfigSource>, StaticConfigSource) {
    let source = StaticConfigSource::new(config);
    let connect = Connect::new(source.clone(), device, &fast_timing())
        .with_idle_wait(Duration::from_millis(5));
    (connect, source)
}

/// Request bytes as text for substring checks
#[allow(dead_code)]
pub fn text(request: &[u8]) -> String {
    String::from_utf8_lossy(request).into_owned()
}

//! Published online status
//!
//! The last status is process-wide, so this binary holds a single test and
//! nothing else publishes while it runs.

mod test_helpers;

use connect_agent::agent::{last_status, OnlineStatus};
use connect_agent::testing::{CannedServer, MockDevice};
use std::sync::Arc;
use test_helpers::{local_config, test_connect};

const NO_CONTENT: &[u8] = b"HTTP/1.1 204 No Content\r\n\r\n";

#[tokio::test]
async fn test_step_publishes_status_and_sleep_keeps_it() {
    assert_eq!(last_status(), OnlineStatus::Unknown);

    let server = CannedServer::start(&[NO_CONTENT, NO_CONTENT]).await.unwrap();
    let (mut connect, source) =
        test_connect(local_config(server.port()), Arc::new(MockDevice::new()));

    // Info event, then the first telemetry
    assert_eq!(connect.step().await, Some(OnlineStatus::Ok));
    assert_eq!(last_status(), OnlineStatus::Ok);
    assert_eq!(connect.step().await, Some(OnlineStatus::Ok));

    // Telemetry is not due yet; the planner only sleeps
    assert_eq!(connect.step().await, None);
    assert_eq!(last_status(), OnlineStatus::Ok);

    source.update(|c| c.enabled = false);
    assert_eq!(connect.step().await, Some(OnlineStatus::Off));
    assert_eq!(last_status(), OnlineStatus::Off);
    assert_eq!(server.connections(), 1);
}

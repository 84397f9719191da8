//! Shared helpers for integration tests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use switchboard_broker::{Broker, BrokerBuilder};
use switchboard_test::{RecordingExtension, fixture_inspector};

/// Poll `condition` until it holds or `timeout` elapses.
#[allow(dead_code)]
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// A builder preloaded with the fixture inspector.
#[allow(dead_code)]
pub fn builder() -> BrokerBuilder {
    Broker::builder().inspector(fixture_inspector())
}

/// A fixture broker with a recording extension installed.
#[allow(dead_code)]
pub fn recorded_broker() -> (Broker, Arc<RecordingExtension>) {
    let recording = Arc::new(RecordingExtension::new());
    let broker = builder()
        .extension(recording.clone())
        .build()
        .expect("broker builds");
    (broker, recording)
}

//! Shared harness for the costscope-client integration tests.

#![allow(dead_code)]

use costscope_client::{ClientDeps, ClientOptions, CostscopeClient, ManualClock};
use costscope_test_utils::{
    MockFetch, RecordingAlertSink, RecordingErrorSink, StaticDiscovery, StaticIdentity,
};
use std::sync::Arc;

pub const BASE_URL: &str = "http://cost-api.local";

pub struct Harness {
    pub client: CostscopeClient,
    pub fetch: Arc<MockFetch>,
    pub errors: Arc<RecordingErrorSink>,
    pub alerts: Arc<RecordingAlertSink>,
    pub clock: Arc<ManualClock>,
}

/// Build a client wired to a scripted fetch and recording sinks, on a manual
/// clock starting at zero. Telemetry buffers are forced on unless the caller
/// decided otherwise.
pub fn harness(fetch: MockFetch, mut options: ClientOptions) -> Harness {
    if options.force_telemetry.is_none() {
        options = options.with_force_telemetry(true);
    }
    let fetch = Arc::new(fetch);
    let errors = Arc::new(RecordingErrorSink::new());
    let alerts = Arc::new(RecordingAlertSink::new());
    let clock = Arc::new(ManualClock::new(0));

    let deps = ClientDeps {
        discovery: Arc::new(StaticDiscovery::new(BASE_URL)),
        identity: Arc::new(StaticIdentity::new("test-token")),
        fetch: Arc::clone(&fetch) as _,
        error_sink: Some(Arc::clone(&errors) as _),
        alert_sink: Some(Arc::clone(&alerts) as _),
        telemetry: None,
        clock: Some(Arc::clone(&clock) as _),
    };
    let client = CostscopeClient::new(deps, options, None).expect("test config must resolve");

    Harness {
        client,
        fetch,
        errors,
        alerts,
        clock,
    }
}

/// Give spawned background tasks (revalidations) a chance to run on the
/// current-thread test runtime.
pub async fn settle() {
    for _ in 0..25 {
        tokio::task::yield_now().await;
    }
}

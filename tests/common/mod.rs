#![allow(dead_code)]

use std::sync::Arc;

use shellfleet::config::Settings;
use shellfleet::progress::Reporter;
use shellfleet::shell::{RemoteSession, SessionPool};
use shellfleet::types::Host;
use shellfleet_test_utils::builders::fast_settings;
use shellfleet_test_utils::fake_shell::{FakeConnector, FakeShell, ShellHandle, ShellScript};

pub use shellfleet_test_utils::{init_tracing, with_timeout};

/// Negotiate a session over a fresh fake shell.
pub async fn ready_session(
    host: &Host,
    script: ShellScript,
    settings: &Settings,
    reporter: Reporter,
) -> (RemoteSession, ShellHandle) {
    let shell = FakeShell::new(script);
    let handle = shell.handle();
    let session = RemoteSession::establish(host.clone(), Box::new(shell), settings, reporter)
        .await
        .expect("fake shell should negotiate");
    (session, handle)
}

/// A pool that opens fake shells through `connector`.
pub fn fake_pool(connector: &Arc<FakeConnector>, reporter: Reporter) -> Arc<SessionPool> {
    Arc::new(SessionPool::with_connector(
        fast_settings(),
        reporter,
        connector.clone(),
    ))
}

use feedrelay_core::{ChannelId, SourceRef};
use feedrelay_messaging::{InMemoryMessaging, MessagingService};
use feedrelay_pipeline::{Forwarder, ForwarderConfig, RunOutcome, RunReport};
use tempfile::TempDir;

/// Destination channel used by every scenario.
pub const DESTINATION: ChannelId = ChannelId(900);
pub const DESTINATION_NAME: &str = "archive";

/// An in-memory world plus a private state directory.
pub struct Scenario {
    pub state: TempDir,
    pub service: InMemoryMessaging,
}

impl Scenario {
    pub fn new() -> Self {
        let service = InMemoryMessaging::new();
        service.add_channel(DESTINATION_NAME, DESTINATION);
        Self {
            state: TempDir::new().unwrap_or_else(|e| panic!("tempdir: {e}")),
            service,
        }
    }

    pub fn source(&self, name: &str, id: i64) -> ChannelId {
        self.service.add_channel(name, ChannelId(id))
    }

    /// Config forwarding the named sources into the destination.
    pub fn config(&self, sources: &[&str]) -> ForwarderConfig {
        let sources = sources
            .iter()
            .map(|s| s.parse::<SourceRef>().unwrap_or_else(|e| panic!("{s}: {e}")))
            .collect();
        let mut cfg = ForwarderConfig::new(sources, SourceRef::Handle(DESTINATION_NAME.into()));
        cfg.state_dir = self.state.path().to_path_buf();
        cfg
    }

    /// Hands the world to a forwarder. The state directory lives as long as
    /// the returned `TempDir`.
    pub fn forwarder(self, cfg: ForwarderConfig) -> (Forwarder<InMemoryMessaging>, TempDir) {
        let forwarder =
            Forwarder::new(self.service, cfg).unwrap_or_else(|e| panic!("forwarder: {e}"));
        (forwarder, self.state)
    }
}

impl Default for Scenario {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs once and expects the run to complete.
pub async fn run_completed<M: MessagingService>(forwarder: &Forwarder<M>) -> RunReport {
    match forwarder.run_once().await {
        Ok(RunOutcome::Completed(report)) => report,
        Ok(RunOutcome::Skipped { holder }) => panic!("run skipped, lock held by {holder:?}"),
        Err(err) => panic!("run failed: {err}"),
    }
}

/// Texts posted to the destination, oldest first.
pub fn delivered_texts(service: &InMemoryMessaging) -> Vec<String> {
    service
        .items(DESTINATION)
        .into_iter()
        .map(|item| item.text)
        .collect()
}

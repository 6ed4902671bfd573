use tokio::sync::oneshot;
use shared::types::DiscoveryResult;

/// Retry sweeps a result may wait for its thing type before it is dropped.
pub const MAX_RETRIES: u32 = 20;

/// A result waiting to be merged, together with whoever awaits the outcome.
#[derive(Debug)]
pub struct PendingResult {
    pub result: DiscoveryResult,
    /// Discovery source that reported the result
    pub source: Option<String>,
    pub reply: oneshot::Sender<bool>,
    pub retry_count: u32,
}

impl PendingResult {
    pub fn new(result: DiscoveryResult, source: Option<String>, reply: oneshot::Sender<bool>) -> Self {
        Self {
            result,
            source,
            reply,
            retry_count: 0,
        }
    }
}

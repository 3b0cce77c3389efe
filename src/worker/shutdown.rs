use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Cooperative stop flag shared by every worker
///
/// Workers check it between batches only; an open transaction always runs
/// to commit or rollback first.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolve once the signal fires
    pub async fn wait(&self) {
        let mut receiver = self.receiver.clone();
        // the sender lives in self, so the channel cannot close while we wait
        let _ = receiver.wait_for(|stopped| *stopped).await;
    }

    /// Trigger on Ctrl-C
    pub fn listen_for_ctrl_c(&self) {
        let signal = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received, finishing current batches…");
                signal.trigger();
            }
        });
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

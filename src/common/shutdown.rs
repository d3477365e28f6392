//! Cooperative stop signal shared by the long-running loops

use tokio::sync::watch;

pub type StopSender = watch::Sender<bool>;
pub type StopReceiver = watch::Receiver<bool>;

pub fn stop_channel() -> (StopSender, StopReceiver) {
    watch::channel(false)
}

/// Resolves once stop was requested or every sender is gone
pub async fn wait_for_stop(stop: &mut StopReceiver) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

use super::PlaybackProgress;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc as tokio_mpsc;
use tracing::{info, trace};

type Subscribers = Arc<Mutex<Vec<tokio_mpsc::UnboundedSender<PlaybackProgress>>>>;

/// Fans playback progress out to any number of subscribers
#[derive(Clone)]
pub struct PlaybackProgressHandle {
    subscribers: Subscribers,
}

impl PlaybackProgressHandle {
    /// Spawn the dispatch task reading from `progress_rx`
    pub fn new(
        mut progress_rx: tokio_mpsc::UnboundedReceiver<PlaybackProgress>,
        runtime_handle: tokio::runtime::Handle,
    ) -> Self {
        let subscribers: Subscribers = Arc::new(Mutex::new(Vec::new()));
        let dispatch_subscribers = subscribers.clone();

        runtime_handle.spawn(async move {
            while let Some(progress) = progress_rx.recv().await {
                let mut subs = dispatch_subscribers.lock().unwrap();
                // Receivers that were dropped fail the send and fall out here
                subs.retain(|tx| tx.send(progress.clone()).is_ok());
                trace!("Dispatched progress to {} subscribers", subs.len());
            }
            info!("Playback progress channel closed, exiting");
        });

        Self { subscribers }
    }

    /// Receive every update emitted from now on.
    /// Dropping the receiver ends the subscription.
    pub fn subscribe(&self) -> tokio_mpsc::UnboundedReceiver<PlaybackProgress> {
        let (tx, rx) = tokio_mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::state::PlayerState;

    #[tokio::test]
    async fn test_fans_out_and_drops_closed_subscribers() {
        let (tx, rx) = tokio_mpsc::unbounded_channel();
        let handle = PlaybackProgressHandle::new(rx, tokio::runtime::Handle::current());

        let mut first = handle.subscribe();
        let second = handle.subscribe();
        drop(second);

        tx.send(PlaybackProgress::StateChanged {
            state: PlayerState::Paused,
        })
        .unwrap();

        let received = first.recv().await.unwrap();
        assert!(matches!(
            received,
            PlaybackProgress::StateChanged {
                state: PlayerState::Paused
            }
        ));
        assert_eq!(handle.subscriber_count(), 1);
    }
}

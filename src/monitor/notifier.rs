//! Address Change Notifier
//!
//! Background task admitting pay-in keys registered while the monitor runs.
//! Each iteration polls the change feed with a bounded wait, then checks
//! the stop flag, so a stop request is honored within one poll interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::registry::AddressRegistry;
use crate::storage::{ChangeFeed, ChangeNotification, StorageError};
use crate::types::{ChainType, WatchSince};

pub struct AddressChangeNotifier {
    registry: Arc<AddressRegistry>,
    feed: Arc<dyn ChangeFeed>,
    poll_wait: Duration,
}

impl AddressChangeNotifier {
    pub fn new(registry: Arc<AddressRegistry>, feed: Arc<dyn ChangeFeed>, poll_wait: Duration) -> Self {
        Self {
            registry,
            feed,
            poll_wait,
        }
    }

    /// Spawn the polling loop
    pub fn start(self) -> NotifierHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let task_stop = Arc::clone(&stop);

        let join = tokio::spawn(async move {
            tracing::info!(
                target: "payin_monitor::registry",
                poll_ms = self.poll_wait.as_millis() as u64,
                "address change notifier started"
            );
            self.run(&task_stop).await;
            tracing::info!(target: "payin_monitor::registry", "address change notifier stopped");
        });

        NotifierHandle { stop, join }
    }

    async fn run(&self, stop: &AtomicBool) {
        while !stop.load(Ordering::Acquire) {
            match self.feed.poll(self.poll_wait).await {
                Ok(notifications) => {
                    for notification in notifications {
                        self.admit(notification).await;
                    }
                }
                Err(StorageError::FeedClosed) => {
                    tracing::warn!(target: "payin_monitor::registry", "change feed closed");
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        target: "payin_monitor::registry",
                        error = %e,
                        "change feed poll failed"
                    );
                    tokio::time::sleep(self.poll_wait).await;
                }
            }
        }
    }

    /// Register the key carried by one notification
    pub async fn admit(&self, notification: ChangeNotification) {
        let Some(chain) = ChainType::from_channel(&notification.channel) else {
            tracing::warn!(
                target: "payin_monitor::registry",
                channel = %notification.channel,
                "notification on unknown channel"
            );
            return;
        };

        // Rejections are logged by the registry
        let _ = self
            .registry
            .register(chain, &notification.payload, WatchSince::now())
            .await;
    }
}

/// Handle to the running notifier
pub struct NotifierHandle {
    stop: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

impl NotifierHandle {
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Request a stop and wait up to `timeout` for the loop to exit
    ///
    /// Returns `false` if the loop had to be aborted.
    pub async fn stop_and_join(self, timeout: Duration) -> bool {
        self.stop.store(true, Ordering::Release);

        let mut join = self.join;
        match tokio::time::timeout(timeout, &mut join).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::error!(target: "payin_monitor::registry", error = %e, "notifier task failed");
                false
            }
            Err(_) => {
                join.abort();
                false
            }
        }
    }
}

use std::time::Duration;
use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use shared::notification::{Notification, NotificationPayload};
use crate::client::{ClientError, DeviceClient};
use crate::notify::stream::{open_stream, NotificationEvent, StreamError, StreamPolicy};

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to open notification stream: {0}")]
    Open(#[from] ClientError),

    #[error("notification stream failed: {0}")]
    Stream(#[from] StreamError),
}

/// Something that can (re)open a notification feed
#[async_trait]
pub trait StreamOpener: Send + Sync {
    async fn open(
        &self,
        cancel: CancellationToken,
    ) -> Result<flume::Receiver<NotificationEvent>, ClientError>;
}

/// Opens the feed of one product over HTTP
pub struct DeviceStream {
    client: DeviceClient,
    policy: StreamPolicy,
}

impl DeviceStream {
    pub fn new(client: DeviceClient, policy: StreamPolicy) -> Self {
        Self { client, policy }
    }
}

#[async_trait]
impl StreamOpener for DeviceStream {
    async fn open(
        &self,
        cancel: CancellationToken,
    ) -> Result<flume::Receiver<NotificationEvent>, ClientError> {
        open_stream(&self.client, cancel, self.policy).await
    }
}

/// Receives what the watch loop sees
pub trait WatchObserver {
    fn notification(
        &mut self,
        notification: &Notification,
        payload: Result<NotificationPayload, serde_json::Error>,
    );

    fn reconnecting(&mut self) {}

    fn stream_error(&mut self, _error: &StreamError) {}
}

/// Watch a product's notifications until cancelled.
///
/// Products close the feed now and then for no stated reason, so an end of
/// stream triggers a reopen against the same product, indefinitely. Other
/// stream errors are reported and the loop keeps reading. Returns `Ok` when
/// the queue closes without a terminal error, which happens on cancellation.
pub async fn watch<O, W>(
    opener: &O,
    observer: &mut W,
    reconnect_delay: Duration,
    cancel: &CancellationToken,
) -> Result<(), WatchError>
where
    O: StreamOpener + ?Sized,
    W: WatchObserver + ?Sized,
{
    'reconnect: loop {
        let events = match opener.open(cancel.clone()).await {
            Ok(events) => events,
            Err(_) if cancel.is_cancelled() => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let mut terminal: Option<StreamError> = None;

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                event = events.recv_async() => event,
            };

            let Ok(event) = event else {
                // Queue closed
                return match terminal {
                    Some(e) => Err(e.into()),
                    None => Ok(()),
                };
            };

            match event {
                Err(StreamError::EndOfStream) => {
                    tracing::info!("Product closed the notification stream, reconnecting");
                    observer.reconnecting();

                    if !reconnect_delay.is_zero() {
                        tokio::select! {
                            _ = cancel.cancelled() => return Ok(()),
                            _ = tokio::time::sleep(reconnect_delay) => {}
                        }
                    }
                    continue 'reconnect;
                }
                Err(e) => {
                    tracing::warn!("Notification stream error: {}", e);
                    observer.stream_error(&e);
                    if e.is_terminal() {
                        terminal = Some(e);
                    }
                }
                Ok(value) => match Notification::from_value(value) {
                    Ok(notification) => {
                        let payload = notification.payload();
                        observer.notification(&notification, payload);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to decode notification envelope: {}", e);
                    }
                },
            }
        }
    }
}

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use crate::client::{ClientError, DeviceClient};
use crate::notify::decoder::DocumentDecoder;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum StreamError {
    /// The product closed the connection
    #[error("notification stream closed by the product")]
    EndOfStream,

    #[error("malformed notification: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("gave up after {0} consecutive malformed notifications")]
    TooManyDecodeErrors(usize),

    #[error("notification stream read failed: {0}")]
    Transport(#[source] BoxError),
}

impl StreamError {
    /// Whether the stream closes after delivering this error
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Decode(_))
    }
}

/// One item from the feed; errors are delivered in-band
pub type NotificationEvent = Result<Value, StreamError>;

#[derive(Debug, Clone, Copy)]
pub struct StreamPolicy {
    /// Malformed documents tolerated in a row before the stream is abandoned
    pub max_consecutive_decode_errors: usize,
}

/// Connect to the product's notification feed.
///
/// Fails outright on a connect error or non-success status. On success a
/// producer task decodes the body and hands events over one at a time: the
/// queue has no buffer, so the producer never runs ahead of the consumer.
/// The queue closes after a terminal event, or without one on cancellation.
pub async fn open_stream(
    client: &DeviceClient,
    cancel: CancellationToken,
    policy: StreamPolicy,
) -> Result<flume::Receiver<NotificationEvent>, ClientError> {
    let response = client.open_notifications(&cancel).await?;
    tracing::info!("Streaming notifications from {}", client.base_url());
    Ok(spawn_pump(response.bytes_stream(), cancel, policy))
}

pub(crate) fn spawn_pump<S, E>(
    body: S,
    cancel: CancellationToken,
    policy: StreamPolicy,
) -> flume::Receiver<NotificationEvent>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let (tx, rx) = flume::bounded(0);
    tokio::spawn(pump(body, tx, cancel, policy));
    rx
}

/// Owns the response body; it is dropped, closing the connection, on every
/// return path.
async fn pump<S, E>(
    body: S,
    tx: flume::Sender<NotificationEvent>,
    cancel: CancellationToken,
    policy: StreamPolicy,
) where
    S: Stream<Item = Result<Bytes, E>> + Send,
    E: std::error::Error + Send + Sync + 'static,
{
    let mut body = std::pin::pin!(body);
    let mut decoder = DocumentDecoder::new();
    let max_errors = policy.max_consecutive_decode_errors.max(1);
    let mut consecutive_errors = 0usize;

    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("Notification stream cancelled");
                return;
            }
            event = next_event(&mut decoder, &mut body) => event,
        };

        let event = match event {
            Ok(value) => {
                consecutive_errors = 0;
                Ok(value)
            }
            Err(StreamError::Decode(e)) => {
                consecutive_errors += 1;
                if consecutive_errors >= max_errors {
                    tracing::warn!("Abandoning stream after {} malformed notifications", consecutive_errors);
                    Err(StreamError::TooManyDecodeErrors(consecutive_errors))
                } else {
                    Err(StreamError::Decode(e))
                }
            }
            Err(e) => Err(e),
        };

        let terminal = matches!(&event, Err(e) if e.is_terminal());

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("Notification stream cancelled");
                return;
            }
            sent = tx.send_async(event) => {
                if sent.is_err() {
                    tracing::debug!("Notification consumer went away");
                    return;
                }
            }
        }

        if terminal {
            return;
        }
    }
}

async fn next_event<S, E>(
    decoder: &mut DocumentDecoder,
    body: &mut std::pin::Pin<&mut S>,
) -> NotificationEvent
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    loop {
        if let Some(result) = decoder.next_document() {
            return result.map_err(StreamError::Decode);
        }

        match body.next().await {
            Some(Ok(chunk)) => decoder.push(&chunk),
            Some(Err(e)) => return Err(StreamError::Transport(Box::new(e))),
            None => {
                if decoder.has_partial() {
                    tracing::warn!("Discarding incomplete notification at end of stream");
                }
                return Err(StreamError::EndOfStream);
            }
        }
    }
}

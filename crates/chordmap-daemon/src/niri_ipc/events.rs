//! Niri event stream
//!
//! ## Protocol
//!
//! 1. Connect to the niri socket
//! 2. Send `Request::EventStream` as JSON + newline
//! 3. Receive the initial `Ok(Handled)` reply
//! 4. Receive `Event` messages, one JSON object per line
//!
//! After the subscription is acknowledged the connection is one-way; no
//! more requests can be sent on it.
//!
//! ## Reconnection
//!
//! [`NiriEventStream::connect_with_retry`] backs off exponentially: 500ms,
//! doubling each attempt, capped at 10 seconds.

use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedReadHalf;
use tokio::net::UnixStream;
use tokio::time::sleep;
use tracing::{info, warn};

use super::error::NiriError;

/// Default number of reconnection attempts after the first one
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Initial delay between retry attempts (500ms)
const INITIAL_RETRY_DELAY_MS: u64 = 500;

/// Maximum delay between retry attempts (10 seconds)
const MAX_RETRY_DELAY_MS: u64 = 10_000;

/// A subscribed niri event stream.
#[derive(Debug)]
pub struct NiriEventStream {
    reader: BufReader<OwnedReadHalf>,
}

impl NiriEventStream {
    /// Connect to the socket at `socket_path` and subscribe to events.
    pub async fn connect(socket_path: &Path) -> Result<Self, NiriError> {
        let socket =
            UnixStream::connect(socket_path)
                .await
                .map_err(|e| NiriError::ConnectionFailed {
                    path: socket_path.to_path_buf(),
                    source: e,
                })?;

        let (read_half, mut write_half) = socket.into_split();

        let request_json = serde_json::to_string(&niri_ipc::Request::EventStream)
            .map_err(NiriError::SerializeFailed)?;
        write_half
            .write_all(request_json.as_bytes())
            .await
            .map_err(NiriError::SendFailed)?;
        write_half
            .write_all(b"\n")
            .await
            .map_err(NiriError::SendFailed)?;
        write_half.flush().await.map_err(NiriError::SendFailed)?;

        let mut reader = BufReader::new(read_half);
        let mut response_line = String::new();
        let bytes_read = reader
            .read_line(&mut response_line)
            .await
            .map_err(NiriError::ReceiveFailed)?;

        if bytes_read == 0 {
            return Err(NiriError::ConnectionClosed);
        }

        let reply: niri_ipc::Reply =
            serde_json::from_str(&response_line).map_err(NiriError::DeserializeFailed)?;

        match reply {
            Ok(niri_ipc::Response::Handled) => {}
            Ok(other) => {
                return Err(NiriError::Rejected {
                    message: format!("expected Handled for EventStream, got {:?}", other),
                });
            }
            Err(message) => return Err(NiriError::Rejected { message }),
        }

        tracing::debug!(path = %socket_path.display(), "Niri event stream connected");

        Ok(Self { reader })
    }

    /// Connect, retrying up to `max_retries` more times with exponential backoff.
    pub async fn connect_with_retry(socket_path: &Path, max_retries: u32) -> Result<Self, NiriError> {
        let mut attempt = 0;
        let mut delay_ms = INITIAL_RETRY_DELAY_MS;
        let last_error = loop {
            attempt += 1;

            match Self::connect(socket_path).await {
                Ok(stream) => {
                    if attempt > 1 {
                        info!("Niri event stream connected after {} attempt(s)", attempt);
                    }
                    return Ok(stream);
                }
                Err(e) => {
                    if attempt > max_retries {
                        break e;
                    }

                    warn!(
                        attempt = attempt,
                        max_retries = max_retries,
                        delay_ms = delay_ms,
                        "Niri event stream connection failed, retrying..."
                    );

                    sleep(Duration::from_millis(delay_ms)).await;
                    delay_ms = (delay_ms * 2).min(MAX_RETRY_DELAY_MS);
                }
            }
        };

        warn!(
            attempts = attempt,
            last_error = %last_error,
            "Failed to connect to niri event stream after all retry attempts"
        );

        Err(NiriError::MaxRetriesExceeded { attempts: attempt })
    }

    /// Read the next event. Events this version of `niri-ipc` does not know
    /// fail with `DeserializeFailed`; the stream stays usable.
    pub async fn next_event(&mut self) -> Result<niri_ipc::Event, NiriError> {
        let mut line = String::new();

        let bytes_read = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(NiriError::ReceiveFailed)?;

        if bytes_read == 0 {
            return Err(NiriError::ConnectionClosed);
        }

        serde_json::from_str(&line).map_err(NiriError::DeserializeFailed)
    }
}

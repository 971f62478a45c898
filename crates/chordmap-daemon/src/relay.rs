//! Per-device relay loop
//!
//! Reads raw events from one physical keyboard, runs them through its
//! [`Matcher`] and writes the result to its virtual keyboard. Non-key events
//! (pointer motion, wheel, switches) are collected per frame and forwarded
//! unchanged, in order with the key output. The loop ends on shutdown or on
//! the first device error; either way every key still down on the virtual
//! keyboard is released before returning.

use evdev::{EventType, InputEvent, Synchronization};
use tokio::sync::watch;

use crate::error::DeviceError;
use crate::event::{classify, KeySink, KeySource};
use crate::matcher::Matcher;

/// Run until `shutdown` fires (or its sender is dropped) or the device fails.
pub async fn run_relay<S, K>(
    name: &str,
    source: &mut S,
    sink: &mut K,
    matcher: &mut Matcher,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), DeviceError>
where
    S: KeySource,
    K: KeySink,
{
    let mut frame: Vec<InputEvent> = Vec::new();

    let result = loop {
        if *shutdown.borrow() {
            break Ok(());
        }

        tokio::select! {
            biased;

            _ = shutdown.changed() => {
                tracing::debug!("Relay for '{}' received shutdown", name);
                break Ok(());
            }
            event = source.next_event() => {
                let raw = match event {
                    Ok(raw) => raw,
                    Err(e) => break Err(e),
                };

                if raw.event_type() == EventType::SYNCHRONIZATION {
                    if raw.code() == Synchronization::SYN_REPORT.0 {
                        if let Err(e) = flush_frame(sink, &mut frame) {
                            break Err(e);
                        }
                    }
                    continue;
                }
                if raw.event_type() != EventType::KEY {
                    frame.push(raw);
                    continue;
                }

                // keep pending non-key events ahead of this key's output
                if let Err(e) = flush_frame(sink, &mut frame) {
                    break Err(e);
                }

                let key_event = match classify(&raw) {
                    Ok(Some(key_event)) => key_event,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!("Dropping event from '{}': {}", name, e);
                        continue;
                    }
                };

                let output = matcher.process(key_event);
                if !output.is_empty() {
                    if let Err(e) = sink.emit(&output) {
                        break Err(e);
                    }
                }
            }
        }
    };

    let releases = matcher.release_all();
    if !releases.is_empty() {
        tracing::debug!("Releasing {} key(s) held on behalf of '{}'", releases.len(), name);
        if let Err(e) = sink.emit(&releases) {
            tracing::warn!("Failed to release keys for '{}': {}", name, e);
        }
    }

    result
}

fn flush_frame<K: KeySink>(sink: &mut K, frame: &mut Vec<InputEvent>) -> Result<(), DeviceError> {
    if frame.is_empty() {
        return Ok(());
    }
    let result = sink.forward(frame);
    frame.clear();
    result
}

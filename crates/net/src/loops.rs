//! Per-connection tasks
//!
//! Every live connection runs exactly one reader, one writer and one
//! heartbeat, all bound to the session's cancellation token.

use std::time::Duration;

use taibai_core::{decode, Envelope, FrameClass, SeqGenerator};
use tokio::time::{interval_at, timeout, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::dispatcher::Dispatcher;
use crate::error::Error;
use crate::frame::{FrameReader, FrameWriter, Inbound, CLOSE_NORMAL};
use crate::hooks::Hooks;
use crate::outbound::OutboundQueue;

/// Upper bound on a single socket write
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Why the reader stopped
#[derive(Debug)]
pub enum ReadOutcome {
    /// Session token fired
    Cancelled,
    /// Hub closed with a normal close code
    Graceful,
    /// Anything else; triggers the reconnect path
    Lost(Error),
}

/// Read frames until the connection ends.
///
/// Each frame is decoded on its own; a malformed frame is reported through
/// the error hooks and reading continues.
pub async fn read_loop(
    mut reader: FrameReader,
    hooks: &Hooks,
    dispatcher: &Dispatcher,
    deadline: Duration,
    token: CancellationToken,
) -> ReadOutcome {
    loop {
        let inbound = tokio::select! {
            _ = token.cancelled() => return ReadOutcome::Cancelled,
            next = timeout(deadline, reader.recv()) => match next {
                Err(_) => return ReadOutcome::Lost(Error::ReadTimeout(deadline)),
                Ok(None) => return ReadOutcome::Lost(Error::ConnectionLost),
                Ok(Some(Err(e))) => return ReadOutcome::Lost(e),
                Ok(Some(Ok(inbound))) => inbound,
            },
        };

        let bytes = match inbound {
            Inbound::Data(bytes) => bytes,
            Inbound::Keepalive => {
                trace!("Transport keepalive");
                continue;
            }
            Inbound::Close { code, reason } => {
                debug!(code = code, reason = %reason, "Hub sent close frame");
                if code == CLOSE_NORMAL {
                    return ReadOutcome::Graceful;
                }
                return ReadOutcome::Lost(Error::Closed { code, reason });
            }
        };

        let envelope = match decode(&bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, len = bytes.len(), "Dropping malformed frame");
                hooks.emit_error(&e.into());
                continue;
            }
        };

        match envelope.class() {
            FrameClass::Keepalive => trace!(kind = %envelope.kind, seq = envelope.seq, "Keepalive envelope"),
            FrameClass::Control => hooks.emit_message(&envelope),
            FrameClass::Application => {
                hooks.emit_message(&envelope);
                if let Err(e) = dispatcher.dispatch(&envelope) {
                    warn!(event = %envelope.event, error = %e, "Failed to dispatch event");
                    hooks.emit_error(&e.into());
                }
            }
        }
    }
}

/// Drain the outbound queue into the socket and send transport pings.
///
/// Only this task ever writes to the socket. A failed write is reported and
/// the loop keeps going; the reader is the one that notices a dead link.
pub async fn write_loop(
    mut writer: FrameWriter,
    queue: &OutboundQueue,
    hooks: &Hooks,
    keepalive: Duration,
    token: CancellationToken,
) {
    let mut ticker = ticker(keepalive);

    let mut rx = tokio::select! {
        _ = token.cancelled() => return,
        rx = queue.receiver().lock() => rx,
    };

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            frame = rx.recv() => {
                // The queue owns its sender, so the channel never closes here
                let Some(frame) = frame else { break };
                match timeout(WRITE_TIMEOUT, writer.send_text(frame)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!(error = %e, "Write failed");
                        hooks.emit_error(&e);
                    }
                    Err(_) => {
                        warn!("Write timed out");
                        hooks.emit_error(&Error::Transport("write timed out".into()));
                    }
                }
            }
            _ = tick(&mut ticker) => {
                if let Ok(Err(e)) = timeout(WRITE_TIMEOUT, writer.send_ping()).await {
                    debug!(error = %e, "Transport ping failed");
                }
            }
        }
    }

    drop(rx);
    if let Ok(Err(e)) = timeout(WRITE_TIMEOUT, writer.close()).await {
        debug!(error = %e, "Close frame not delivered");
    }
}

/// Enqueue an application ping every `interval`.
///
/// Never writes to the socket itself; a full queue just skips the beat.
pub async fn heartbeat_loop(
    queue: &OutboundQueue,
    seqs: &SeqGenerator,
    interval: Duration,
    token: CancellationToken,
) {
    let mut ticker = ticker(interval);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tick(&mut ticker) => {
                if let Err(e) = queue.try_enqueue_envelope(&Envelope::ping(seqs.next())) {
                    debug!(error = %e, "Skipped heartbeat");
                }
            }
        }
    }
}

/// Ticker whose first tick is one `period` from now.
///
/// `None` if two periods from now lie beyond the clock's range; such a
/// ticker never fires.
fn ticker(period: Duration) -> Option<Interval> {
    let now = Instant::now();
    now.checked_add(period.checked_mul(2)?)?;
    let mut ticker = interval_at(now + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(ticker)
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_enqueues_increasing_pings() {
        let queue = OutboundQueue::new(16);
        let seqs = SeqGenerator::new();
        let token = CancellationToken::new();

        let beat = heartbeat_loop(&queue, &seqs, Duration::from_millis(100), token.clone());
        let stop = async {
            tokio::time::sleep(Duration::from_millis(350)).await;
            token.cancel();
        };
        tokio::join!(beat, stop);

        let mut rx = queue.receiver().lock().await;
        let mut last = 0;
        let mut beats = 0;
        while let Ok(text) = rx.try_recv() {
            let env = decode(text.as_bytes()).unwrap();
            assert!(env.is_keepalive());
            assert!(env.seq > last);
            last = env.seq;
            beats += 1;
        }
        assert_eq!(beats, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_survives_full_queue() {
        let queue = OutboundQueue::new(1);
        queue.try_enqueue("occupied".into()).unwrap();
        let seqs = SeqGenerator::new();
        let token = CancellationToken::new();

        let beat = heartbeat_loop(&queue, &seqs, Duration::from_millis(10), token.clone());
        let stop = async {
            tokio::time::sleep(Duration::from_millis(55)).await;
            token.cancel();
        };
        tokio::join!(beat, stop);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_interval_never_fires() {
        let queue = OutboundQueue::new(4);
        let seqs = SeqGenerator::new();
        let token = CancellationToken::new();

        let beat = heartbeat_loop(&queue, &seqs, Duration::MAX, token.clone());
        let stop = async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            token.cancel();
        };
        tokio::join!(beat, stop);
        assert!(queue.is_empty());
    }
}

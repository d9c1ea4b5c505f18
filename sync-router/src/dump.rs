//! Diagnostic dump of tracked API sessions.
//!
//! Each line is `<n>: id: <id>, token: <token>` with `n` counting from 1.
//!
//! Lines are produced on a separate task and handed over through a small
//! bounded channel. If the sink cannot keep up within the time budget the
//! dump ends with a `timed out` marker instead of stalling.

use crate::registry::SessionRegistry;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

/// Default time budget per batch of lines.
pub const DUMP_BUDGET: Duration = Duration::from_secs(1);

/// The budget is renewed after this many lines.
const BUDGET_RESET_LINES: usize = 10_000;

const CHANNEL_CAPACITY: usize = 15;

const TIMED_OUT: &str = "timed out\n";

/// Write every API session to `sink`, one line each.
///
/// Returns the number of session lines written.
pub async fn dump_api_sessions<W>(registry: &SessionRegistry, sink: &mut W) -> std::io::Result<usize>
where
    W: AsyncWrite + Unpin,
{
    dump_api_sessions_with_budget(registry, sink, DUMP_BUDGET).await
}

/// Like [`dump_api_sessions`] with an explicit time budget.
pub async fn dump_api_sessions_with_budget<W>(
    registry: &SessionRegistry,
    sink: &mut W,
    budget: Duration,
) -> std::io::Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let mut sessions = registry.api_sessions();
    sessions.sort_by(|a, b| a.id.cmp(&b.id));

    let (tx, mut rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut deadline = Instant::now() + budget;

        for (i, session) in sessions.iter().enumerate() {
            if i > 0 && i % BUDGET_RESET_LINES == 0 {
                deadline = Instant::now() + budget;
            }
            let line = format!("{}: id: {}, token: {}\n", i + 1, session.id, session.token);

            let delivered = Instant::now() < deadline
                && tokio::select! {
                    biased;
                    _ = sleep_until(deadline) => false,
                    sent = tx.send(line) => {
                        if sent.is_err() {
                            return;
                        }
                        true
                    }
                };

            if !delivered {
                tracing::warn!("API session dump timed out after {} entries", i);
                let _ = tx.send_timeout(TIMED_OUT.to_string(), Duration::from_secs(1)).await;
                return;
            }
        }
    });

    let mut written = 0;
    while let Some(line) = rx.recv().await {
        sink.write_all(line.as_bytes()).await?;
        if line != TIMED_OUT {
            written += 1;
        }
    }
    sink.flush().await?;
    Ok(written)
}

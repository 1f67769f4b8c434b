//! Keepalive scheduler.
//!
//! One task per connection generation. The idle deadline moves forward on
//! every outbound send of that generation; when it elapses a PINGREQ goes
//! out on the same generation's writer. The task holds no reference to any
//! other generation, so a stopped or leaked timer cannot write into a
//! later connection.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWrite;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::connection::Outbound;
use crate::protocol::Packet;

/// Spawn the keepalive task for one generation.
pub fn spawn<W>(interval: Duration, outbound: Arc<Outbound<W>>, cancel: CancellationToken) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(run(interval, outbound, cancel))
}

/// Run until `cancel` fires or a ping fails to send.
pub async fn run<W>(interval: Duration, outbound: Arc<Outbound<W>>, cancel: CancellationToken)
where
    W: AsyncWrite + Unpin + Send,
{
    let mut deadline = Instant::now() + interval;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                trace!("Keepalive task stopping");
                break;
            }
            _ = outbound.activity() => {
                deadline = Instant::now() + interval;
            }
            _ = sleep_until(deadline) => {
                // The send itself signals activity, which moves the deadline.
                if let Err(e) = outbound.send(&Packet::PingReq).await {
                    warn!("Keepalive ping failed: {}", e);
                    break;
                }
                trace!("Keepalive ping sent");
            }
        }
    }
}

//! Per-connection state machine.
//!
//! admit -> select -> connect (buffering client bytes, retrying on refusal)
//! -> flush -> relay -> teardown.

use crate::backend::Target;
use crate::balancer::Shared;
use crate::config::BufferOverflowPolicy;
use crate::error::BalancerError;
use crate::events::{BalancerEvent, Notice};
use crate::frontend::{Admission, ConnectionInfo};
use crate::proxy::relay::{RelayEnd, Side, relay};
use crate::session::CloseOutcome;
use bytes::BytesMut;
use std::io;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

/// Read size while waiting for a target to accept.
const READ_CHUNK_SIZE: usize = 4096;

/// Drive one accepted client connection to completion.
pub(crate) async fn handle_connection(shared: Arc<Shared>, mut client: TcpStream, info: ConnectionInfo) {
    let _tracker = shared.track_connection();
    let started = Instant::now();

    if let Admission::Reject(reason) = shared.admission.run(&info).await {
        debug!(reason = %reason, "connection rejected by admission chain");
        shared.metrics.admission_rejected();
        shared.emit(BalancerEvent::Notice(Notice::AdmissionRejected {
            peer: info.peer,
            reason,
        }));
        return;
    }

    let session = SessionGuard::open(&shared, info.client_key());
    let Some(target) = session.target.clone() else {
        shared.emit(BalancerEvent::Error(BalancerError::NoAvailableTargets {
            client: session.client.clone(),
        }));
        return;
    };

    let mut pending = PendingBuffer::new(shared.config.max_buffer_size);
    let Some((target, mut backend)) =
        connect_with_retry(&shared, &session.client, target, &mut client, &mut pending).await
    else {
        return;
    };

    if let Err(e) = backend.set_nodelay(true) {
        warn!(upstream = %target, error = %e, "failed to set TCP_NODELAY on target connection");
    }

    let flushed = pending.len() as u64;
    if !pending.is_empty() {
        trace!(upstream = %target, bytes = pending.len(), "flushing buffered client data");
        if let Err(source) = backend.write_all(&pending.take()).await {
            shared.deactivate(&target);
            shared.emit(BalancerEvent::Error(BalancerError::TargetIo { target, source }));
            return;
        }
    }

    let outcome = relay(client, backend).await;
    shared.metrics.record_relay(
        flushed + outcome.bytes_to_target,
        outcome.bytes_to_client,
        started.elapsed(),
    );

    match outcome.end {
        RelayEnd::Closed(side) => debug!(upstream = %target, closed_by = ?side, "connection closed"),
        RelayEnd::Failed(Side::Target, source) => {
            shared.deactivate(&target);
            shared.emit(BalancerEvent::Error(BalancerError::TargetIo { target, source }));
        }
        RelayEnd::Failed(Side::Client, source) => {
            shared.emit(BalancerEvent::Error(BalancerError::ClientIo {
                client: session.client.clone(),
                source,
            }));
        }
    }
}

/// Connect to `target`, reading client bytes into `pending` meanwhile.
///
/// A refused connection deactivates the target and retries with whatever
/// target the session converges on. Returns `None` once the connection is
/// finished, with any error already reported.
async fn connect_with_retry(
    shared: &Arc<Shared>,
    client_key: &str,
    mut target: Target,
    client: &mut TcpStream,
    pending: &mut PendingBuffer,
) -> Option<(Target, TcpStream)> {
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];

    loop {
        trace!(upstream = %target, "connecting to target");

        // Owns its address: `target` is replaced after a refusal.
        let result = {
            let connect = TcpStream::connect((target.host.clone(), target.port));
            tokio::pin!(connect);

            loop {
                // Client bytes already waiting are buffered before the connect is polled.
                tokio::select! {
                    biased;

                    read = client.read(&mut chunk) => match read {
                        Ok(0) => {
                            debug!(upstream = %target, "client closed before target connected");
                            return None;
                        }
                        Ok(n) => {
                            if !pending.push(&chunk[..n]) {
                                shared.emit(BalancerEvent::Error(BalancerError::BufferOverflow {
                                    client: client_key.to_string(),
                                    limit: pending.limit(),
                                }));
                                if shared.config.buffer_overflow == BufferOverflowPolicy::Close {
                                    return None;
                                }
                            }
                        }
                        Err(source) => {
                            shared.emit(BalancerEvent::Error(BalancerError::ClientIo {
                                client: client_key.to_string(),
                                source,
                            }));
                            return None;
                        }
                    },
                    result = &mut connect => break result,
                }
            }
        };

        match result {
            Ok(stream) => {
                debug!(upstream = %target, "connected to target");
                return Some((target, stream));
            }
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                warn!(upstream = %target, "target refused connection");
                match shared.handle_refusal(client_key, &target) {
                    Some(next) => target = next,
                    None => {
                        shared.emit(BalancerEvent::Error(BalancerError::NoAvailableTargets {
                            client: client_key.to_string(),
                        }));
                        return None;
                    }
                }
            }
            Err(source) => {
                shared.emit(BalancerEvent::Error(BalancerError::TargetConnect { target, source }));
                return None;
            }
        }
    }
}

/// Holds a session open for the lifetime of one connection.
struct SessionGuard<'a> {
    shared: &'a Shared,
    client: String,
    target: Option<Target>,
}

impl<'a> SessionGuard<'a> {
    fn open(shared: &'a Shared, client: String) -> Self {
        let target = shared.open_session(&client);
        Self {
            shared,
            client,
            target,
        }
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        match self.shared.close_session(&self.client) {
            CloseOutcome::StillOpen(remaining) => trace!(remaining, "session still in use"),
            CloseOutcome::Expiring => trace!("session idle, expiry scheduled"),
            CloseOutcome::Removed => trace!("session removed"),
            CloseOutcome::Unknown => warn!(client = %self.client, "closed connection had no session"),
        }
    }
}

/// Client bytes received before a target accepted the connection.
///
/// Every byte counts toward the limit, including ones that were dropped,
/// so once the limit is crossed all later chunks are dropped too and the
/// accepted bytes stay in arrival order.
#[derive(Debug)]
struct PendingBuffer {
    data: BytesMut,
    received: usize,
    limit: usize,
}

impl PendingBuffer {
    fn new(limit: usize) -> Self {
        Self {
            data: BytesMut::new(),
            received: 0,
            limit,
        }
    }

    /// Buffer `chunk`. Returns false, dropping it, if the limit is exceeded.
    fn push(&mut self, chunk: &[u8]) -> bool {
        self.received = self.received.saturating_add(chunk.len());
        if self.received > self.limit {
            return false;
        }
        self.data.extend_from_slice(chunk);
        true
    }

    fn limit(&self) -> usize {
        self.limit
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn take(&mut self) -> BytesMut {
        self.data.split()
    }
}

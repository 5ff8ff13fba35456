//! Frontend listener implementation.
//!
//! Accepts incoming connections and hands each to its own pipeline task.

use crate::balancer::Shared;
use crate::error::BalancerError;
use crate::frontend::ConnectionInfo;
use crate::proxy::handle_connection;
use crate::util::ConnectionId;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{Instrument, error, info, info_span, instrument, warn};

/// Pending connection queue length.
const LISTEN_BACKLOG: i32 = 1024;

/// Accepts client connections for one balancer.
pub struct FrontendListener {
    /// Balancer internals shared with connection tasks.
    shared: Arc<Shared>,
    /// TCP listener.
    listener: TcpListener,
    /// Bound address.
    local_addr: SocketAddr,
}

impl FrontendListener {
    /// Bind the listening socket.
    pub(crate) fn bind(addr: SocketAddr, shared: Arc<Shared>) -> Result<Self, BalancerError> {
        let bind_error = |source| BalancerError::Bind { addr, source };

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(bind_error)?;
        socket.set_reuse_address(true).map_err(bind_error)?;
        socket.set_nonblocking(true).map_err(bind_error)?;
        socket.bind(&addr.into()).map_err(bind_error)?;
        socket.listen(LISTEN_BACKLOG).map_err(bind_error)?;

        let listener = TcpListener::from_std(socket.into()).map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        info!(listen = %local_addr, "frontend listener bound");

        Ok(Self {
            shared,
            listener,
            local_addr,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run the listener, accepting connections until shutdown.
    #[instrument(skip_all, fields(listen = %self.local_addr))]
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!("frontend listener starting");

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                        }
                    }
                }

                _ = shutdown.recv() => {
                    info!("frontend listener shutting down");
                    break;
                }
            }
        }
    }

    /// Spawn the pipeline for an accepted connection.
    fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "failed to set TCP_NODELAY on client connection");
        }

        let info = ConnectionInfo {
            id: ConnectionId::generate(),
            peer,
            local: self.local_addr,
        };
        let span = info_span!("connection", id = %info.id, client = %peer);
        let shared = Arc::clone(&self.shared);

        tokio::spawn(handle_connection(shared, stream, info).instrument(span));
    }
}

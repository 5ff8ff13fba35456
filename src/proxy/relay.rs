//! Bidirectional relay between client and target.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, instrument};

/// Copy buffer size per direction.
const RELAY_BUFFER_SIZE: usize = 16 * 1024;

/// One end of a relayed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Target,
}

/// Result of a relay.
#[derive(Debug)]
pub struct RelayOutcome {
    /// Bytes sent from client to target.
    pub bytes_to_target: u64,
    /// Bytes sent from target to client.
    pub bytes_to_client: u64,
    /// How the relay ended.
    pub end: RelayEnd,
}

/// Why a relay stopped.
#[derive(Debug)]
pub enum RelayEnd {
    /// This side closed its stream.
    Closed(Side),
    /// I/O on this side failed.
    Failed(Side, io::Error),
}

/// Relay data between two streams until either one closes or fails.
///
/// A close on one side ends both directions; half-close is not forwarded.
/// Streams are dropped when the relay returns.
#[instrument(skip_all)]
pub async fn relay<C, T>(client: C, target: T) -> RelayOutcome
where
    C: AsyncRead + AsyncWrite + Unpin,
    T: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut target_read, mut target_write) = tokio::io::split(target);

    let mut bytes_to_target = 0u64;
    let mut bytes_to_client = 0u64;

    let end = {
        let upstream = pump(
            &mut client_read,
            &mut target_write,
            Side::Client,
            Side::Target,
            &mut bytes_to_target,
        );
        let downstream = pump(
            &mut target_read,
            &mut client_write,
            Side::Target,
            Side::Client,
            &mut bytes_to_client,
        );

        tokio::select! {
            end = upstream => end,
            end = downstream => end,
        }
    };

    let _ = client_write.shutdown().await;
    let _ = target_write.shutdown().await;

    debug!(bytes_to_target, bytes_to_client, end = ?end, "relay finished");

    RelayOutcome {
        bytes_to_target,
        bytes_to_client,
        end,
    }
}

/// Copy `reader` into `writer` until EOF or error, attributing errors to
/// the side they occurred on.
async fn pump<R, W>(reader: &mut R, writer: &mut W, from: Side, to: Side, copied: &mut u64) -> RelayEnd
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => return RelayEnd::Closed(from),
            Ok(n) => n,
            Err(e) => return RelayEnd::Failed(from, e),
        };
        if let Err(e) = writer.write_all(&buf[..n]).await {
            return RelayEnd::Failed(to, e);
        }
        *copied += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_relay_both_directions() {
        let (client, mut client_peer) = duplex(1024);
        let (target, mut target_peer) = duplex(1024);

        let handle = tokio::spawn(relay(client, target));

        client_peer.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        target_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        target_peer.write_all(b"world!").await.unwrap();
        let mut buf = [0u8; 6];
        client_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"world!");

        drop(client_peer);
        let outcome = handle.await.unwrap();
        assert_eq!(outcome.bytes_to_target, 5);
        assert_eq!(outcome.bytes_to_client, 6);
        assert!(matches!(outcome.end, RelayEnd::Closed(Side::Client)));
    }

    #[tokio::test]
    async fn test_target_close_ends_client() {
        let (client, mut client_peer) = duplex(1024);
        let (target, target_peer) = duplex(1024);

        let handle = tokio::spawn(relay(client, target));
        drop(target_peer);

        let outcome = handle.await.unwrap();
        assert!(matches!(outcome.end, RelayEnd::Closed(Side::Target)));

        // The client sees EOF even though it never closed.
        let mut buf = Vec::new();
        client_peer.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_large_payload_preserved() {
        let (client, mut client_peer) = duplex(64 * 1024);
        let (target, mut target_peer) = duplex(64 * 1024);

        let handle = tokio::spawn(relay(client, target));

        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();
        let writer = tokio::spawn(async move {
            client_peer.write_all(&payload).await.unwrap();
            client_peer
        });

        let mut received = vec![0u8; expected.len()];
        target_peer.read_exact(&mut received).await.unwrap();
        assert_eq!(received, expected);

        drop(writer.await.unwrap());
        let outcome = handle.await.unwrap();
        assert_eq!(outcome.bytes_to_target, expected.len() as u64);
    }
}

//! UDP ingest source

use std::io;
use std::net::SocketAddr;

use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{info, trace};

use crate::config::UdpConfig;
use crate::source::DatagramSource;
use crate::{RelayError, Result};

/// Source reading datagrams from a bound UDP socket
///
/// The socket is opened with `SO_REUSEADDR` so a restarted relay can rebind the ingest port
/// while the previous socket lingers. Dropping the source closes the socket.
pub struct UdpSource {
    socket: UdpSocket,
    local_addr: SocketAddr,
    buf: Vec<u8>,
}

impl UdpSource {
    /// Bind the ingest socket
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(config: &UdpConfig) -> Result<Self> {
        let addr = config.bind;
        let bind_err = |source| RelayError::Bind { addr, source };

        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
            .map_err(bind_err)?;
        socket.set_reuse_address(true).map_err(bind_err)?;
        socket.set_nonblocking(true).map_err(bind_err)?;
        socket.bind(&addr.into()).map_err(bind_err)?;

        let socket = UdpSocket::from_std(socket.into()).map_err(bind_err)?;
        let local_addr = socket.local_addr().map_err(bind_err)?;

        info!(%local_addr, buffer = config.recv_buffer_size, "UDP ingest bound");

        Ok(Self { socket, local_addr, buf: vec![0u8; config.recv_buffer_size] })
    }

    /// Address the socket is bound to (resolves port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait::async_trait]
impl DatagramSource for UdpSource {
    async fn next_datagram(&mut self) -> Result<Option<Bytes>> {
        match self.socket.recv_from(&mut self.buf).await {
            Ok((len, from)) => {
                trace!(len, %from, "Datagram received");
                Ok(Some(Bytes::copy_from_slice(&self.buf[..len])))
            }
            Err(e) if socket_is_unusable(&e) => {
                let reason = format!("{} on {}", e.kind(), self.local_addr);
                Err(RelayError::socket_unusable(reason, Some(e)))
            }
            Err(e) => Err(RelayError::TransportReceive { source: e }),
        }
    }

    fn describe(&self) -> String {
        format!("udp://{}", self.local_addr)
    }
}

/// Errors after which the socket will never deliver again
fn socket_is_unusable(err: &io::Error) -> bool {
    // EBADF: descriptor closed underneath the socket
    const EBADF: i32 = 9;
    matches!(err.kind(), io::ErrorKind::NotConnected | io::ErrorKind::BrokenPipe)
        || (cfg!(unix) && err.raw_os_error() == Some(EBADF))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    fn ephemeral() -> UdpConfig {
        UdpConfig { bind: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)), ..Default::default() }
    }

    #[tokio::test]
    async fn receives_whole_datagrams() {
        let mut source = UdpSource::bind(&ephemeral()).unwrap();
        let sender = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();

        sender.send_to(b"first", source.local_addr()).await.unwrap();
        sender.send_to(&[7u8; 1000], source.local_addr()).await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(2), source.next_datagram())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(first.as_ref(), b"first");

        let second = source.next_datagram().await.unwrap().unwrap();
        assert_eq!(second.len(), 1000);
    }

    #[tokio::test]
    async fn port_can_be_rebound_after_drop() {
        let source = UdpSource::bind(&ephemeral()).unwrap();
        let addr = source.local_addr();
        drop(source);

        let rebound = UdpSource::bind(&UdpConfig { bind: addr, ..Default::default() }).unwrap();
        assert_eq!(rebound.local_addr(), addr);
        assert!(rebound.describe().starts_with("udp://127.0.0.1:"));
    }

    #[test]
    fn unusable_kinds_are_classified() {
        assert!(socket_is_unusable(&io::Error::from(io::ErrorKind::NotConnected)));
        assert!(!socket_is_unusable(&io::Error::from(io::ErrorKind::ConnectionRefused)));
        assert!(!socket_is_unusable(&io::Error::from(io::ErrorKind::WouldBlock)));
    }
}

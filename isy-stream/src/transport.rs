//! Socket transport for the event stream.
//!
//! Controllers serve the stream either in plaintext or over TLS with a
//! self-signed certificate, so TLS connections skip hostname and
//! certificate verification.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use native_tls::{Protocol, TlsConnector, TlsStream};

use crate::config::{StreamConfig, TlsVersion};
use crate::error::{Result, StreamError};

/// A byte stream the read loop can drive with bounded waits.
pub trait EventSocket: Read + Write + Send {
    /// Bound blocking reads; `None` blocks indefinitely
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()>;

    /// Close the connection
    fn close(&mut self) -> io::Result<()>;
}

impl EventSocket for TcpStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        TcpStream::set_nonblocking(self, nonblocking)
    }

    fn close(&mut self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}

impl EventSocket for TlsStream<TcpStream> {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.get_ref().set_read_timeout(timeout)
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.get_ref().set_nonblocking(nonblocking)
    }

    fn close(&mut self) -> io::Result<()> {
        // close_notify is best-effort; the TCP shutdown is what matters
        let _ = self.shutdown();
        self.get_ref().shutdown(Shutdown::Both)
    }
}

/// An open event stream connection.
pub struct Connection {
    pub socket: Box<dyn EventSocket>,
    /// Handle on the raw TCP socket, used to wake a blocked reader
    pub interrupt: TcpStream,
    /// DER-encoded controller certificate, for TLS connections
    pub peer_certificate: Option<Vec<u8>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.interrupt.peer_addr().ok())
            .field("tls", &self.peer_certificate.is_some())
            .finish()
    }
}

/// Open a connection to the controller described by `config`.
///
/// The TLS handshake completes in blocking mode before returning.
pub fn connect(config: &StreamConfig) -> Result<Connection> {
    let addr = config.socket_address();
    let tcp = dial(&addr, config.connect_timeout)?;
    tcp.set_nodelay(true)?;
    let interrupt = tcp.try_clone()?;

    match config.tls {
        None => Ok(Connection {
            socket: Box::new(tcp),
            interrupt,
            peer_certificate: None,
        }),
        Some(version) => {
            let connector = tls_connector(version)?;
            let stream = connector
                .connect(&config.address, tcp)
                .map_err(|e| StreamError::Tls(e.to_string()))?;
            let peer_certificate = stream
                .peer_certificate()
                .ok()
                .flatten()
                .and_then(|cert| cert.to_der().ok());
            tracing::debug!(addr = %addr, ?version, "TLS handshake complete");
            Ok(Connection {
                socket: Box::new(stream),
                interrupt,
                peer_certificate,
            })
        }
    }
}

fn dial(addr: &str, timeout: Duration) -> Result<TcpStream> {
    let connect_error = |source: io::Error| StreamError::Connect {
        addr: addr.to_string(),
        source,
    };

    let mut last_error = None;
    for resolved in addr.to_socket_addrs().map_err(connect_error)? {
        match TcpStream::connect_timeout(&resolved, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }

    Err(connect_error(last_error.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "address resolved to nothing")
    })))
}

fn tls_connector(version: TlsVersion) -> Result<TlsConnector> {
    let protocol = match version {
        TlsVersion::Tls1_1 => Protocol::Tlsv11,
        TlsVersion::Tls1_2 => Protocol::Tlsv12,
    };

    TlsConnector::builder()
        .min_protocol_version(Some(protocol))
        .max_protocol_version(Some(protocol))
        .danger_accept_invalid_hostnames(true)
        .danger_accept_invalid_certs(true)
        .build()
        .map_err(|e| StreamError::Tls(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_plain_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let connection = connect(&StreamConfig::new("127.0.0.1", port)).unwrap();
        assert!(connection.peer_certificate.is_none());
        assert!(format!("{connection:?}").contains("tls: false"));
    }

    #[test]
    fn test_connect_refused() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        match connect(&StreamConfig::new("127.0.0.1", port)) {
            Err(StreamError::Connect { addr, .. }) => assert_eq!(addr, format!("127.0.0.1:{port}")),
            other => panic!("Expected connect error, got {other:?}"),
        }
    }

    #[test]
    fn test_tls_connector_builds() {
        assert!(tls_connector(TlsVersion::Tls1_2).is_ok());
    }
}

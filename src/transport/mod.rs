//! Transport Layer
//!
//! Establishes client byte streams (plain TCP or TLS) for the MQTT sessions.

mod tls;

pub use tls::{client_config, TlsError};

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::ClientConfig;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::remote::ChannelError;

/// A bidirectional byte stream usable by the MQTT session
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ByteStream for T {}

/// Boxed stream returned by [`connect`]
pub type BoxedStream = Box<dyn ByteStream>;

/// How to reach a remote endpoint
#[derive(Clone)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// TLS client configuration; `None` for plain TCP
    pub tls: Option<Arc<ClientConfig>>,
    pub connect_timeout: Duration,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls.is_some())
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Open a stream to the endpoint, wrapping it in TLS when configured
pub async fn connect(endpoint: &Endpoint) -> Result<BoxedStream, ChannelError> {
    let addr = format!("{}:{}", endpoint.host, endpoint.port);
    let stream = timeout(endpoint.connect_timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| ChannelError::Timeout)?
        .map_err(|e| ChannelError::ConnectionLost(e.to_string()))?;
    stream
        .set_nodelay(true)
        .map_err(|e| ChannelError::ConnectionLost(e.to_string()))?;

    debug!("TCP connected to {}", addr);

    let Some(tls) = &endpoint.tls else {
        return Ok(Box::new(stream));
    };

    let server_name = ServerName::try_from(endpoint.host.clone())
        .map_err(|e| ChannelError::InvalidConfig(format!("invalid server name: {}", e)))?;
    let connector = TlsConnector::from(tls.clone());
    let stream = timeout(endpoint.connect_timeout, connector.connect(server_name, stream))
        .await
        .map_err(|_| ChannelError::Timeout)?
        .map_err(|e| ChannelError::ConnectionLost(format!("TLS handshake failed: {}", e)))?;

    debug!("TLS established with {}", addr);
    Ok(Box::new(stream))
}

/// Split `host:port`, falling back to `default_port`
pub fn parse_address(address: &str, default_port: u16) -> (String, u16) {
    if let Some((host, port_str)) = address.rsplit_once(':') {
        if let Ok(port) = port_str.parse::<u16>() {
            return (host.to_string(), port);
        }
    }
    (address.to_string(), default_port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address_with_port() {
        assert_eq!(
            parse_address("broker.local:1884", 1883),
            ("broker.local".to_string(), 1884)
        );
    }

    #[test]
    fn test_parse_address_without_port() {
        assert_eq!(
            parse_address("hub.azure-devices.net", 8883),
            ("hub.azure-devices.net".to_string(), 8883)
        );
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_lost() {
        // Bind then drop to get a port nothing listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let endpoint = Endpoint {
            host: "127.0.0.1".to_string(),
            port,
            tls: None,
            connect_timeout: Duration::from_secs(2),
        };
        match connect(&endpoint).await {
            Err(e) => assert!(e.is_connection_lost()),
            Ok(_) => panic!("connect should fail"),
        }
    }
}

//! WebSocket transport for the live request-log feed

use super::connection::{LiveConnection, Transport, TransportError};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Url;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Build the subscription URL: `http` becomes `ws`, `https` becomes `wss`
pub fn live_url(server_url: &str, path: &str) -> Result<Url, TransportError> {
    let base = Url::parse(server_url)
        .map_err(|e| TransportError::InvalidEndpoint(format!("{}: {}", server_url, e)))?;
    let mut url = base
        .join(path)
        .map_err(|e| TransportError::InvalidEndpoint(format!("{}: {}", path, e)))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TransportError::InvalidEndpoint(format!(
                "unsupported scheme: {}",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| TransportError::InvalidEndpoint(url.to_string()))?;

    Ok(url)
}

/// Connects to the same URL on every attempt
#[derive(Debug, Clone)]
pub struct WsTransport {
    url: Url,
    authorization: Option<String>,
}

impl WsTransport {
    pub fn new(server_url: &str, path: &str, authorization: Option<String>) -> Result<Self, TransportError> {
        Ok(Self {
            url: live_url(server_url, path)?,
            authorization,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&mut self) -> Result<Box<dyn LiveConnection>, TransportError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::InvalidEndpoint(e.to_string()))?;

        // Credential travels as a cookie, like a browser session would carry it
        if let Some(token) = &self.authorization {
            let cookie = HeaderValue::from_str(&format!("Authorization={}", token))
                .map_err(|e| TransportError::InvalidEndpoint(e.to_string()))?;
            request.headers_mut().insert(COOKIE, cookie);
        }

        log::info!("🔗 Connecting to {}", self.url);
        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        Ok(Box::new(WsConnection { stream }))
    }
}

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl LiveConnection for WsConnection {
    async fn next_message(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(TransportError::Receive(e.to_string()))),
            };

            match message {
                Message::Text(text) => return Some(Ok(text.to_string())),
                Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => {
                        log::warn!("⚠️  Ignoring non-UTF-8 binary frame ({} bytes)", bytes.len());
                    }
                },
                Message::Close(frame) => {
                    log::debug!("Close frame received: {:?}", frame);
                    return None;
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            log::debug!("WebSocket close: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_url_schemes() {
        let url = live_url("http://localhost:8080", "/api/ws/").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8080/api/ws/");

        let url = live_url("https://logs.example.com/", "/api/ws/").unwrap();
        assert_eq!(url.as_str(), "wss://logs.example.com/api/ws/");
    }

    #[test]
    fn test_live_url_rejects_bad_input() {
        assert!(live_url("not a url", "/api/ws/").is_err());
        assert!(matches!(
            live_url("ftp://host", "/api/ws/"),
            Err(TransportError::InvalidEndpoint(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_refused_is_transport_error() {
        // Port 9 (discard) on loopback is not expected to accept WebSocket upgrades
        let mut transport = WsTransport::new("http://127.0.0.1:9", "/api/ws/", None).unwrap();
        assert!(matches!(
            transport.connect().await,
            Err(TransportError::Connect(_))
        ));
    }
}

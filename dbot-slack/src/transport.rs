//! Websocket transport.
//!
//! A [`Transport`] runs one streaming session and talks to the connection manager only through
//! channels: it reports [`TransportEvent`]s in wire order and writes the [`Frame`]s it is handed.
//! [`WebSocketTransport`] is the tokio-tungstenite implementation, with keepalive pings and
//! optional HTTP CONNECT proxying.

use std::time::Duration;

use async_trait::async_trait;
use dbot_core::{CloseEvent, DbotError, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::TransportOptions;

/// Keepalive ping interval; fixed by the protocol contract.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Close code reported when the connection ends without a close frame.
const ABNORMAL_CLOSE: u16 = 1006;
/// Close code reported when the peer sends a close frame without a code.
const NO_STATUS_CLOSE: u16 = 1005;
const MAX_PROXY_RESPONSE: usize = 8 * 1024;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Message(String),
    Close(CloseEvent),
    Error(String),
}

/// Frames the connection manager asks the transport to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close,
}

/// Everything needed to open a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    pub url: String,
    pub ping_interval: Duration,
    pub proxy: Option<String>,
    pub headers: Vec<(String, String)>,
    pub connect_timeout: Option<Duration>,
}

impl OpenRequest {
    /// Merges caller options with the session proxy; the session proxy wins when both are set.
    pub fn new(url: impl Into<String>, options: &TransportOptions, proxy: Option<&str>) -> Self {
        Self {
            url: url.into(),
            ping_interval: KEEPALIVE_INTERVAL,
            proxy: proxy.map(str::to_string).or_else(|| options.proxy.clone()),
            headers: options.headers.clone(),
            connect_timeout: options.connect_timeout,
        }
    }
}

/// Channel ends handed to a transport for one session.
#[derive(Debug)]
pub struct TransportLink {
    pub events: mpsc::UnboundedSender<TransportEvent>,
    pub frames: mpsc::UnboundedReceiver<Frame>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Runs one session until it ends.
    ///
    /// Implementations report `Open` once the handshake completes, `Message` per inbound text
    /// frame in arrival order, `Error` for faults, and exactly one `Close` before returning,
    /// also when the handshake fails.
    async fn open(&self, request: OpenRequest, link: TransportLink);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, request: OpenRequest, link: TransportLink) {
        let TransportLink { events, mut frames } = link;

        let stream = match connect(&request).await {
            Ok(stream) => stream,
            Err(e) => {
                let _ = events.send(TransportEvent::Error(e.to_string()));
                let _ = events.send(TransportEvent::Close(CloseEvent::new(
                    ABNORMAL_CLOSE,
                    e.to_string(),
                )));
                return;
            }
        };
        let _ = events.send(TransportEvent::Open);

        let (mut sink, mut stream) = stream.split();
        let mut ping = tokio::time::interval_at(
            tokio::time::Instant::now() + request.ping_interval,
            request.ping_interval,
        );
        let mut closing = false;

        let close = loop {
            tokio::select! {
                frame = frames.recv(), if !closing => match frame {
                    Some(Frame::Text(text)) => {
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            let _ = events.send(TransportEvent::Error(e.to_string()));
                            break CloseEvent::new(ABNORMAL_CLOSE, e.to_string());
                        }
                    }
                    Some(Frame::Close) | None => {
                        closing = true;
                        let frame = CloseFrame {
                            code: CloseCode::Normal,
                            reason: "".into(),
                        };
                        if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                            let _ = events.send(TransportEvent::Error(e.to_string()));
                            break CloseEvent::new(ABNORMAL_CLOSE, e.to_string());
                        }
                    }
                },
                _ = ping.tick(), if !closing => {
                    if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                        let _ = events.send(TransportEvent::Error(e.to_string()));
                        break CloseEvent::new(ABNORMAL_CLOSE, e.to_string());
                    }
                }
                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        let _ = events.send(TransportEvent::Message(text));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break frame
                            .map(|f| CloseEvent::new(u16::from(f.code), f.reason.into_owned()))
                            .unwrap_or_else(|| CloseEvent::new(NO_STATUS_CLOSE, ""));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let _ = events.send(TransportEvent::Error(e.to_string()));
                        break CloseEvent::new(ABNORMAL_CLOSE, e.to_string());
                    }
                    None => break CloseEvent::new(ABNORMAL_CLOSE, "connection dropped"),
                },
            }
        };

        // Flushes the close reply tungstenite queues after a peer-initiated close.
        let _ = sink.close().await;
        let _ = events.send(TransportEvent::Close(close));
    }
}

async fn connect(request: &OpenRequest) -> Result<WsStream> {
    let mut ws_request = request
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| DbotError::Transport(format!("invalid websocket URL {}: {}", request.url, e)))?;
    for (name, value) in &request.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| DbotError::Transport(format!("invalid header name {}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| DbotError::Transport(format!("invalid header value: {}", e)))?;
        ws_request.headers_mut().insert(name, value);
    }

    match request.connect_timeout {
        Some(limit) => tokio::time::timeout(limit, handshake(request, ws_request))
            .await
            .map_err(|_| {
                DbotError::Transport(format!("websocket connect timed out after {:?}", limit))
            })?,
        None => handshake(request, ws_request).await,
    }
}

async fn handshake(
    request: &OpenRequest,
    ws_request: tokio_tungstenite::tungstenite::handshake::client::Request,
) -> Result<WsStream> {
    let Some(proxy) = request.proxy.as_deref() else {
        debug!(url = %request.url, "websocket: connecting");
        return tokio_tungstenite::connect_async(ws_request)
            .await
            .map(|(stream, _)| stream)
            .map_err(|e| DbotError::Transport(format!("websocket connect failed: {}", e)));
    };

    let target = reqwest::Url::parse(&request.url)
        .map_err(|e| DbotError::Transport(format!("invalid websocket URL: {}", e)))?;
    let host = target
        .host_str()
        .ok_or_else(|| DbotError::Transport("websocket URL has no host".to_string()))?;
    let port = target.port_or_known_default().unwrap_or(443);
    info!(proxy = %proxy, host = %host, port, "websocket: connecting through proxy");
    let tunnel = connect_via_proxy(proxy, host, port).await?;
    tokio_tungstenite::client_async_tls(ws_request, tunnel)
        .await
        .map(|(stream, _)| stream)
        .map_err(|e| DbotError::Transport(format!("websocket connect failed: {}", e)))
}

/// Opens a TCP tunnel to `host:port` through an HTTP proxy using `CONNECT`.
async fn connect_via_proxy(proxy: &str, host: &str, port: u16) -> Result<TcpStream> {
    let proxy_url = reqwest::Url::parse(proxy)
        .map_err(|e| DbotError::Transport(format!("invalid proxy URL {}: {}", proxy, e)))?;
    let proxy_host = proxy_url
        .host_str()
        .ok_or_else(|| DbotError::Transport(format!("proxy URL has no host: {}", proxy)))?;
    let proxy_port = proxy_url.port_or_known_default().unwrap_or(8080);

    let mut stream = TcpStream::connect((proxy_host, proxy_port)).await?;
    let connect = format!(
        "CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n\r\n",
        host = host,
        port = port
    );
    stream.write_all(connect.as_bytes()).await?;

    // Byte-at-a-time so nothing past the header block is consumed from the tunnel.
    let mut response = Vec::with_capacity(128);
    let mut byte = [0u8; 1];
    while !response.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte).await? == 0 {
            return Err(DbotError::Transport(
                "proxy closed the connection during CONNECT".to_string(),
            ));
        }
        response.push(byte[0]);
        if response.len() > MAX_PROXY_RESPONSE {
            return Err(DbotError::Transport("proxy response too large".to_string()));
        }
    }
    check_connect_response(&response)?;
    Ok(stream)
}

fn check_connect_response(response: &[u8]) -> Result<()> {
    let text = String::from_utf8_lossy(response);
    let status_line = text.lines().next().unwrap_or_default();
    match status_line.split_whitespace().nth(1) {
        Some(code) if code.starts_with('2') => Ok(()),
        _ => {
            warn!(status = %status_line, "proxy refused CONNECT");
            Err(DbotError::Transport(format!(
                "proxy refused CONNECT: {}",
                status_line
            )))
        }
    }
}

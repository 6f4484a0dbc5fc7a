//! Detection unit transports.
//!
//! Byte and frame plumbing only. Everything is forwarded to the control loop as
//! [`DetectionInput`]; parsing, caching and the watchdog live in
//! `skyguard_core::detection`.
//!
//! - [`DetectionServer`]: the unit connects to us. One client at a time; a new
//!   connection aborts the previous reader before its own reader starts, and
//!   every message carries the connection id so the control loop can drop
//!   anything still in flight from the old one.
//! - [`SocketIoTransport`]: we connect to the unit's Socket.IO endpoint over a
//!   WebSocket when the control loop asks for it.

use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use futures::{SinkExt, StreamExt};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_graceful_shutdown::SubsystemHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::error::StationError;

const READ_BUFFER: usize = 8192;

/// Transport output consumed by the control loop
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionInput {
    TcpConnected { conn: u64, peer: SocketAddr },
    TcpData { conn: u64, data: Vec<u8> },
    TcpClosed { conn: u64 },
    WsOpened,
    WsText(String),
    WsClosed(String),
}

/// Requests from the control loop to the WebSocket task
#[derive(Debug, Clone, PartialEq)]
pub enum WsCommand {
    Connect(String),
    Send(String),
    Close,
}

// =============================================================================
// TCP server variant
// =============================================================================

pub struct DetectionServer {
    port: u16,
    input_tx: mpsc::Sender<DetectionInput>,
}

impl DetectionServer {
    pub fn new(port: u16, input_tx: mpsc::Sender<DetectionInput>) -> Self {
        Self { port, input_tx }
    }

    pub async fn run(self, subsys: SubsystemHandle) -> Result<(), StationError> {
        let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| StationError::DetectionBind(self.port, e))?;
        log::info!("[detection] Listening on {}", addr);

        self.serve(listener, subsys.on_shutdown_requested()).await
    }

    /// Accept loop; returns when `shutdown` resolves or the control loop is gone.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), StationError> {
        tokio::pin!(shutdown);
        let mut current: Option<JoinHandle<()>> = None;
        let mut next_conn: u64 = 0;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::debug!("[detection] Shutdown requested");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(a) => a,
                        Err(e) => {
                            log::warn!("[detection] Accept failed: {}", e);
                            continue;
                        }
                    };
                    if let Some(previous) = current.take() {
                        log::warn!("[detection] {} replaces the previous client", peer);
                        previous.abort();
                    }
                    next_conn += 1;
                    let conn = next_conn;
                    if self.input_tx.send(DetectionInput::TcpConnected { conn, peer }).await.is_err() {
                        break;
                    }
                    current = Some(tokio::spawn(read_client(conn, stream, self.input_tx.clone())));
                }
            }
        }

        if let Some(reader) = current.take() {
            reader.abort();
        }
        Ok(())
    }
}

async fn read_client(conn: u64, mut stream: TcpStream, tx: mpsc::Sender<DetectionInput>) {
    let mut buf = vec![0u8; READ_BUFFER];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let data = buf[..n].to_vec();
                if tx.send(DetectionInput::TcpData { conn, data }).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                log::debug!("[detection] Read from client {} failed: {}", conn, e);
                break;
            }
        }
    }
    let _ = tx.send(DetectionInput::TcpClosed { conn }).await;
}

// =============================================================================
// Socket.IO variant
// =============================================================================

pub struct SocketIoTransport {
    input_tx: mpsc::Sender<DetectionInput>,
    command_rx: mpsc::Receiver<WsCommand>,
}

impl SocketIoTransport {
    pub fn new(input_tx: mpsc::Sender<DetectionInput>, command_rx: mpsc::Receiver<WsCommand>) -> Self {
        Self {
            input_tx,
            command_rx,
        }
    }

    pub async fn run(mut self, subsys: SubsystemHandle) -> Result<(), StationError> {
        loop {
            tokio::select! {
                _ = subsys.on_shutdown_requested() => return Ok(()),
                command = self.command_rx.recv() => match command {
                    None => return Ok(()),
                    Some(WsCommand::Connect(url)) => {
                        let Some(reason) = self.session(&url, &subsys).await else {
                            return Ok(());
                        };
                        if self.input_tx.send(DetectionInput::WsClosed(reason)).await.is_err() {
                            return Ok(());
                        }
                    }
                    Some(other) => {
                        log::debug!("[socketio] Not connected, dropping {:?}", other);
                    }
                },
            }
        }
    }

    /// One connection lifetime. Returns the close reason, or `None` on shutdown.
    async fn session(&mut self, url: &str, subsys: &SubsystemHandle) -> Option<String> {
        log::info!("[socketio] Connecting to {}", url);
        let mut ws = match tokio_tungstenite::connect_async(url).await {
            Ok((ws, _response)) => ws,
            Err(e) => return Some(format!("connect failed: {}", e)),
        };
        if self.input_tx.send(DetectionInput::WsOpened).await.is_err() {
            return None;
        }

        loop {
            tokio::select! {
                _ = subsys.on_shutdown_requested() => {
                    let _ = ws.close(None).await;
                    return None;
                }
                message = ws.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        let text = text.as_str().to_owned();
                        if self.input_tx.send(DetectionInput::WsText(text)).await.is_err() {
                            return None;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return Some(match frame {
                            Some(f) if !f.reason.is_empty() => f.reason.as_str().to_owned(),
                            _ => "closed by server".to_string(),
                        });
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Some(e.to_string()),
                    None => return Some("stream ended".to_string()),
                },
                command = self.command_rx.recv() => match command {
                    Some(WsCommand::Send(text)) => {
                        if let Err(e) = ws.send(Message::Text(text.into())).await {
                            return Some(format!("send failed: {}", e));
                        }
                    }
                    Some(WsCommand::Connect(_)) => {
                        log::debug!("[socketio] Already connected");
                    }
                    Some(WsCommand::Close) | None => {
                        let _ = ws.close(None).await;
                        return Some("closed locally".to_string());
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    async fn next(rx: &mut mpsc::Receiver<DetectionInput>) -> DetectionInput {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("input within timeout")
            .expect("channel open")
    }

    #[tokio::test]
    async fn test_server_forwards_bytes_and_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(DetectionServer::new(0, tx).serve(listener, async {
            let _ = stop_rx.await;
        }));

        let mut client = TcpStream::connect(addr).await.unwrap();
        assert!(matches!(next(&mut rx).await, DetectionInput::TcpConnected { conn: 1, .. }));

        client.write_all(br#"{"station_pos":{"lat":34.2,"lng":108.8}}"#).await.unwrap();
        let mut data = Vec::new();
        while data.len() < 40 {
            match next(&mut rx).await {
                DetectionInput::TcpData { conn: 1, data: chunk } => data.extend(chunk),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(data, br#"{"station_pos":{"lat":34.2,"lng":108.8}}"#.to_vec());

        drop(client);
        assert_eq!(next(&mut rx).await, DetectionInput::TcpClosed { conn: 1 });

        let _ = stop_tx.send(());
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_new_client_preempts_old() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(DetectionServer::new(0, tx).serve(listener, async {
            let _ = stop_rx.await;
        }));

        let _first = TcpStream::connect(addr).await.unwrap();
        assert!(matches!(next(&mut rx).await, DetectionInput::TcpConnected { conn: 1, .. }));
        let mut second = TcpStream::connect(addr).await.unwrap();
        assert!(matches!(next(&mut rx).await, DetectionInput::TcpConnected { conn: 2, .. }));

        second.write_all(b"{}").await.unwrap();
        // The first reader was aborted, so nothing from conn 1 follows
        assert_eq!(
            next(&mut rx).await,
            DetectionInput::TcpData {
                conn: 2,
                data: b"{}".to_vec()
            }
        );

        let _ = stop_tx.send(());
        server.await.unwrap().unwrap();
    }
}

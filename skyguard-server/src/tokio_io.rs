//! Tokio implementation of IoProvider for the native server.
//!
//! This module provides `TokioIoProvider` which implements `skyguard_core::IoProvider`
//! on top of tokio sockets in a poll-based interface.
//!
//! UDP and connected TCP sockets are used through `try_send_to`/`try_read` and
//! friends. Operations that have to wait (TCP connect, HTTP POST) run as spawned
//! tasks; their results are picked up by the next `tcp_poll_connect` or
//! `http_poll` call. All of it must be called from inside a tokio runtime.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{SocketAddr, SocketAddrV4};
use std::time::{Duration, Instant};

use skyguard_core::io::{
    ConnectProgress, HttpCompletion, HttpRequestHandle, IoError, IoProvider, TcpSocketHandle,
    UdpSocketHandle,
};
use tokio::net::{TcpStream, UdpSocket};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use crate::network;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Internal state for a UDP socket
enum UdpSocketState {
    /// Created but not bound yet
    Unbound,
    Bound(UdpSocket),
}

/// Internal state for a TCP socket
enum TcpSocketState {
    Idle,
    Connecting(oneshot::Receiver<std::io::Result<TcpStream>>),
    Connected { stream: TcpStream, valid: bool },
    Failed,
}

/// Tokio implementation of IoProvider for the native server.
///
/// # Usage
///
/// ```rust,ignore
/// use skyguard_core::{DecisionEngine, StationConfig};
/// use skyguard_server::tokio_io::TokioIoProvider;
///
/// let mut io = TokioIoProvider::new();
/// let mut engine = DecisionEngine::new(StationConfig::simulation());
/// engine.start(&mut io, "2026-10-19 08:30:00");
///
/// // In your main loop:
/// let events = engine.poll(&mut io);
/// ```
pub struct TokioIoProvider {
    /// Next socket/request handle ID
    next_handle: i32,
    udp_sockets: HashMap<i32, UdpSocketState>,
    tcp_sockets: HashMap<i32, TcpSocketState>,
    http_client: reqwest::Client,
    http_tx: mpsc::UnboundedSender<HttpCompletion>,
    http_rx: mpsc::UnboundedReceiver<HttpCompletion>,
    /// Start time for current_time_ms calculation
    start_time: Instant,
}

impl TokioIoProvider {
    pub fn new() -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                log::warn!("HTTP client without timeout: {}", e);
                reqwest::Client::new()
            });
        let (http_tx, http_rx) = mpsc::unbounded_channel();
        Self {
            next_handle: 1,
            udp_sockets: HashMap::new(),
            tcp_sockets: HashMap::new(),
            http_client,
            http_tx,
            http_rx,
            start_time: Instant::now(),
        }
    }

    /// Local port of a bound UDP socket.
    pub fn udp_local_port(&self, socket: &UdpSocketHandle) -> Option<u16> {
        match self.udp_sockets.get(&socket.0)? {
            UdpSocketState::Bound(s) => s.local_addr().ok().map(|a| a.port()),
            UdpSocketState::Unbound => None,
        }
    }

    fn alloc_handle(&mut self) -> i32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }
}

impl Default for TokioIoProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn runtime() -> Result<Handle, IoError> {
    Handle::try_current().map_err(|e| IoError::new(-1, format!("No tokio runtime: {}", e)))
}

fn bind_udp(port: u16) -> Result<UdpSocket, IoError> {
    network::create_udp_bound(port)
        .map_err(|e| IoError::new(-1, format!("Failed to bind to port {}: {}", port, e)))
}

impl IoProvider for TokioIoProvider {
    // -------------------------------------------------------------------------
    // UDP Operations
    // -------------------------------------------------------------------------

    fn udp_create(&mut self) -> Result<UdpSocketHandle, IoError> {
        let handle = self.alloc_handle();
        self.udp_sockets.insert(handle, UdpSocketState::Unbound);
        Ok(UdpSocketHandle(handle))
    }

    fn udp_bind(&mut self, socket: &UdpSocketHandle, port: u16) -> Result<(), IoError> {
        let state = self
            .udp_sockets
            .get_mut(&socket.0)
            .ok_or_else(IoError::invalid_handle)?;

        if let UdpSocketState::Bound(existing) = state {
            if let Ok(addr) = existing.local_addr() {
                if addr.port() == port {
                    return Ok(());
                }
            }
        }

        // socket2 must bind before converting to tokio, so rebinding means a new socket
        *state = UdpSocketState::Bound(bind_udp(port)?);
        Ok(())
    }

    fn udp_send_to(
        &mut self,
        socket: &UdpSocketHandle,
        data: &[u8],
        addr: SocketAddrV4,
    ) -> Result<usize, IoError> {
        let state = self
            .udp_sockets
            .get_mut(&socket.0)
            .ok_or_else(IoError::invalid_handle)?;

        if let UdpSocketState::Unbound = state {
            *state = UdpSocketState::Bound(bind_udp(0)?);
        }
        let UdpSocketState::Bound(udp) = state else {
            return Err(IoError::invalid_handle());
        };

        udp.try_send_to(data, SocketAddr::V4(addr))
            .map_err(|e| match e.kind() {
                ErrorKind::WouldBlock => IoError::would_block(),
                _ => IoError::new(-1, format!("Send to {} failed: {}", addr, e)),
            })
    }

    fn udp_recv_from(
        &mut self,
        socket: &UdpSocketHandle,
        buf: &mut [u8],
    ) -> Option<(usize, SocketAddrV4)> {
        let UdpSocketState::Bound(udp) = self.udp_sockets.get(&socket.0)? else {
            return None;
        };

        loop {
            match udp.try_recv_from(buf) {
                Ok((len, SocketAddr::V4(from))) => return Some((len, from)),
                Ok((_, SocketAddr::V6(from))) => {
                    log::trace!("Ignoring IPv6 datagram from {}", from);
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => return None,
                Err(e) => {
                    log::debug!("udp_recv_from: {}", e);
                    return None;
                }
            }
        }
    }

    fn udp_close(&mut self, socket: UdpSocketHandle) {
        self.udp_sockets.remove(&socket.0);
    }

    // -------------------------------------------------------------------------
    // TCP Operations
    // -------------------------------------------------------------------------

    fn tcp_create(&mut self) -> Result<TcpSocketHandle, IoError> {
        let handle = self.alloc_handle();
        self.tcp_sockets.insert(handle, TcpSocketState::Idle);
        Ok(TcpSocketHandle(handle))
    }

    fn tcp_connect(&mut self, socket: &TcpSocketHandle, addr: SocketAddrV4) -> Result<(), IoError> {
        let rt = runtime()?;
        let state = self
            .tcp_sockets
            .get_mut(&socket.0)
            .ok_or_else(IoError::invalid_handle)?;

        let (tx, rx) = oneshot::channel();
        rt.spawn(async move {
            let result = match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await
            {
                Ok(result) => result,
                Err(_) => Err(std::io::Error::new(
                    ErrorKind::TimedOut,
                    format!("no answer within {:?}", CONNECT_TIMEOUT),
                )),
            };
            let _ = tx.send(result);
        });

        *state = TcpSocketState::Connecting(rx);
        Ok(())
    }

    fn tcp_poll_connect(&mut self, socket: &TcpSocketHandle) -> ConnectProgress {
        let Some(state) = self.tcp_sockets.get_mut(&socket.0) else {
            return ConnectProgress::Failed(IoError::invalid_handle());
        };
        let TcpSocketState::Connecting(rx) = state else {
            return match state {
                TcpSocketState::Connected { valid: true, .. } => ConnectProgress::Connected,
                _ => ConnectProgress::Failed(IoError::not_connected()),
            };
        };

        match rx.try_recv() {
            Ok(Ok(stream)) => {
                let _ = stream.set_nodelay(true);
                *state = TcpSocketState::Connected {
                    stream,
                    valid: true,
                };
                ConnectProgress::Connected
            }
            Ok(Err(e)) => {
                *state = TcpSocketState::Failed;
                ConnectProgress::Failed(IoError::new(-1, format!("Connect failed: {}", e)))
            }
            Err(oneshot::error::TryRecvError::Empty) => ConnectProgress::Pending,
            Err(oneshot::error::TryRecvError::Closed) => {
                *state = TcpSocketState::Failed;
                ConnectProgress::Failed(IoError::new(-1, "Connect task ended"))
            }
        }
    }

    fn tcp_is_connected(&self, socket: &TcpSocketHandle) -> bool {
        matches!(
            self.tcp_sockets.get(&socket.0),
            Some(TcpSocketState::Connected { valid: true, .. })
        )
    }

    fn tcp_is_valid(&self, socket: &TcpSocketHandle) -> bool {
        match self.tcp_sockets.get(&socket.0) {
            Some(TcpSocketState::Connected { valid, .. }) => *valid,
            Some(TcpSocketState::Idle) | Some(TcpSocketState::Connecting(_)) => true,
            Some(TcpSocketState::Failed) | None => false,
        }
    }

    fn tcp_send(&mut self, socket: &TcpSocketHandle, data: &[u8]) -> Result<usize, IoError> {
        let state = self
            .tcp_sockets
            .get_mut(&socket.0)
            .ok_or_else(IoError::invalid_handle)?;

        let TcpSocketState::Connected { stream, valid } = state else {
            return Err(IoError::not_connected());
        };
        if !*valid {
            return Err(IoError::not_connected());
        }

        // Whole frame or nothing; a torn frame invalidates the link
        let mut written = 0;
        while written < data.len() {
            match stream.try_write(&data[written..]) {
                Ok(0) => {
                    *valid = false;
                    return Err(IoError::new(-1, "Write returned 0 bytes"));
                }
                Ok(n) => written += n,
                Err(ref e) if e.kind() == ErrorKind::WouldBlock && written == 0 => {
                    return Err(IoError::would_block());
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                    *valid = false;
                    return Err(IoError::new(
                        -1,
                        format!("Partial write, {} of {} bytes", written, data.len()),
                    ));
                }
                Err(e) => {
                    *valid = false;
                    return Err(IoError::new(-1, format!("Write failed: {}", e)));
                }
            }
        }
        Ok(written)
    }

    fn tcp_recv_raw(&mut self, socket: &TcpSocketHandle, buf: &mut [u8]) -> Option<usize> {
        let TcpSocketState::Connected { stream, valid } = self.tcp_sockets.get_mut(&socket.0)?
        else {
            return None;
        };
        if !*valid {
            return None;
        }

        match stream.try_read(buf) {
            Ok(0) => {
                log::debug!("tcp_recv_raw: EOF");
                *valid = false;
                None
            }
            Ok(n) => Some(n),
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => None,
            Err(e) => {
                log::debug!("tcp_recv_raw: error: {}", e);
                *valid = false;
                None
            }
        }
    }

    fn tcp_close(&mut self, socket: TcpSocketHandle) {
        self.tcp_sockets.remove(&socket.0);
    }

    // -------------------------------------------------------------------------
    // HTTP Operations
    // -------------------------------------------------------------------------

    fn http_post_json(&mut self, url: &str, body: &[u8]) -> Result<HttpRequestHandle, IoError> {
        let rt = runtime()?;
        let handle = HttpRequestHandle(self.alloc_handle());
        let request = self
            .http_client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_vec());
        let tx = self.http_tx.clone();

        rt.spawn(async move {
            let done = match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    HttpCompletion {
                        request: handle,
                        status: Some(status.as_u16()),
                        body,
                        error: if status.is_success() {
                            None
                        } else {
                            Some(format!("HTTP {}", status))
                        },
                    }
                }
                Err(e) => HttpCompletion {
                    request: handle,
                    status: e.status().map(|s| s.as_u16()),
                    body: String::new(),
                    error: Some(e.to_string()),
                },
            };
            let _ = tx.send(done);
        });

        Ok(handle)
    }

    fn http_poll(&mut self) -> Option<HttpCompletion> {
        self.http_rx.try_recv().ok()
    }

    // -------------------------------------------------------------------------
    // Utility
    // -------------------------------------------------------------------------

    fn current_time_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    fn debug(&self, msg: &str) {
        log::debug!("{}", msg);
    }

    fn info(&self, msg: &str) {
        log::info!("{}", msg);
    }

    fn warn(&self, msg: &str) {
        log::warn!("{}", msg);
    }

    fn error(&self, msg: &str) {
        log::error!("{}", msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio_test::assert_ok;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[test]
    fn test_current_time_ms() {
        let io = TokioIoProvider::new();
        let time1 = io.current_time_ms();
        std::thread::sleep(Duration::from_millis(10));
        let time2 = io.current_time_ms();
        assert!(time2 >= time1 + 10);
    }

    #[test]
    fn test_handle_allocation() {
        let mut io = TokioIoProvider::new();
        let h1 = io.alloc_handle();
        let h2 = io.alloc_handle();
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_connect_needs_runtime() {
        let mut io = TokioIoProvider::new();
        let socket = assert_ok!(io.tcp_create());
        let target = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 2000);
        assert!(io.tcp_connect(&socket, target).is_err());
    }

    #[tokio::test]
    async fn test_udp_loopback() {
        let mut io = TokioIoProvider::new();
        let a = assert_ok!(io.udp_create());
        let b = assert_ok!(io.udp_create());
        assert_ok!(io.udp_bind(&b, 0));
        let port = io.udp_local_port(&b).unwrap();

        // Unbound sockets bind an ephemeral port on first send
        let sent = assert_ok!(io.udp_send_to(
            &a,
            b"FF0027605{}",
            SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)
        ));
        assert_eq!(sent, 11);

        let mut buf = [0u8; 64];
        let mut received = None;
        for _ in 0..50 {
            settle().await;
            if let Some(r) = io.udp_recv_from(&b, &mut buf) {
                received = Some(r);
                break;
            }
        }
        let (len, from) = received.expect("datagram");
        assert_eq!(&buf[..len], b"FF0027605{}");
        assert_eq!(*from.ip(), Ipv4Addr::LOCALHOST);
        assert!(io.udp_recv_from(&b, &mut buf).is_none());
    }

    #[tokio::test]
    async fn test_tcp_connect_send_and_peer_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut io = TokioIoProvider::new();
        let socket = io.tcp_create().unwrap();
        assert_ok!(io.tcp_connect(&socket, SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)));

        let (mut peer, _) = listener.accept().await.unwrap();
        let mut progress = io.tcp_poll_connect(&socket);
        for _ in 0..50 {
            if progress != ConnectProgress::Pending {
                break;
            }
            settle().await;
            progress = io.tcp_poll_connect(&socket);
        }
        assert_eq!(progress, ConnectProgress::Connected);
        assert!(io.tcp_is_connected(&socket));

        assert_ok!(io.tcp_send(&socket, &[0xFE, 0x05]));
        let mut buf = [0u8; 2];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0xFE, 0x05]);

        peer.write_all(b"ok").await.unwrap();
        drop(peer);
        let mut buf = [0u8; 16];
        let mut got = Vec::new();
        for _ in 0..50 {
            settle().await;
            while let Some(n) = io.tcp_recv_raw(&socket, &mut buf) {
                got.extend_from_slice(&buf[..n]);
            }
            if !io.tcp_is_valid(&socket) {
                break;
            }
        }
        assert_eq!(got, b"ok");
        assert!(!io.tcp_is_valid(&socket));
        assert!(io.tcp_send(&socket, &[0]).is_err());
    }

    #[tokio::test]
    async fn test_tcp_send_is_all_or_nothing() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut io = TokioIoProvider::new();
        let socket = io.tcp_create().unwrap();
        assert_ok!(io.tcp_connect(&socket, SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)));
        // The peer never reads, so the send buffer fills up
        let (_peer, _) = listener.accept().await.unwrap();
        for _ in 0..50 {
            if io.tcp_poll_connect(&socket) != ConnectProgress::Pending {
                break;
            }
            settle().await;
        }
        assert!(io.tcp_is_connected(&socket));

        let chunk = vec![0xA5u8; 4096];
        let mut outcome = None;
        for _ in 0..100_000 {
            match io.tcp_send(&socket, &chunk) {
                Ok(n) => assert_eq!(n, chunk.len()),
                Err(e) => {
                    outcome = Some(e);
                    break;
                }
            }
        }
        let err = outcome.expect("send buffer never filled");
        // A busy socket stays usable; only a torn frame gives up the link
        assert_eq!(err.is_would_block(), io.tcp_is_valid(&socket));
    }

    #[tokio::test]
    async fn test_tcp_connect_refused() {
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        let mut io = TokioIoProvider::new();
        let socket = io.tcp_create().unwrap();
        assert_ok!(io.tcp_connect(&socket, SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)));

        let mut progress = ConnectProgress::Pending;
        for _ in 0..100 {
            progress = io.tcp_poll_connect(&socket);
            if progress != ConnectProgress::Pending {
                break;
            }
            settle().await;
        }
        assert!(matches!(progress, ConnectProgress::Failed(_)));
        assert!(!io.tcp_is_valid(&socket));
    }

    #[tokio::test]
    async fn test_http_post_to_dead_port_completes_with_error() {
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        let mut io = TokioIoProvider::new();
        let url = format!("http://127.0.0.1:{}/interferenceControl", port);
        let handle = assert_ok!(io.http_post_json(&url, br#"{"switch":0}"#));

        let mut done = None;
        for _ in 0..100 {
            settle().await;
            if let Some(d) = io.http_poll() {
                done = Some(d);
                break;
            }
        }
        let done = done.expect("completion");
        assert_eq!(done.request, handle);
        assert!(!done.is_success());
        assert!(done.error.is_some());
    }

    #[tokio::test]
    async fn test_http_post_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !String::from_utf8_lossy(&request).contains(r#"{"switch":1}"#) {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let body = r#"{"code":0}"#;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });

        let mut io = TokioIoProvider::new();
        let url = format!("http://127.0.0.1:{}/interferenceControl", port);
        let handle = io.http_post_json(&url, br#"{"switch":1}"#).unwrap();

        let mut done = None;
        for _ in 0..100 {
            settle().await;
            if let Some(d) = io.http_poll() {
                done = Some(d);
                break;
            }
        }
        let done = done.expect("completion");
        assert_eq!(done.request, handle);
        assert!(done.is_success());
        assert_eq!(done.body, r#"{"code":0}"#);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /interferenceControl"));
        assert!(request.to_ascii_lowercase().contains("content-type: application/json"));
    }
}

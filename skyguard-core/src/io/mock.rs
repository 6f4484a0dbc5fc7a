//! Recording `IoProvider` used by unit tests.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::{Ipv4Addr, SocketAddrV4};

use super::{
    ConnectProgress, HttpCompletion, HttpRequestHandle, IoError, IoProvider, TcpSocketHandle,
    UdpSocketHandle,
};
use crate::events::LogLevel;

pub(crate) struct MockIo {
    pub now: u64,
    next_handle: i32,
    udp_ports: HashMap<i32, u16>,
    /// Inbound datagrams per local port
    udp_inbox: HashMap<u16, VecDeque<(Vec<u8>, SocketAddrV4)>>,
    pub udp_sent: Vec<(SocketAddrV4, Vec<u8>)>,
    pub fail_udp_bind: bool,
    /// `None` keeps connects pending, `Some(ok)` resolves them on the next poll
    pub connect_outcome: Option<bool>,
    /// Make `tcp_connect` itself return an error
    pub fail_tcp_connect: bool,
    pub tcp_connects: Vec<SocketAddrV4>,
    tcp_connecting: HashSet<i32>,
    tcp_connected: HashSet<i32>,
    tcp_valid: HashSet<i32>,
    tcp_inbox: VecDeque<Vec<u8>>,
    pub tcp_sent: Vec<Vec<u8>>,
    /// Connected sockets report a full send buffer
    pub tcp_would_block: bool,
    pub http_posts: Vec<(String, String)>,
    pub http_handles: Vec<i32>,
    http_done: VecDeque<HttpCompletion>,
    logs: RefCell<Vec<(LogLevel, String)>>,
}

impl MockIo {
    pub fn new() -> Self {
        Self {
            now: 1_000,
            next_handle: 1,
            udp_ports: HashMap::new(),
            udp_inbox: HashMap::new(),
            udp_sent: Vec::new(),
            fail_udp_bind: false,
            connect_outcome: Some(true),
            fail_tcp_connect: false,
            tcp_connects: Vec::new(),
            tcp_connecting: HashSet::new(),
            tcp_connected: HashSet::new(),
            tcp_valid: HashSet::new(),
            tcp_inbox: VecDeque::new(),
            tcp_sent: Vec::new(),
            tcp_would_block: false,
            http_posts: Vec::new(),
            http_handles: Vec::new(),
            http_done: VecDeque::new(),
            logs: RefCell::new(Vec::new()),
        }
    }

    pub fn advance(&mut self, ms: u64) {
        self.now += ms;
    }

    pub fn deliver_udp(&mut self, port: u16, data: &[u8]) {
        let from = SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 9099);
        self.udp_inbox
            .entry(port)
            .or_default()
            .push_back((data.to_vec(), from));
    }

    pub fn deliver_tcp(&mut self, data: &[u8]) {
        self.tcp_inbox.push_back(data.to_vec());
    }

    /// Simulate the peer closing every TCP connection.
    pub fn drop_tcp(&mut self) {
        self.tcp_connected.clear();
        self.tcp_valid.clear();
    }

    pub fn complete_http(&mut self, request: i32, status: Option<u16>, body: &str, error: Option<&str>) {
        self.http_done.push_back(HttpCompletion {
            request: HttpRequestHandle(request),
            status,
            body: body.to_string(),
            error: error.map(str::to_string),
        });
    }

    /// Sent datagrams rendered as text, oldest first.
    pub fn udp_text(&self) -> Vec<String> {
        self.udp_sent
            .iter()
            .map(|(_, d)| String::from_utf8_lossy(d).into_owned())
            .collect()
    }

    /// Three-digit command codes of the sent spoof datagrams.
    pub fn udp_codes(&self) -> Vec<String> {
        self.udp_text()
            .iter()
            .filter_map(|t| t.get(6..9).map(str::to_string))
            .collect()
    }

    pub fn clear_sent(&mut self) {
        self.udp_sent.clear();
        self.tcp_sent.clear();
        self.http_posts.clear();
    }

    pub fn logged(&self, level: LogLevel) -> Vec<String> {
        self.logs
            .borrow()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }

    fn alloc(&mut self) -> i32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn record(&self, level: LogLevel, msg: &str) {
        self.logs.borrow_mut().push((level, msg.to_string()));
    }
}

impl IoProvider for MockIo {
    fn udp_create(&mut self) -> Result<UdpSocketHandle, IoError> {
        let handle = self.alloc();
        self.udp_ports.insert(handle, 0);
        Ok(UdpSocketHandle(handle))
    }

    fn udp_bind(&mut self, socket: &UdpSocketHandle, port: u16) -> Result<(), IoError> {
        if self.fail_udp_bind {
            return Err(IoError::new(-98, "Address already in use"));
        }
        self.udp_ports.insert(socket.0, port);
        Ok(())
    }

    fn udp_send_to(
        &mut self,
        socket: &UdpSocketHandle,
        data: &[u8],
        addr: SocketAddrV4,
    ) -> Result<usize, IoError> {
        if !self.udp_ports.contains_key(&socket.0) {
            return Err(IoError::invalid_handle());
        }
        self.udp_sent.push((addr, data.to_vec()));
        Ok(data.len())
    }

    fn udp_recv_from(
        &mut self,
        socket: &UdpSocketHandle,
        buf: &mut [u8],
    ) -> Option<(usize, SocketAddrV4)> {
        let port = *self.udp_ports.get(&socket.0)?;
        let (data, from) = self.udp_inbox.get_mut(&port)?.pop_front()?;
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Some((len, from))
    }

    fn udp_close(&mut self, socket: UdpSocketHandle) {
        self.udp_ports.remove(&socket.0);
    }

    fn tcp_create(&mut self) -> Result<TcpSocketHandle, IoError> {
        let handle = self.alloc();
        self.tcp_valid.insert(handle);
        Ok(TcpSocketHandle(handle))
    }

    fn tcp_connect(&mut self, socket: &TcpSocketHandle, addr: SocketAddrV4) -> Result<(), IoError> {
        self.tcp_connects.push(addr);
        if self.fail_tcp_connect {
            return Err(IoError::new(-101, "Network is unreachable"));
        }
        self.tcp_connecting.insert(socket.0);
        Ok(())
    }

    fn tcp_poll_connect(&mut self, socket: &TcpSocketHandle) -> ConnectProgress {
        if self.tcp_connected.contains(&socket.0) {
            return ConnectProgress::Connected;
        }
        if !self.tcp_connecting.contains(&socket.0) {
            return ConnectProgress::Failed(IoError::not_connected());
        }
        match self.connect_outcome {
            None => ConnectProgress::Pending,
            Some(true) => {
                self.tcp_connecting.remove(&socket.0);
                self.tcp_connected.insert(socket.0);
                ConnectProgress::Connected
            }
            Some(false) => {
                self.tcp_connecting.remove(&socket.0);
                self.tcp_valid.remove(&socket.0);
                ConnectProgress::Failed(IoError::new(-111, "Connection refused"))
            }
        }
    }

    fn tcp_is_connected(&self, socket: &TcpSocketHandle) -> bool {
        self.tcp_connected.contains(&socket.0)
    }

    fn tcp_is_valid(&self, socket: &TcpSocketHandle) -> bool {
        self.tcp_valid.contains(&socket.0)
    }

    fn tcp_send(&mut self, socket: &TcpSocketHandle, data: &[u8]) -> Result<usize, IoError> {
        if !self.tcp_connected.contains(&socket.0) {
            return Err(IoError::not_connected());
        }
        if self.tcp_would_block {
            return Err(IoError::would_block());
        }
        self.tcp_sent.push(data.to_vec());
        Ok(data.len())
    }

    fn tcp_recv_raw(&mut self, socket: &TcpSocketHandle, buf: &mut [u8]) -> Option<usize> {
        if !self.tcp_connected.contains(&socket.0) {
            return None;
        }
        let data = self.tcp_inbox.pop_front()?;
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Some(len)
    }

    fn tcp_close(&mut self, socket: TcpSocketHandle) {
        self.tcp_connecting.remove(&socket.0);
        self.tcp_connected.remove(&socket.0);
        self.tcp_valid.remove(&socket.0);
    }

    fn http_post_json(&mut self, url: &str, body: &[u8]) -> Result<HttpRequestHandle, IoError> {
        let handle = self.alloc();
        self.http_handles.push(handle);
        self.http_posts
            .push((url.to_string(), String::from_utf8_lossy(body).into_owned()));
        Ok(HttpRequestHandle(handle))
    }

    fn http_poll(&mut self) -> Option<HttpCompletion> {
        self.http_done.pop_front()
    }

    fn current_time_ms(&self) -> u64 {
        self.now
    }

    fn debug(&self, msg: &str) {
        self.record(LogLevel::Debug, msg);
    }

    fn info(&self, msg: &str) {
        self.record(LogLevel::Info, msg);
    }

    fn warn(&self, msg: &str) {
        self.record(LogLevel::Warn, msg);
    }

    fn error(&self, msg: &str) {
        self.record(LogLevel::Error, msg);
    }
}

//! RF Jammer HTTP Controller
//!
//! Posts JSON requests through the [`IoProvider`] HTTP interface and correlates
//! completions back to the request path for the operator log. Nothing waits on
//! a reply.

use std::collections::HashMap;
use std::net::SocketAddrV4;

use super::{ControllerEvent, Outbox};
use crate::error::CommandError;
use crate::events::LogLevel;
use crate::io::{HttpRequestHandle, IoProvider};
use crate::model::JammerConfig;
use crate::protocol::jammer::{self, JammerRequest};

pub struct JammerController {
    base_url: String,
    in_flight: HashMap<HttpRequestHandle, &'static str>,
    outbox: Outbox,
}

impl JammerController {
    pub fn new(addr: SocketAddrV4) -> Self {
        Self {
            base_url: jammer::base_url(addr),
            in_flight: HashMap::new(),
            outbox: Outbox::default(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn take_events(&mut self) -> Vec<ControllerEvent> {
        self.outbox.take()
    }

    pub fn set_target<I: IoProvider>(&mut self, io: &mut I, addr: SocketAddrV4) {
        self.base_url = jammer::base_url(addr);
        self.outbox.report(
            io,
            LogLevel::Info,
            format!("[jammer] Target {}", self.base_url),
        );
    }

    pub fn set_jamming<I: IoProvider>(&mut self, io: &mut I, enable: bool) {
        self.post(io, jammer::create_switch_request(enable));
    }

    pub fn set_write_freq<I: IoProvider>(&mut self, io: &mut I, configs: &[JammerConfig]) {
        self.post(io, jammer::create_write_freq_request(configs));
    }

    pub fn set_fixed_freq<I: IoProvider>(&mut self, io: &mut I, configs: &[JammerConfig]) {
        self.post(io, jammer::create_fixed_freq_request(configs));
    }

    /// Collect finished requests.
    pub fn poll<I: IoProvider>(&mut self, io: &mut I) {
        while let Some(done) = io.http_poll() {
            let Some(path) = self.in_flight.remove(&done.request) else {
                io.debug(&format!("[jammer] Completion for unknown request {:?}", done.request));
                continue;
            };
            let ok = done.is_success();
            if ok {
                self.outbox.report(
                    io,
                    LogLevel::Info,
                    format!(
                        "[jammer] {} -> {} {}",
                        path,
                        done.status.unwrap_or_default(),
                        done.body
                    ),
                );
            } else {
                let error = done
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("HTTP {}", done.status.unwrap_or_default()));
                self.outbox.report(
                    io,
                    LogLevel::Error,
                    format!("[jammer] {} failed: {} {}", path, error, done.body),
                );
            }
            self.outbox.push(ControllerEvent::JammerReply {
                path: path.to_string(),
                ok,
                status: done.status,
                body: done.body,
            });
        }
    }

    fn post<I: IoProvider>(&mut self, io: &mut I, request: Result<JammerRequest, CommandError>) {
        let request = match request {
            Ok(r) => r,
            Err(e) => {
                self.outbox.report(
                    io,
                    LogLevel::Error,
                    format!("[jammer] Cannot encode request: {}", e),
                );
                return;
            }
        };
        self.outbox.report(
            io,
            LogLevel::Info,
            format!("[jammer] POST {} {}", request.path, request.body),
        );
        match io.http_post_json(&request.url(&self.base_url), request.body.as_bytes()) {
            Ok(handle) => {
                self.in_flight.insert(handle, request.path);
            }
            Err(e) => {
                self.outbox.report(
                    io,
                    LogLevel::Error,
                    format!("[jammer] {} not sent: {}", request.path, e),
                );
            }
        }
    }
}

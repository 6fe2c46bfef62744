/*
 * Copyright (C) 2026 Argon developers
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use crate::pool::Handler;
use crate::request::{self, RequestError};
use crate::routing::RoutingTable;
use log::debug;
use std::io::{self, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

const OK_BODY: &[u8] = b"Hello, World!";
const NOT_FOUND_BODY: &[u8] = b"Not Found";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub reason: &'static str,
    pub body: &'static [u8],
}

impl Response {
    pub fn ok() -> Self {
        Self {
            status: 200,
            reason: "OK",
            body: OK_BODY,
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: 404,
            reason: "Not Found",
            body: NOT_FOUND_BODY,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let head = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            self.status,
            self.reason,
            self.body.len()
        );

        let mut out = Vec::with_capacity(head.len() + self.body.len());
        out.extend_from_slice(head.as_bytes());
        out.extend_from_slice(self.body);

        out
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HandleError {
    #[error("failed to set timeout: {0}")]
    Timeout(#[source] io::Error),

    #[error("failed to get local address: {0}")]
    LocalAddr(#[source] io::Error),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("failed to write response: {0}")]
    Write(#[source] io::Error),
}

// strips a trailing port, keeping bracketed ipv6 literals intact
fn host_name(value: &str) -> &str {
    let pos = match value.rfind(':') {
        Some(pos) => pos,
        None => return value,
    };

    let (name, port) = (&value[..pos], &value[(pos + 1)..]);

    let is_port = !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit());

    if is_port && (!name.contains(':') || name.ends_with(']')) {
        name
    } else {
        value
    }
}

/// Answers one request per connection, selecting the virtual host by local
/// port and Host header.
pub struct ConnectionHandler {
    table: Arc<RoutingTable>,
    io_timeout: Option<Duration>,
}

impl ConnectionHandler {
    pub fn new(table: Arc<RoutingTable>, io_timeout: Option<Duration>) -> Self {
        Self { table, io_timeout }
    }

    pub fn respond(&self, port: u16, host: Option<&str>) -> Response {
        match self.table.resolve(port, host.map(host_name)) {
            Some(vhost) => {
                debug!("port {} host {:?}: serving {}", port, host, vhost.primary_name);

                Response::ok()
            }
            None => {
                debug!("port {} host {:?}: no virtual host", port, host);

                Response::not_found()
            }
        }
    }

    fn serve(&self, stream: &mut TcpStream) -> Result<u16, HandleError> {
        if let Some(timeout) = self.io_timeout {
            stream
                .set_read_timeout(Some(timeout))
                .map_err(HandleError::Timeout)?;
            stream
                .set_write_timeout(Some(timeout))
                .map_err(HandleError::Timeout)?;
        }

        let port = stream.local_addr().map_err(HandleError::LocalAddr)?.port();

        let req = request::read_request(stream)?;

        debug!("{} {} {}", req.method, req.path, req.version);

        let resp = self.respond(port, req.header("Host"));

        stream
            .write_all(&resp.to_bytes())
            .map_err(HandleError::Write)?;
        stream.flush().map_err(HandleError::Write)?;

        Ok(resp.status)
    }
}

impl Handler<TcpStream> for ConnectionHandler {
    fn handle(&self, mut stream: TcpStream) {
        let peer = stream.peer_addr().ok();

        match self.serve(&mut stream) {
            Ok(status) => debug!("connection {:?}: responded {}", peer, status),
            Err(e) => debug!("connection {:?}: {}", peer, e),
        }

        // closed on drop
    }
}

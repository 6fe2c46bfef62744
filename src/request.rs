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

use std::io::{self, Read};
use std::str;

pub const REQUEST_HEADER_MAX: usize = 8192;
pub const HEADERS_MAX: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("connection closed before end of request header")]
    UnexpectedEof,

    #[error("request header too large")]
    TooLarge,

    #[error("failed to parse request: {0}")]
    Parse(#[from] httparse::Error),

    #[error("value of header {0} is not valid utf-8")]
    InvalidHeaderValue(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub version: String,
    pub headers: Vec<(String, String)>,
}

impl Request {
    /// Parses a request header block. Returns `None` if `buf` does not yet
    /// hold the complete block.
    pub fn parse(buf: &[u8]) -> Result<Option<Self>, RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; HEADERS_MAX];
        let mut req = httparse::Request::new(&mut headers);

        match req.parse(buf)? {
            httparse::Status::Complete(_) => {}
            httparse::Status::Partial => return Ok(None),
        }

        let (path, query) = match req.path.unwrap_or("").split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (req.path.unwrap_or("").to_string(), None),
        };

        let mut out_headers = Vec::with_capacity(req.headers.len());

        for h in req.headers.iter() {
            let value = match str::from_utf8(h.value) {
                Ok(s) => s.trim().to_string(),
                Err(_) => return Err(RequestError::InvalidHeaderValue(h.name.to_string())),
            };

            out_headers.push((h.name.to_string(), value));
        }

        Ok(Some(Self {
            method: req.method.unwrap_or("").to_string(),
            path,
            query,
            version: format!("HTTP/1.{}", req.version.unwrap_or(1)),
            headers: out_headers,
        }))
    }

    /// Returns the first value of the named header. Names compare
    /// case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Reads from `r` until a complete request header block is available.
///
/// Anything after the header block is left unread or discarded.
pub fn read_request<R: Read>(r: &mut R) -> Result<Request, RequestError> {
    let mut buf = [0; REQUEST_HEADER_MAX];
    let mut len = 0;

    loop {
        if len == buf.len() {
            return Err(RequestError::TooLarge);
        }

        let size = match r.read(&mut buf[len..]) {
            Ok(0) => return Err(RequestError::UnexpectedEof),
            Ok(size) => size,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };

        len += size;

        if let Some(req) = Request::parse(&buf[..len])? {
            return Ok(req);
        }
    }
}

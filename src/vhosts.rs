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

//! Parser for the virtual host file.
//!
//! The format is line oriented, one directive or block delimiter per line:
//!
//! ```text
//! server {
//!     server_name example.com www.example.com;
//!     listen 8080;
//!     ratelimit 100;
//!     allow 10.0.0.0/8;
//!     deny all;
//!     location /static {
//!         root /var/www/static;
//!         autoindex on;
//!     }
//! }
//! ```
//!
//! Trailing semicolons are optional and `#` starts a comment.

use crate::routing::{Location, RoutingTable, TableError, VirtualHost};
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};

pub const DEFAULT_LISTEN_PORT: u16 = 80;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseErrorKind {
    #[error("nested server block")]
    NestedServer,

    #[error("nested location block")]
    NestedLocation,

    #[error("{0} outside of a server block")]
    OutsideServer(String),

    #[error("{0} outside of a location block")]
    OutsideLocation(String),

    #[error("no server_name specified")]
    MissingServerName,

    #[error("missing value for {0}")]
    MissingValue(String),

    #[error("invalid listen port {0}")]
    InvalidPort(String),

    #[error("invalid ratelimit {0}")]
    InvalidRateLimit(String),

    #[error("invalid network {0}")]
    InvalidNetwork(String),

    #[error("invalid autoindex value {0}")]
    InvalidAutoindex(String),

    #[error("unknown directive {0}")]
    UnknownDirective(String),

    #[error("unmatched closing brace")]
    UnmatchedBrace,

    #[error("unclosed block")]
    UnclosedBlock,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {kind}")]
pub struct ParseError {
    pub line: usize,
    pub kind: ParseErrorKind,
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("failed to parse {}: {source}", path.display())]
    Parse { path: PathBuf, source: ParseError },

    #[error("invalid configuration in {}: {source}", path.display())]
    Table { path: PathBuf, source: TableError },
}

#[derive(Default)]
struct ServerBlock {
    start_line: usize,
    names: Vec<String>,
    listen: Option<u16>,
    rate_limit: Option<u32>,
    allow: Vec<IpNet>,
    deny: Vec<IpNet>,
    locations: Vec<Location>,
    in_location: bool,
}

impl ServerBlock {
    fn finish(mut self) -> Result<VirtualHost, ParseErrorKind> {
        if self.names.is_empty() {
            return Err(ParseErrorKind::MissingServerName);
        }

        let primary_name = self.names.remove(0);

        Ok(VirtualHost {
            primary_name,
            alternate_names: self.names,
            listen_port: self.listen.unwrap_or(DEFAULT_LISTEN_PORT),
            rate_limit: self.rate_limit,
            allow: self.allow,
            deny: self.deny,
            locations: self.locations,
        })
    }

    fn directive(&mut self, name: &str, args: &[&str]) -> Result<(), ParseErrorKind> {
        if self.in_location {
            // in_location implies at least one location
            let location = match self.locations.last_mut() {
                Some(l) => l,
                None => return Err(ParseErrorKind::UnknownDirective(name.to_string())),
            };

            return match name {
                "root" => {
                    let value = first_arg(name, args)?;
                    location.document_root = Some(PathBuf::from(value));

                    Ok(())
                }
                "autoindex" => {
                    location.autoindex = match first_arg(name, args)? {
                        "on" => true,
                        "off" => false,
                        v => return Err(ParseErrorKind::InvalidAutoindex(v.to_string())),
                    };

                    Ok(())
                }
                _ => Err(ParseErrorKind::UnknownDirective(name.to_string())),
            };
        }

        match name {
            "server_name" => {
                if args.is_empty() {
                    return Err(ParseErrorKind::MissingValue(name.to_string()));
                }

                self.names.extend(args.iter().map(|s| s.to_string()));
            }
            "listen" => {
                let value = first_arg(name, args)?;

                self.listen = Some(parse_number(value, ParseErrorKind::InvalidPort)?);
            }
            "ratelimit" => {
                let value = first_arg(name, args)?;

                self.rate_limit = Some(parse_number(value, ParseErrorKind::InvalidRateLimit)?);
            }
            "allow" | "deny" => {
                if args.is_empty() {
                    return Err(ParseErrorKind::MissingValue(name.to_string()));
                }

                let mut nets = Vec::new();
                for arg in args {
                    nets.extend(parse_network(arg)?);
                }

                if name == "allow" {
                    self.allow.extend(nets);
                } else {
                    self.deny.extend(nets);
                }
            }
            "root" | "autoindex" => {
                return Err(ParseErrorKind::OutsideLocation(name.to_string()));
            }
            _ => return Err(ParseErrorKind::UnknownDirective(name.to_string())),
        }

        Ok(())
    }
}

fn first_arg<'a>(name: &str, args: &[&'a str]) -> Result<&'a str, ParseErrorKind> {
    match args.first() {
        Some(v) => Ok(*v),
        None => Err(ParseErrorKind::MissingValue(name.to_string())),
    }
}

// digits only, so that signs and whitespace are rejected
fn parse_number<T, F>(value: &str, err: F) -> Result<T, ParseErrorKind>
where
    T: std::str::FromStr,
    F: Fn(String) -> ParseErrorKind,
{
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(err(value.to_string()));
    }

    value.parse().map_err(|_| err(value.to_string()))
}

fn parse_network(value: &str) -> Result<Vec<IpNet>, ParseErrorKind> {
    if value == "all" {
        let v4 = Ipv4Net::new(Ipv4Addr::UNSPECIFIED, 0)
            .map_err(|_| ParseErrorKind::InvalidNetwork(value.to_string()))?;
        let v6 = Ipv6Net::new(Ipv6Addr::UNSPECIFIED, 0)
            .map_err(|_| ParseErrorKind::InvalidNetwork(value.to_string()))?;

        return Ok(vec![IpNet::V4(v4), IpNet::V6(v6)]);
    }

    if let Ok(net) = value.parse::<IpNet>() {
        return Ok(vec![net]);
    }

    // a bare address is a single host
    let net = match value.parse::<IpAddr>() {
        Ok(IpAddr::V4(addr)) => Ipv4Net::new(addr, 32).map(IpNet::V4),
        Ok(IpAddr::V6(addr)) => Ipv6Net::new(addr, 128).map(IpNet::V6),
        Err(_) => return Err(ParseErrorKind::InvalidNetwork(value.to_string())),
    };

    match net {
        Ok(net) => Ok(vec![net]),
        Err(_) => Err(ParseErrorKind::InvalidNetwork(value.to_string())),
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    }
}

/// Parses virtual host definitions, in declaration order.
pub fn parse(text: &str) -> Result<Vec<VirtualHost>, ParseError> {
    let mut hosts = Vec::new();
    let mut current: Option<ServerBlock> = None;

    for (i, raw) in text.lines().enumerate() {
        let line_num = i + 1;

        let err = |kind| ParseError {
            line: line_num,
            kind,
        };

        let line = strip_comment(raw).trim();
        let line = line.trim_end_matches(';').trim_end();

        if line.is_empty() {
            continue;
        }

        if line == "}" {
            match current.take() {
                Some(mut block) if block.in_location => {
                    block.in_location = false;
                    current = Some(block);
                }
                Some(block) => hosts.push(block.finish().map_err(err)?),
                None => return Err(err(ParseErrorKind::UnmatchedBrace)),
            }

            continue;
        }

        let (head, opens_block) = match line.strip_suffix('{') {
            Some(head) => (head.trim_end(), true),
            None => (line, false),
        };

        let mut words = head.split_whitespace();

        let name = match words.next() {
            Some(name) => name,
            None => return Err(err(ParseErrorKind::UnknownDirective(line.to_string()))),
        };

        let args: Vec<&str> = words.collect();

        if opens_block {
            match name {
                "server" => {
                    if current.is_some() {
                        return Err(err(ParseErrorKind::NestedServer));
                    }

                    current = Some(ServerBlock {
                        start_line: line_num,
                        ..Default::default()
                    });
                }
                "location" => {
                    let block = match current.as_mut() {
                        Some(block) => block,
                        None => return Err(err(ParseErrorKind::OutsideServer(name.to_string()))),
                    };

                    if block.in_location {
                        return Err(err(ParseErrorKind::NestedLocation));
                    }

                    let path = first_arg(name, &args).map_err(err)?;

                    block.locations.push(Location::new(path));
                    block.in_location = true;
                }
                _ => return Err(err(ParseErrorKind::UnknownDirective(name.to_string()))),
            }

            continue;
        }

        match current.as_mut() {
            Some(block) => block.directive(name, &args).map_err(err)?,
            None => return Err(err(ParseErrorKind::OutsideServer(name.to_string()))),
        }
    }

    if let Some(block) = current {
        return Err(ParseError {
            line: block.start_line,
            kind: ParseErrorKind::UnclosedBlock,
        });
    }

    Ok(hosts)
}

/// Reads and parses a virtual host file into a routing table.
pub fn load(path: &Path) -> Result<RoutingTable, LoadError> {
    let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let hosts = parse(&text).map_err(|source| LoadError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    RoutingTable::new(hosts).map_err(|source| LoadError::Table {
        path: path.to_path_buf(),
        source,
    })
}

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

use crate::pool::WorkerPool;
use crate::routing::RoutingTable;
use log::{debug, error, info, warn};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

pub const DEFAULT_BACKLOG: i32 = 10;

const EVENTS_MAX: usize = 1024;
const SHUTDOWN_TOKEN: Token = Token(0);

// wait between accept attempts on an endpoint that failed to drain
const ACCEPT_RETRY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenOptions {
    pub bind_addr: IpAddr,
    pub backlog: i32,
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            backlog: DEFAULT_BACKLOG,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AcceptorError {
    #[error("no ports configured")]
    NoPorts,

    #[error("failed to create poller: {0}")]
    Poll(#[source] io::Error),

    #[error("failed to create socket for {addr}: {source}")]
    Socket { addr: SocketAddr, source: io::Error },

    #[error("failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    #[error("failed to listen on {addr}: {source}")]
    Listen { addr: SocketAddr, source: io::Error },

    #[error("failed to register {addr}: {source}")]
    Register { addr: SocketAddr, source: io::Error },

    #[error("failed to wait for events: {0}")]
    Wait(#[source] io::Error),
}

fn bind_listener(addr: SocketAddr, backlog: i32) -> Result<TcpListener, AcceptorError> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(|source| AcceptorError::Socket { addr, source })?;

    socket
        .set_reuse_address(true)
        .map_err(|source| AcceptorError::Socket { addr, source })?;

    socket
        .bind(&addr.into())
        .map_err(|source| AcceptorError::Bind { addr, source })?;

    socket
        .listen(backlog)
        .map_err(|source| AcceptorError::Listen { addr, source })?;

    // readiness is edge-triggered, so accepts must never block the loop
    socket
        .set_nonblocking(true)
        .map_err(|source| AcceptorError::Listen { addr, source })?;

    Ok(socket.into())
}

struct Endpoint {
    listener: TcpListener,
    addr: SocketAddr,

    // the backlog may be non-empty without a further readiness edge
    pending: bool,
}

/// Triggers shutdown of an `Acceptor` from any thread.
///
/// Only the first call per acceptor writes to the shutdown descriptor. The
/// handle does not keep the descriptor open, so calls after the acceptor
/// stopped do nothing.
#[derive(Clone)]
pub struct ShutdownHandle {
    waker: Weak<Waker>,
    signaled: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn signal_shutdown(&self) {
        if self.signaled.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(waker) = self.waker.upgrade() {
            if let Err(e) = waker.wake() {
                error!("failed to signal shutdown: {:?}", e);
            }
        }
    }

    pub fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }
}

/// Owns the listening sockets and feeds accepted connections to the pool.
///
/// All listeners and the shutdown descriptor share one readiness set, so
/// the loop sleeps until either a connection or a shutdown request arrives.
pub struct Acceptor {
    poll: Option<Poll>,
    events: Events,
    endpoints: Vec<Endpoint>,
    waker: Option<Arc<Waker>>,
    signaled: Arc<AtomicBool>,
    pool: WorkerPool<TcpStream>,
    stopped: bool,
}

impl Acceptor {
    /// Binds one listener per distinct port in `table`. The pool should be
    /// started already.
    pub fn new(
        table: &RoutingTable,
        pool: WorkerPool<TcpStream>,
        opts: ListenOptions,
    ) -> Result<Self, AcceptorError> {
        if table.ports().next().is_none() {
            return Err(AcceptorError::NoPorts);
        }

        let poll = Poll::new().map_err(AcceptorError::Poll)?;

        let waker = Waker::new(poll.registry(), SHUTDOWN_TOKEN).map_err(AcceptorError::Poll)?;

        let mut endpoints = Vec::new();

        for (i, port) in table.ports().enumerate() {
            let addr = SocketAddr::new(opts.bind_addr, port);

            let listener = bind_listener(addr, opts.backlog)?;

            let addr = listener
                .local_addr()
                .map_err(|source| AcceptorError::Listen { addr, source })?;

            poll.registry()
                .register(
                    &mut SourceFd(&listener.as_raw_fd()),
                    Token(i + 1),
                    Interest::READABLE,
                )
                .map_err(|source| AcceptorError::Register { addr, source })?;

            info!("listening on {}", addr);

            endpoints.push(Endpoint {
                listener,
                addr,
                pending: false,
            });
        }

        Ok(Self {
            poll: Some(poll),
            events: Events::with_capacity(EVENTS_MAX),
            endpoints,
            waker: Some(Arc::new(waker)),
            signaled: Arc::new(AtomicBool::new(false)),
            pool,
            stopped: false,
        })
    }

    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.endpoints.iter().map(|e| e.addr).collect()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            waker: match &self.waker {
                Some(waker) => Arc::downgrade(waker),
                None => Weak::new(),
            },
            signaled: Arc::clone(&self.signaled),
        }
    }

    pub fn signal_shutdown(&self) {
        self.shutdown_handle().signal_shutdown();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Runs until shutdown is signaled, then stops and returns.
    pub fn run(&mut self) -> Result<(), AcceptorError> {
        loop {
            let poll = match self.poll.as_mut() {
                Some(poll) => poll,
                None => return Ok(()),
            };

            let timeout = if self.endpoints.iter().any(|e| e.pending) {
                Some(ACCEPT_RETRY)
            } else {
                None
            };

            if let Err(e) = poll.poll(&mut self.events, timeout) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }

                self.stop();

                return Err(AcceptorError::Wait(e));
            }

            let mut shutdown = false;

            for event in self.events.iter() {
                match event.token() {
                    SHUTDOWN_TOKEN => shutdown = true,
                    Token(n) => match self.endpoints.get_mut(n - 1) {
                        Some(endpoint) => endpoint.pending = true,
                        None => debug!("event for unknown token {}", n),
                    },
                }
            }

            if shutdown {
                info!("shutdown requested");

                self.stop();

                return Ok(());
            }

            for endpoint in self.endpoints.iter_mut().filter(|e| e.pending) {
                let listener = &endpoint.listener;

                endpoint.pending =
                    Self::accept_ready(endpoint.addr, &self.pool, || listener.accept());
            }
        }
    }

    /// Accepts until the backlog is empty. Returns true if accepting stopped
    /// on an error that may clear later, leaving connections in the backlog.
    fn accept_ready<F>(addr: SocketAddr, pool: &WorkerPool<TcpStream>, mut accept: F) -> bool
    where
        F: FnMut() -> io::Result<(TcpStream, SocketAddr)>,
    {
        loop {
            let (stream, peer_addr) = match accept() {
                Ok(ret) => ret,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return false,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e)
                    if e.kind() == io::ErrorKind::ConnectionAborted
                        || e.kind() == io::ErrorKind::ConnectionReset =>
                {
                    debug!("connection lost before accept on {}: {:?}", addr, e);
                    continue;
                }
                Err(e) => {
                    error!("accept error on {}, retrying: {:?}", addr, e);
                    return true;
                }
            };

            debug!("accepted connection from {} on {}", peer_addr, addr);

            // workers do plain blocking i/o
            if let Err(e) = stream.set_nonblocking(false) {
                error!("failed to set blocking mode for {}: {:?}", peer_addr, e);
                continue;
            }

            if let Err(stream) = pool.enqueue(stream) {
                warn!("task queue full, rejecting connection from {}", peer_addr);
                drop(stream);
            }
        }
    }

    /// Closes the listeners, then drains and joins the pool. Repeat calls
    /// do nothing.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }

        self.stopped = true;

        // a later signal_shutdown call must not touch the waker
        self.signaled.store(true, Ordering::Release);

        if let Some(poll) = &self.poll {
            for endpoint in self.endpoints.iter() {
                let fd = endpoint.listener.as_raw_fd();

                if let Err(e) = poll.registry().deregister(&mut SourceFd(&fd)) {
                    debug!("failed to deregister {}: {:?}", endpoint.addr, e);
                }
            }
        }

        for endpoint in self.endpoints.drain(..) {
            debug!("closing listener {}", endpoint.addr);
        }

        self.waker = None;
        self.poll = None;

        info!("draining {} queued connections", self.pool.len());

        self.pool.shutdown();

        info!("acceptor stopped");
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::ConnectionHandler;
    use crate::routing::VirtualHost;
    use std::collections::VecDeque;
    use std::io::{Read, Write};
    use std::net::Shutdown;
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;
    use test_log::test;

    fn free_port() -> u16 {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    }

    fn loopback() -> ListenOptions {
        ListenOptions {
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            backlog: 64,
        }
    }

    fn get(addr: SocketAddr, host: &str) -> Vec<u8> {
        let mut client = TcpStream::connect(addr).unwrap();

        write!(client, "GET / HTTP/1.1\r\nHost: {}\r\n\r\n", host).unwrap();
        client.shutdown(Shutdown::Write).unwrap();

        let mut buf = Vec::new();
        client.read_to_end(&mut buf).unwrap();

        buf
    }

    #[test]
    fn no_ports() {
        let table = RoutingTable::new(Vec::new()).unwrap();
        let pool = WorkerPool::new(1, 1).unwrap();

        assert!(matches!(
            Acceptor::new(&table, pool, loopback()),
            Err(AcceptorError::NoPorts)
        ));
    }

    #[test]
    fn bind_conflict() {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = l.local_addr().unwrap().port();

        let table = RoutingTable::new(vec![VirtualHost::new("a.com", port)]).unwrap();
        let pool = WorkerPool::new(1, 1).unwrap();

        assert!(matches!(
            Acceptor::new(&table, pool, loopback()),
            Err(AcceptorError::Bind { .. })
        ));
    }

    #[test]
    fn serve_multiple_ports() {
        let (port1, port2) = (free_port(), free_port());

        let table = Arc::new(
            RoutingTable::new(vec![
                VirtualHost::new("a.com", port1),
                VirtualHost::new("b.com", port2),
            ])
            .unwrap(),
        );

        let mut pool: WorkerPool<TcpStream> = WorkerPool::new(16, 2).unwrap();
        pool.start(ConnectionHandler::new(Arc::clone(&table), None))
            .unwrap();

        let mut acceptor = Acceptor::new(&table, pool, loopback()).unwrap();

        let addrs = acceptor.local_addrs();
        assert_eq!(addrs.len(), 2);

        let shutdown = acceptor.shutdown_handle();

        let thread = thread::spawn(move || acceptor.run());

        for addr in addrs.iter() {
            for _ in 0..3 {
                let out = get(*addr, "a.com");
                assert!(out.starts_with(b"HTTP/1.1 200 OK\r\n"));
            }
        }

        shutdown.signal_shutdown();
        shutdown.signal_shutdown();

        thread.join().unwrap().unwrap();

        // listeners are closed
        for addr in addrs.iter() {
            assert!(TcpStream::connect(addr).is_err());
        }

        // no-op after stop
        shutdown.signal_shutdown();
        assert!(shutdown.is_signaled());
    }

    #[test]
    fn signal_before_run() {
        let table = RoutingTable::new(vec![VirtualHost::new("a.com", free_port())]).unwrap();

        let mut pool = WorkerPool::new(1, 1).unwrap();
        pool.start(|_: TcpStream| {}).unwrap();

        let mut acceptor = Acceptor::new(&table, pool, loopback()).unwrap();

        acceptor.signal_shutdown();
        acceptor.run().unwrap();

        assert!(acceptor.is_stopped());

        // already stopped
        acceptor.run().unwrap();
        acceptor.stop();
    }

    #[test]
    fn stop_without_run() {
        let table = RoutingTable::new(vec![VirtualHost::new("a.com", free_port())]).unwrap();

        let mut pool = WorkerPool::new(1, 1).unwrap();
        pool.start(|_: TcpStream| {}).unwrap();

        let mut acceptor = Acceptor::new(&table, pool, loopback()).unwrap();
        let addr = acceptor.local_addrs()[0];

        let shutdown = acceptor.shutdown_handle();

        acceptor.stop();
        acceptor.stop();

        assert!(TcpStream::connect(addr).is_err());

        shutdown.signal_shutdown();
    }

    #[test]
    fn queue_full_drops_connection() {
        let table = RoutingTable::new(vec![VirtualHost::new("a.com", free_port())]).unwrap();

        let (started_s, started_r) = mpsc::channel();
        let (release_s, release_r) = mpsc::channel::<()>();

        let started_s = Mutex::new(started_s);
        let release_r = Mutex::new(release_r);

        let mut pool = WorkerPool::new(1, 1).unwrap();
        pool.start(move |mut stream: TcpStream| {
            started_s.lock().unwrap().send(()).unwrap();

            // hold the only worker until released
            let _ = release_r.lock().unwrap().recv();

            stream.write_all(b"ok").unwrap();
        })
        .unwrap();

        let mut acceptor = Acceptor::new(&table, pool, loopback()).unwrap();
        let addr = acceptor.local_addrs()[0];
        let shutdown = acceptor.shutdown_handle();

        let thread = thread::spawn(move || acceptor.run());

        // occupies the worker
        let mut c1 = TcpStream::connect(addr).unwrap();
        started_r.recv().unwrap();

        // fills the queue
        let mut c2 = TcpStream::connect(addr).unwrap();
        thread::sleep(Duration::from_millis(100));

        // rejected
        let mut c3 = TcpStream::connect(addr).unwrap();
        c3.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        let mut buf = Vec::new();
        match c3.read_to_end(&mut buf) {
            Ok(_) => assert!(buf.is_empty()),
            Err(e) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
        }

        release_s.send(()).unwrap();

        let mut buf = Vec::new();
        c1.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"ok");

        // the admitted connection is still served after shutdown begins
        shutdown.signal_shutdown();
        started_r.recv().unwrap();
        release_s.send(()).unwrap();

        let mut buf = Vec::new();
        c2.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"ok");

        thread.join().unwrap().unwrap();
    }

    fn accepted_pair() -> (TcpStream, (TcpStream, SocketAddr)) {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(l.local_addr().unwrap()).unwrap();

        (client, l.accept().unwrap())
    }

    #[test]
    fn accept_skips_lost_connections() {
        let (_client, accepted) = accepted_pair();
        let addr = accepted.0.local_addr().unwrap();

        let pool: WorkerPool<TcpStream> = WorkerPool::new(4, 1).unwrap();

        let mut results = VecDeque::from(vec![
            Err(io::Error::from(io::ErrorKind::ConnectionAborted)),
            Err(io::Error::from(io::ErrorKind::Interrupted)),
            Ok(accepted),
            Err(io::Error::from(io::ErrorKind::ConnectionReset)),
            Err(io::Error::from(io::ErrorKind::WouldBlock)),
        ]);

        let pending = Acceptor::accept_ready(addr, &pool, || results.pop_front().unwrap());

        assert!(!pending);
        assert!(results.is_empty());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn accept_stops_on_resource_error() {
        let (_client, accepted) = accepted_pair();
        let addr = accepted.0.local_addr().unwrap();

        let pool: WorkerPool<TcpStream> = WorkerPool::new(4, 1).unwrap();

        let mut results = VecDeque::from(vec![
            Err(io::Error::new(io::ErrorKind::Other, "too many open files")),
            Ok(accepted),
        ]);

        let pending = Acceptor::accept_ready(addr, &pool, || results.pop_front().unwrap());

        // the backlog is left for a later attempt
        assert!(pending);
        assert_eq!(results.len(), 1);
        assert!(pool.is_empty());
    }

    #[test]
    fn pending_backlog_retried() {
        let table = Arc::new(
            RoutingTable::new(vec![VirtualHost::new("a.com", free_port())]).unwrap(),
        );

        let mut pool: WorkerPool<TcpStream> = WorkerPool::new(4, 1).unwrap();
        pool.start(ConnectionHandler::new(Arc::clone(&table), None))
            .unwrap();

        let mut acceptor = Acceptor::new(&table, pool, loopback()).unwrap();
        let addr = acceptor.local_addrs()[0];

        let mut client = TcpStream::connect(addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        write!(client, "GET / HTTP/1.1\r\nHost: a.com\r\n\r\n").unwrap();

        // consume the readiness edge without accepting, as a failed accept
        // would
        let mut seen = false;
        for _ in 0..50 {
            let poll = acceptor.poll.as_mut().unwrap();
            poll.poll(&mut acceptor.events, Some(Duration::from_millis(100)))
                .unwrap();

            if acceptor.events.iter().any(|e| e.token() == Token(1)) {
                seen = true;
                break;
            }
        }
        assert!(seen);

        acceptor.endpoints[0].pending = true;

        let shutdown = acceptor.shutdown_handle();
        let thread = thread::spawn(move || acceptor.run());

        // no new connection arrives, so only the retry can accept it
        let mut buf = Vec::new();
        client.read_to_end(&mut buf).unwrap();
        assert!(buf.starts_with(b"HTTP/1.1 200 OK\r\n"));

        shutdown.signal_shutdown();
        thread.join().unwrap().unwrap();
    }
}

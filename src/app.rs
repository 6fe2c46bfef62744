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

use crate::acceptor::{Acceptor, AcceptorError, ListenOptions, ShutdownHandle};
use crate::handler::ConnectionHandler;
use crate::pool::{PoolError, WorkerPool};
use crate::routing::RoutingTable;
use crate::vhosts::{self, LoadError};
use log::{debug, info};
use signal_hook::consts::TERM_SIGNALS;
use signal_hook::iterator::Signals;
use std::io;
use std::net::{IpAddr, SocketAddr, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub struct Config {
    pub vhosts_file: PathBuf,
    pub bind_addr: IpAddr,
    pub backlog: i32,
    pub workers: usize,
    pub queue_capacity: usize,
    pub io_timeout: Option<Duration>,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Acceptor(#[from] AcceptorError),

    #[error("failed to register signal handlers: {0}")]
    Signal(#[source] io::Error),
}

pub struct App {
    acceptor: Acceptor,
}

impl App {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        let table = vhosts::load(&config.vhosts_file)?;

        info!(
            "loaded {} virtual hosts from {}",
            table.len(),
            config.vhosts_file.display()
        );

        Self::with_table(Arc::new(table), config)
    }

    /// Like `new`, but with an already built table. `vhosts_file` is
    /// ignored.
    pub fn with_table(table: Arc<RoutingTable>, config: &Config) -> Result<Self, AppError> {
        for host in table.hosts() {
            debug!(
                "virtual host {} on port {} ({} alternate names, {} locations)",
                host.primary_name,
                host.listen_port,
                host.alternate_names.len(),
                host.locations.len()
            );
        }

        let mut pool: WorkerPool<TcpStream> =
            WorkerPool::new(config.queue_capacity, config.workers)?;

        pool.start(ConnectionHandler::new(Arc::clone(&table), config.io_timeout))?;

        info!("thread pool initialized with {} threads", pool.thread_count());

        let opts = ListenOptions {
            bind_addr: config.bind_addr,
            backlog: config.backlog,
        };

        let acceptor = Acceptor::new(&table, pool, opts)?;

        Ok(Self { acceptor })
    }

    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.acceptor.local_addrs()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.acceptor.shutdown_handle()
    }

    /// Serves until shutdown is signaled through a `ShutdownHandle`.
    pub fn serve(&mut self) -> Result<(), AppError> {
        Ok(self.acceptor.run()?)
    }

    /// Serves until a termination signal arrives.
    pub fn run(mut self) -> Result<(), AppError> {
        let mut signals = Signals::new(TERM_SIGNALS).map_err(AppError::Signal)?;

        let term_now = Arc::new(AtomicBool::new(false));

        // ensure two term signals in a row causes the app to immediately exit
        for signal_type in TERM_SIGNALS {
            signal_hook::flag::register_conditional_shutdown(
                *signal_type,
                1, // exit code
                Arc::clone(&term_now),
            )
            .map_err(AppError::Signal)?;

            signal_hook::flag::register(*signal_type, Arc::clone(&term_now))
                .map_err(AppError::Signal)?;
        }

        let signals_handle = signals.handle();
        let shutdown = self.shutdown_handle();

        // translates signals only. all shutdown work happens in the
        // acceptor thread
        let signal_thread = thread::Builder::new()
            .name("signals".to_string())
            .spawn(move || {
                for signal in signals.forever() {
                    info!("received signal {}, shutting down", signal);

                    shutdown.signal_shutdown();
                }
            })
            .map_err(AppError::Signal)?;

        let ret = self.serve();

        signals_handle.close();
        let _ = signal_thread.join();

        ret
    }
}

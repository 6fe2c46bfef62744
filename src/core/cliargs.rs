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

use crate::app;
use crate::core::config::{get_config_file, Settings};
use clap::Parser;
use std::error::Error;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

// safety values
const WORKERS_MAX: usize = 1024;
const QUEUE_CAPACITY_MAX: usize = 1_000_000;

#[derive(Parser, Debug)]
#[command(
    name = "argon",
    version,
    about = "Multi-virtual-host HTTP listener."
)]
pub struct CliArgs {
    /// Set path to the settings file
    #[arg(short, long, value_name = "file")]
    pub config_file: Option<String>,

    /// Set path to the virtual host file (overrides server.vhosts_file)
    #[arg(long, value_name = "file")]
    pub vhosts: Option<String>,

    /// Set path to the log file
    #[arg(short = 'l', long, value_name = "file")]
    pub log_file: Option<String>,

    /// Set log level (0=error, 1=warn, 2=info, 3=debug, 4=trace)
    #[arg(short = 'L', long, value_name = "x", default_value_t = 2, value_parser = clap::value_parser!(u32).range(0..=4))]
    pub log_level: u32,

    /// Number of worker threads (overrides server.workers)
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Maximum number of queued connections (overrides server.queue_capacity)
    #[arg(long, value_name = "N")]
    pub queue_capacity: Option<usize>,

    /// Listen backlog (overrides server.backlog)
    #[arg(long, value_name = "N")]
    pub backlog: Option<i32>,

    /// Address to bind listeners to (overrides server.bind_addr)
    #[arg(long, value_name = "addr")]
    pub bind_addr: Option<String>,
}

impl CliArgs {
    /// Merges the settings file with the command line into a server config.
    pub fn into_config(self, work_dir: &Path) -> Result<app::Config, Box<dyn Error>> {
        let config_file = get_config_file(work_dir, self.config_file.map(PathBuf::from))?;

        let settings = match Settings::new(config_file.as_deref()) {
            Ok(settings) => settings,
            Err(e) => return Err(format!("failed to load settings: {}", e).into()),
        };

        let server = settings.server;

        let workers = self.workers.unwrap_or(server.workers);
        if workers == 0 || workers > WORKERS_MAX {
            return Err(format!("failed to parse workers: must be between 1 and {}", WORKERS_MAX).into());
        }

        let queue_capacity = self.queue_capacity.unwrap_or(server.queue_capacity);
        if queue_capacity == 0 || queue_capacity > QUEUE_CAPACITY_MAX {
            return Err(format!(
                "failed to parse queue capacity: must be between 1 and {}",
                QUEUE_CAPACITY_MAX
            )
            .into());
        }

        let backlog = self.backlog.unwrap_or(server.backlog);
        if backlog < 1 {
            return Err("failed to parse backlog: value must be positive".into());
        }

        let bind_addr = self.bind_addr.unwrap_or(server.bind_addr);
        let bind_addr: IpAddr = match bind_addr.parse() {
            Ok(addr) => addr,
            Err(e) => return Err(format!("failed to parse bind addr {}: {}", bind_addr, e).into()),
        };

        let vhosts_file = PathBuf::from(self.vhosts.unwrap_or(server.vhosts_file));

        // relative paths are relative to the working directory
        let vhosts_file = if vhosts_file.is_relative() {
            work_dir.join(vhosts_file)
        } else {
            vhosts_file
        };

        let io_timeout = if server.io_timeout > 0 {
            Some(Duration::from_secs(server.io_timeout))
        } else {
            None
        };

        Ok(app::Config {
            vhosts_file,
            bind_addr,
            backlog,
            workers,
            queue_capacity,
            io_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn empty_args() -> CliArgs {
        CliArgs {
            config_file: None,
            vhosts: None,
            log_file: None,
            log_level: 2,
            workers: None,
            queue_capacity: None,
            backlog: None,
            bind_addr: None,
        }
    }

    #[test]
    fn parse_args() {
        let args = CliArgs::try_parse_from([
            "argon",
            "--config-file",
            "argon.toml",
            "--vhosts",
            "sites.conf",
            "-L",
            "3",
            "--workers",
            "8",
            "--queue-capacity",
            "16",
            "--backlog",
            "128",
            "--bind-addr",
            "127.0.0.1",
        ])
        .unwrap();

        assert_eq!(args.config_file.as_deref(), Some("argon.toml"));
        assert_eq!(args.vhosts.as_deref(), Some("sites.conf"));
        assert_eq!(args.log_level, 3);
        assert_eq!(args.workers, Some(8));
        assert_eq!(args.queue_capacity, Some(16));
        assert_eq!(args.backlog, Some(128));
        assert_eq!(args.bind_addr.as_deref(), Some("127.0.0.1"));

        assert!(CliArgs::try_parse_from(["argon", "-L", "5"]).is_err());
    }

    #[test]
    fn config_defaults() {
        let dir = TempDir::new().unwrap();

        let config = empty_args().into_config(dir.path()).unwrap();

        assert_eq!(config.vhosts_file, dir.path().join("argon.conf"));
        assert_eq!(config.bind_addr, "0.0.0.0".parse::<IpAddr>().unwrap());
        assert_eq!(config.backlog, 10);
        assert_eq!(config.workers, 4);
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.io_timeout, None);
    }

    #[test]
    fn config_overrides() {
        let dir = TempDir::new().unwrap();

        fs::write(
            dir.path().join("argon.toml"),
            "[server]\nworkers = 2\nqueue_capacity = 8\nio_timeout = 5\nvhosts_file = \"/etc/argon.conf\"\n",
        )
        .unwrap();

        let config = empty_args().into_config(dir.path()).unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.io_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.vhosts_file, PathBuf::from("/etc/argon.conf"));

        let mut args = empty_args();
        args.workers = Some(6);
        args.vhosts = Some("sites.conf".to_string());

        let config = args.into_config(dir.path()).unwrap();
        assert_eq!(config.workers, 6);
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.vhosts_file, dir.path().join("sites.conf"));
    }

    #[test]
    fn config_invalid() {
        let dir = TempDir::new().unwrap();

        let mut args = empty_args();
        args.workers = Some(0);
        assert!(args.into_config(dir.path()).is_err());

        let mut args = empty_args();
        args.queue_capacity = Some(QUEUE_CAPACITY_MAX + 1);
        assert!(args.into_config(dir.path()).is_err());

        let mut args = empty_args();
        args.bind_addr = Some("localhost".to_string());
        assert!(args.into_config(dir.path()).is_err());

        let mut args = empty_args();
        args.config_file = Some("no/such/file".to_string());
        assert!(args.into_config(dir.path()).is_err());
    }
}

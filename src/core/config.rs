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

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::error::Error;
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "ARGON";

#[derive(Debug, Deserialize, PartialEq, Eq)]
pub struct Server {
    pub vhosts_file: String,
    pub bind_addr: String,
    pub backlog: i32,
    pub workers: usize,
    pub queue_capacity: usize,

    // seconds, 0 disables
    pub io_timeout: u64,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            vhosts_file: String::from("argon.conf"),
            bind_addr: String::from("0.0.0.0"),
            backlog: 10,
            workers: 4,
            queue_capacity: 1024,
            io_timeout: 0,
        }
    }
}

impl From<Server> for config::ValueKind {
    fn from(server: Server) -> Self {
        let mut properties = HashMap::new();
        properties.insert(
            "vhosts_file".to_string(),
            config::Value::from(server.vhosts_file),
        );
        properties.insert(
            "bind_addr".to_string(),
            config::Value::from(server.bind_addr),
        );
        properties.insert("backlog".to_string(), config::Value::from(server.backlog as i64));
        properties.insert(
            "workers".to_string(),
            config::Value::from(server.workers as i64),
        );
        properties.insert(
            "queue_capacity".to_string(),
            config::Value::from(server.queue_capacity as i64),
        );
        properties.insert(
            "io_timeout".to_string(),
            config::Value::from(server.io_timeout as i64),
        );

        Self::Table(properties)
    }
}

#[derive(Debug, Deserialize, Default, PartialEq, Eq)]
pub struct Settings {
    pub server: Server,
}

impl Settings {
    /// Layers defaults, the optional settings file and `ARGON_*`
    /// environment variables, in increasing precedence. For example,
    /// `ARGON_SERVER__WORKERS=8` sets `server.workers`.
    pub fn new(config_file: Option<&Path>) -> Result<Settings, ConfigError> {
        let mut builder = Config::builder().set_default("server", Server::default())?;

        if let Some(path) = config_file {
            builder = builder.add_source(File::from(path));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

/// Finds the settings file. An explicit path must exist. Otherwise the
/// default locations are tried and `None` means none of them exist.
pub fn get_config_file(
    work_dir: &Path,
    arg_config: Option<PathBuf>,
) -> Result<Option<PathBuf>, Box<dyn Error>> {
    if let Some(path) = arg_config {
        return match path.try_exists() {
            Ok(true) if path.is_file() => Ok(Some(path)),
            Ok(_) => Err(format!("no configuration file found. Tried: {}", path.display()).into()),
            Err(e) => {
                Err(format!("failed to open {}, with error: {:?}", path.display(), e).into())
            }
        };
    }

    let config_files = [
        // ./config
        work_dir.join("config").join("argon.toml"),
        // working dir
        work_dir.join("argon.toml"),
    ];

    Ok(config_files.into_iter().find(|p| p.is_file()))
}

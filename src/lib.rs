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

pub mod acceptor;
pub mod app;
pub mod core;
pub mod handler;
pub mod pool;
pub mod request;
pub mod routing;
pub mod vhosts;

use app::Config;
use log::info;
use std::error::Error;

pub fn run(config: &Config) -> Result<(), Box<dyn Error>> {
    info!("starting...");

    {
        let a = app::App::new(config)?;

        info!("started");

        a.run()?;

        info!("stopping...");
    }

    info!("stopped");

    Ok(())
}

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

use argon::core::cliargs::CliArgs;
use argon::core::log;
use clap::Parser;
use std::env;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args = CliArgs::parse();

    let log_file = match &args.log_file {
        Some(path) => match OpenOptions::new().create(true).append(true).open(path) {
            Ok(f) => Some(f),
            Err(e) => {
                eprintln!("error: failed to open log file {}: {}", path, e);
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };

    if let Err(e) = log::init(log::level_filter(args.log_level), log_file) {
        eprintln!("error: failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    let work_dir = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    let config = match args.into_config(&work_dir) {
        Ok(config) => config,
        Err(e) => {
            ::log::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = argon::run(&config) {
        ::log::error!("{}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

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

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::fs::File;
use std::io::{self, Write};
use std::str;
use std::sync::{Mutex, OnceLock};
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

pub struct SimpleLogger {
    local_offset: Option<UtcOffset>,
    output_file: Option<Mutex<File>>,
}

impl SimpleLogger {
    fn write_line(&self, line: &str) -> Result<(), io::Error> {
        match &self.output_file {
            Some(f) => {
                let mut f = f.lock().unwrap_or_else(|e| e.into_inner());
                f.write_all(line.as_bytes())
            }
            None => io::stdout().lock().write_all(line.as_bytes()),
        }
    }
}

impl Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let now = OffsetDateTime::now_utc().to_offset(self.local_offset.unwrap_or(UtcOffset::UTC));

        let format = format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
        );

        let mut ts = [0u8; 64];

        let size = {
            let mut ts = io::Cursor::new(&mut ts[..]);

            if now.format_into(&mut ts, &format).is_err() {
                return;
            }

            ts.position() as usize
        };

        let ts = str::from_utf8(&ts[..size]).unwrap_or("");

        let lname = match record.level() {
            Level::Error => "ERR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };

        // the target is only interesting when debugging
        let line = if record.level() <= Level::Info {
            format!("[{}] {} {}\n", lname, ts, record.args())
        } else {
            format!(
                "[{}] {} [{}] {}\n",
                lname,
                ts,
                record.target(),
                record.args()
            )
        };

        // nowhere left to report a failed log write
        let _ = self.write_line(&line);
    }

    fn flush(&self) {
        if let Some(f) = &self.output_file {
            let _ = f.lock().unwrap_or_else(|e| e.into_inner()).flush();
        }
    }
}

// SAFETY: this method is unsound on platforms where another thread may
// modify environment vars
unsafe fn get_offset() -> Option<UtcOffset> {
    time::util::local_offset::set_soundness(time::util::local_offset::Soundness::Unsound);

    let offset = UtcOffset::current_local_offset().ok();

    time::util::local_offset::set_soundness(time::util::local_offset::Soundness::Sound);

    offset
}

static LOGGER: OnceLock<SimpleLogger> = OnceLock::new();

/// Maps the command line log level, 0 (errors only) through 4 (trace).
pub fn level_filter(level: u32) -> LevelFilter {
    match level {
        0 => LevelFilter::Error,
        1 => LevelFilter::Warn,
        2 => LevelFilter::Info,
        3 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Installs the process logger. May only succeed once per process.
pub fn init(level: LevelFilter, output_file: Option<File>) -> Result<(), SetLoggerError> {
    let logger = LOGGER.get_or_init(|| {
        // SAFETY: called once, at startup, before any other threads exist
        let local_offset = unsafe { get_offset() };

        SimpleLogger {
            local_offset,
            output_file: output_file.map(Mutex::new),
        }
    });

    log::set_logger(logger)?;
    log::set_max_level(level);

    if logger.local_offset.is_none() {
        log::warn!("Failed to determine local time offset. Log timestamps will be in UTC.");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels() {
        assert_eq!(level_filter(0), LevelFilter::Error);
        assert_eq!(level_filter(1), LevelFilter::Warn);
        assert_eq!(level_filter(2), LevelFilter::Info);
        assert_eq!(level_filter(3), LevelFilter::Debug);
        assert_eq!(level_filter(4), LevelFilter::Trace);
        assert_eq!(level_filter(9), LevelFilter::Trace);
    }
}

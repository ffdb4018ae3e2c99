// Copyright 2025 The Mbus Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Logging setup. Every mbus binary calls `init_logger` once at startup; the
//! `-v` flag raises the level from Info to Debug.

use crate::error::Error;
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

const LOG_PATTERN: &str = "[{d(%H:%M:%S%.3f)} {h({l})} {M}] {m}{n}";

/// Install the console logger for this process. Fails with `InvalidState` if
/// a logger is already installed.
pub fn init_logger(verbose: bool) -> Result<(), Error> {
	let level = if verbose {
		LevelFilter::Debug
	} else {
		LevelFilter::Info
	};
	let stdout = ConsoleAppender::builder()
		.encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
		.build();
	let config = Config::builder()
		.appender(Appender::builder().build("stdout", Box::new(stdout)))
		.build(Root::builder().appender("stdout").build(level))
		.map_err(|e| Error::Logger(e.to_string()))?;
	log4rs::init_config(config).map_err(|e| Error::Logger(e.to_string()))?;
	info!("logger initialized at {} level", level);
	Ok(())
}

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

//! The mediator server binary. Runs until SIGINT.

use anyhow::Result;
use clap::Parser;
use mbus_mediator::{Mediator, DEFAULT_ADDRESS, DEFAULT_PORT};
use mbus_util::{logger, Lifecycle};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "mediator", about = "mbus discovery mediator")]
struct Args {
	/// Enable debug logging.
	#[arg(short, long)]
	verbose: bool,
	/// Address to listen on.
	#[arg(long, default_value = DEFAULT_ADDRESS)]
	addr: String,
	/// Port to listen on.
	#[arg(long, default_value_t = DEFAULT_PORT)]
	port: u16,
}

fn main() -> Result<()> {
	let args = Args::parse();
	logger::init_logger(args.verbose)?;
	let lifecycle = Lifecycle::init()?;

	let mediator = Arc::new(Mediator::bind(&args.addr, args.port)?);
	let hook = mediator.clone();
	lifecycle.register_deactivate_routine(move || hook.shutdown());

	mediator.run();
	Ok(())
}

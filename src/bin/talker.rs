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

//! Demo node that publishes a string on a topic twice a second.

use anyhow::Result;
use clap::Parser;
use log::info;
use mbus_mediator::{DEFAULT_ADDRESS, DEFAULT_PORT};
use mbus_node::{Node, StringMessage};
use mbus_util::{logger, Lifecycle};
use std::thread;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "talker", about = "Demo node publishing strings on a topic")]
struct Args {
	/// Enable debug logging.
	#[arg(short, long)]
	verbose: bool,
	/// Mediator address.
	#[arg(long, default_value = DEFAULT_ADDRESS)]
	addr: String,
	/// Mediator port.
	#[arg(long, default_value_t = DEFAULT_PORT)]
	port: u16,
	/// Topic to publish on.
	#[arg(long, default_value = "chatter")]
	topic: String,
}

fn main() -> Result<()> {
	let args = Args::parse();
	logger::init_logger(args.verbose)?;
	let lifecycle = Lifecycle::init()?;

	let node = Node::new("talker", &args.addr, args.port)?;
	let publisher = node.create_publisher::<StringMessage>(&args.topic)?;

	let mut sequence = 0u64;
	while lifecycle.active() && node.connected() {
		let message = StringMessage {
			data: format!("hello mbus #{}", sequence),
		};
		publisher.publish(&message);
		info!("published: {}", message.data);
		sequence += 1;
		thread::sleep(Duration::from_millis(500));
	}
	Ok(())
}

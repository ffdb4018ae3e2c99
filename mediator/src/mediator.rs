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

//! The mediator server: accepts node connections, wires the registry
//! callbacks onto each one and drives the connecting handshake.

use crate::error::Error;
use crate::registry::Registry;
use mbus_socket::{Acceptor, RpcSocket, POLL_INTERVAL};
use mbus_util::to_uri;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

pub const DEFAULT_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 13330;

/// Accepts node connections and maintains the discovery registry. Exactly one
/// mediator can bind a given address and port; a second bind attempt fails.
pub struct Mediator {
	registry: Arc<Registry>,
	acceptor: Acceptor,
	stopped: AtomicBool,
}

impl Mediator {
	/// Bind the listening socket. The mediator does not accept connections
	/// until `run` is called.
	pub fn bind(address: &str, port: u16) -> Result<Mediator, Error> {
		let acceptor = Acceptor::bind(address, port)?;
		Ok(Mediator {
			registry: Arc::new(Registry::new()),
			acceptor,
			stopped: AtomicBool::new(false),
		})
	}

	pub fn with_defaults() -> Result<Mediator, Error> {
		Mediator::bind(DEFAULT_ADDRESS, DEFAULT_PORT)
	}

	pub fn local_addr(&self) -> (String, u16) {
		self.acceptor.local_addr()
	}

	pub fn registry(&self) -> &Registry {
		&self.registry
	}

	/// Accept and register node connections until `shutdown` is called, then
	/// tear everything down. Blocking; typically run on its own thread or as
	/// the main loop of the mediator binary.
	pub fn run(&self) {
		let (address, port) = self.local_addr();
		info!("mediator accepting node connections on {}:{}", address, port);
		while !self.stopped.load(Ordering::SeqCst) {
			match self.acceptor.try_accept_rpc() {
				Ok(Some((connection, peer))) => self.register_connection(connection, peer),
				Ok(None) => {}
				Err(e) => {
					debug!("mediator accept failed: {}", e);
					break;
				}
			}
			thread::sleep(POLL_INTERVAL);
		}
		self.acceptor.close();
		self.registry.shutdown();
		info!("mediator stopped");
	}

	/// Ask `run` to exit. Safe to call from any thread, including a
	/// deactivation hook.
	pub fn shutdown(&self) {
		self.stopped.store(true, Ordering::SeqCst);
	}

	/// Insert the node record and register the callbacks through which this
	/// node drives the registry. Each callback closes over the node's URI, so
	/// payloads never carry it. The connecting handshake runs on its own
	/// thread; a slow node must not stall the accept loop.
	fn register_connection(&self, connection: Arc<RpcSocket>, peer: (String, u16)) {
		let node_uri = to_uri(&peer.0, peer.1);
		info!("node connection from {}", node_uri);
		self.registry.insert_node(&node_uri, connection.clone());

		let registry = self.registry.clone();
		let uri = node_uri.clone();
		connection.register_connecting_callback(move |message| {
			registry.add_node_from_json(&uri, message);
		});

		let registry = self.registry.clone();
		let uri = node_uri.clone();
		connection.register_request_callback("addPublisher", move |message| {
			registry.add_publisher_from_json(&uri, message);
		});

		let registry = self.registry.clone();
		let uri = node_uri.clone();
		connection.register_request_response_callback("addSubscriber", move |message| {
			registry.add_subscriber_from_json(&uri, message)
		});

		let registry = self.registry.clone();
		let uri = node_uri.clone();
		connection.register_request_callback("removePublisher", move |message| {
			registry.remove_topic_member_from_json(&uri, message, true);
		});

		let registry = self.registry.clone();
		let uri = node_uri.clone();
		connection.register_request_callback("removeSubscriber", move |message| {
			registry.remove_topic_member_from_json(&uri, message, false);
		});

		let registry = self.registry.clone();
		let uri = node_uri.clone();
		connection.register_closing_callback(move || {
			registry.remove_node(&uri);
		});

		let handshake = connection.clone();
		let registry = self.registry.clone();
		let spawned = thread::Builder::new()
			.name("mediator_handshake".to_owned())
			.spawn(move || {
				if let Err(e) = handshake.start_connection() {
					debug!("handshake with {} failed: {}", node_uri, e);
					registry.remove_node(&node_uri);
				}
			});
		if let Err(e) = spawned {
			error!("failed to spawn handshake thread: {}", e);
		}
	}
}

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

//! The sending endpoint of a topic. A publisher owns a data listener on an
//! OS-assigned port; subscribers dial it after the mediator hands out the
//! address. Publishing fans a framed message out to every live connection.

use crate::error::Error;
use crate::messages::JsonMessage;
use crate::node::{NodeHandle, PublisherLink};
use mbus_socket::{Acceptor, BsonSocket, POLL_INTERVAL};
use mbus_util::Mutex;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

const DATA_BIND_ADDRESS: &str = "127.0.0.1";

/// Typed sending endpoint for one topic. Created through
/// `Node::create_publisher`; dropping the last handle deregisters it.
pub struct Publisher<M: JsonMessage> {
	topic_name: String,
	address: (String, u16),
	connections: Arc<Mutex<Vec<BsonSocket>>>,
	connected: Arc<AtomicBool>,
	accept_thread: Mutex<Option<JoinHandle<()>>>,
	node: Weak<dyn NodeHandle>,
	_message: PhantomData<fn(M)>,
}

impl<M: JsonMessage> Publisher<M> {
	pub(crate) fn new(
		node: Weak<dyn NodeHandle>,
		topic_name: &str,
	) -> Result<Arc<Publisher<M>>, Error> {
		// Port 0 makes the kernel pick; the acceptor reports the real value,
		// which is sent to the mediator exactly once.
		let acceptor = Acceptor::bind(DATA_BIND_ADDRESS, 0)?;
		let address = acceptor.local_addr();
		debug!(
			"publisher on {} listening for subscribers at {}:{}",
			topic_name, address.0, address.1
		);
		let connections = Arc::new(Mutex::new(Vec::new()));
		let connected = Arc::new(AtomicBool::new(true));

		let thread_connections = connections.clone();
		let thread_connected = connected.clone();
		let thread_topic = topic_name.to_owned();
		let accept_thread = thread::Builder::new()
			.name(format!("pub_accept_{}", topic_name))
			.spawn(move || {
				accept_loop(acceptor, thread_connections, thread_connected, thread_topic)
			})
			.map_err(mbus_socket::Error::from)?;

		Ok(Arc::new(Publisher {
			topic_name: topic_name.to_owned(),
			address,
			connections,
			connected,
			accept_thread: Mutex::new(Some(accept_thread)),
			node,
			_message: PhantomData,
		}))
	}

	pub fn topic_name(&self) -> &str {
		&self.topic_name
	}

	/// The data listener's address and port.
	pub fn address(&self) -> (String, u16) {
		self.address.clone()
	}

	/// Number of subscriber connections currently held.
	pub fn subscriber_count(&self) -> usize {
		self.connections.lock().len()
	}

	/// Send `message` to every connected subscriber. Connections that fail
	/// are dropped in place; there is no user-visible send error. The
	/// connection set is locked for the whole fan-out, so concurrent
	/// publishes and shutdown observe an all-or-nothing send set.
	pub fn publish(&self, message: &M) {
		let value = message.to_json();
		let mut connections = self.connections.lock();
		connections.retain(|connection| match connection.send(&value) {
			Ok(()) => true,
			Err(e) => {
				debug!(
					"publisher on {}: dropping subscriber connection: {}",
					self.topic_name, e
				);
				false
			}
		});
	}
}

impl<M: JsonMessage> PublisherLink for Publisher<M> {
	fn disconnect(&self) {
		self.connected.store(false, Ordering::SeqCst);
	}
}

impl<M: JsonMessage> Drop for Publisher<M> {
	fn drop(&mut self) {
		self.connected.store(false, Ordering::SeqCst);
		if let Some(handle) = self.accept_thread.lock().take() {
			let _ = handle.join();
		}
		if let Some(node) = self.node.upgrade() {
			node.remove_publisher_by_topic(&self.topic_name);
		}
	}
}

fn accept_loop(
	acceptor: Acceptor,
	connections: Arc<Mutex<Vec<BsonSocket>>>,
	connected: Arc<AtomicBool>,
	topic_name: String,
) {
	while connected.load(Ordering::SeqCst) {
		match acceptor.try_accept_data() {
			Ok(Some(socket)) => {
				debug!("publisher on {} accepted a subscriber connection", topic_name);
				connections.lock().push(socket);
			}
			Ok(None) => {}
			Err(e) => {
				debug!("publisher on {}: accept failed: {}", topic_name, e);
				break;
			}
		}
		thread::sleep(POLL_INTERVAL);
	}
	acceptor.close();
	// Dropping the sockets closes them; subscribers observe the hangup.
	connections.lock().clear();
}

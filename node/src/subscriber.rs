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

//! The receiving endpoint of a topic. A subscriber dials every publisher the
//! mediator reports, decodes frames on a receiving thread into a bounded
//! drop-oldest queue, and dispatches to the user callback from `spin` /
//! `spin_once`.

use crate::messages::JsonMessage;
use crate::node::{NodeHandle, SubscriberLink};
use mbus_socket::{BsonSocket, Error, POLL_INTERVAL};
use mbus_util::{to_uri, Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

/// Typed receiving endpoint for one topic. Created through
/// `Node::create_subscriber`; dropping the last handle deregisters it.
pub struct Subscriber<M: JsonMessage> {
	topic_name: String,
	inner: Arc<SubscriberInner<M>>,
	receiving_thread: Mutex<Option<JoinHandle<()>>>,
	spinning_thread: Mutex<Option<JoinHandle<()>>>,
	node: Weak<dyn NodeHandle>,
}

struct SubscriberInner<M> {
	topic_name: String,
	queue_size: usize,
	callback: Box<dyn Fn(M) + Send + Sync>,
	queue: Mutex<VecDeque<M>>,
	queue_not_empty: Condvar,
	connections: Mutex<HashMap<String, Arc<BsonSocket>>>,
	connected: AtomicBool,
}

impl<M: JsonMessage> Subscriber<M> {
	pub(crate) fn new<F>(
		node: Weak<dyn NodeHandle>,
		topic_name: &str,
		queue_size: usize,
		callback: F,
	) -> Arc<Subscriber<M>>
	where
		F: Fn(M) + Send + Sync + 'static,
	{
		Arc::new(Subscriber {
			topic_name: topic_name.to_owned(),
			inner: Arc::new(SubscriberInner {
				topic_name: topic_name.to_owned(),
				queue_size: queue_size.max(1),
				callback: Box::new(callback),
				queue: Mutex::new(VecDeque::new()),
				queue_not_empty: Condvar::new(),
				connections: Mutex::new(HashMap::new()),
				connected: AtomicBool::new(true),
			}),
			receiving_thread: Mutex::new(None),
			spinning_thread: Mutex::new(None),
			node,
		})
	}

	pub fn topic_name(&self) -> &str {
		&self.topic_name
	}

	/// Number of publisher connections currently held.
	pub fn connected_publisher_count(&self) -> usize {
		self.inner.connections.lock().len()
	}

	/// Dial a publisher's data listener. Failures are swallowed — the
	/// publisher may have vanished between discovery and the dial. Dialing an
	/// endpoint already held replaces the old socket; no second receiving
	/// thread is ever started.
	pub fn connect_to_publisher(&self, host: &str, port: u16) {
		let socket = match BsonSocket::connect(host, port) {
			Ok(socket) => socket,
			Err(e) => {
				debug!(
					"subscriber on {}: dialing publisher {}:{} failed: {}",
					self.topic_name, host, port, e
				);
				return;
			}
		};
		if socket.set_read_timeout(Some(POLL_INTERVAL)).is_err() {
			return;
		}
		let uri = to_uri(host, port);
		debug!(
			"subscriber on {} connected to publisher {}",
			self.topic_name, uri
		);
		self.inner.connections.lock().insert(uri, Arc::new(socket));

		let mut receiving = self.receiving_thread.lock();
		if receiving.is_none() {
			let inner = self.inner.clone();
			match thread::Builder::new()
				.name(format!("sub_recv_{}", self.topic_name))
				.spawn(move || receive_loop(inner))
			{
				Ok(handle) => *receiving = Some(handle),
				Err(e) => error!(
					"subscriber on {}: failed to start receiving thread: {}",
					self.topic_name, e
				),
			}
		}
	}

	/// Pop one message (or a default-constructed one if the queue is empty)
	/// and run the callback with it.
	pub fn spin_once(&self) {
		let message = {
			let mut queue = self.inner.queue.lock();
			queue.pop_front()
		}
		.unwrap_or_default();
		(self.inner.callback)(message);
	}

	/// Start the dispatch thread, which blocks on the queue and runs the
	/// callback for each message until the subscriber disconnects. Returns to
	/// the caller immediately.
	pub fn spin(&self) {
		let mut spinning = self.spinning_thread.lock();
		if spinning.is_some() {
			return;
		}
		let inner = self.inner.clone();
		match thread::Builder::new()
			.name(format!("sub_spin_{}", self.topic_name))
			.spawn(move || spin_loop(inner))
		{
			Ok(handle) => *spinning = Some(handle),
			Err(e) => error!(
				"subscriber on {}: failed to start spinning thread: {}",
				self.topic_name, e
			),
		}
	}
}

impl<M: JsonMessage> SubscriberLink for Subscriber<M> {
	fn connect_to_publisher(&self, host: &str, port: u16) {
		Subscriber::connect_to_publisher(self, host, port);
	}

	fn disconnect(&self) {
		self.inner.connected.store(false, Ordering::SeqCst);
	}

	fn spin(&self) {
		Subscriber::spin(self);
	}

	fn spin_once(&self) {
		Subscriber::spin_once(self);
	}
}

impl<M: JsonMessage> Drop for Subscriber<M> {
	fn drop(&mut self) {
		self.inner.connected.store(false, Ordering::SeqCst);
		if let Some(handle) = self.receiving_thread.lock().take() {
			let _ = handle.join();
		}
		if let Some(handle) = self.spinning_thread.lock().take() {
			// The spinning thread may be parked on the queue condvar. A dummy
			// message releases it; the connected check keeps the dummy away
			// from the user callback.
			{
				let mut queue = self.inner.queue.lock();
				queue.push_back(M::default());
			}
			self.inner.queue_not_empty.notify_one();
			let _ = handle.join();
		}
		if let Some(node) = self.node.upgrade() {
			node.remove_subscriber_by_topic(&self.topic_name);
		}
	}
}

fn receive_loop<M: JsonMessage>(inner: Arc<SubscriberInner<M>>) {
	while inner.connected.load(Ordering::SeqCst) {
		// Snapshot under a short lock so new dials never wait on a receive.
		let snapshot: Vec<(String, Arc<BsonSocket>)> = inner
			.connections
			.lock()
			.iter()
			.map(|(uri, socket)| (uri.clone(), socket.clone()))
			.collect();
		if snapshot.is_empty() {
			thread::sleep(POLL_INTERVAL);
			continue;
		}
		let mut dead = Vec::new();
		for (uri, socket) in &snapshot {
			match socket.recv() {
				Ok(value) => {
					let mut message = M::default();
					message.set_from_json(&value);
					let mut queue = inner.queue.lock();
					while queue.len() >= inner.queue_size {
						queue.pop_front();
					}
					let was_empty = queue.is_empty();
					queue.push_back(message);
					drop(queue);
					if was_empty {
						inner.queue_not_empty.notify_one();
					}
				}
				Err(Error::Timeout) => {}
				Err(e) => {
					debug!(
						"subscriber on {}: removing publisher {}: {}",
						inner.topic_name, uri, e
					);
					dead.push(uri.clone());
				}
			}
		}
		if !dead.is_empty() {
			let mut connections = inner.connections.lock();
			for uri in dead {
				connections.remove(&uri);
			}
		}
	}
}

fn spin_loop<M: JsonMessage>(inner: Arc<SubscriberInner<M>>) {
	while inner.connected.load(Ordering::SeqCst) {
		let message = {
			let mut queue = inner.queue.lock();
			while queue.is_empty() {
				inner.queue_not_empty.wait(&mut queue);
			}
			queue.pop_front()
		};
		let message = match message {
			Some(message) => message,
			None => continue,
		};
		if inner.connected.load(Ordering::SeqCst) {
			(inner.callback)(message);
		}
	}
}

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

//! A node: one RPC connection to the mediator plus the publishers and
//! subscribers created through it. The node holds its children weakly; users
//! hold them strongly and dropping the last handle walks back through the
//! node to deregister with the mediator.

use crate::error::Error;
use crate::messages::JsonMessage;
use crate::publisher::Publisher;
use crate::subscriber::Subscriber;
use mbus_socket::RpcSocket;
use mbus_util::{Condvar, Lifecycle, Mutex};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

const MEDIATOR_CONNECT_TIMEOUT_MS: i64 = 10_000;

/// The narrow interface children use to deregister themselves. Held weakly,
/// so an already-dropped node simply makes deregistration a no-op.
pub(crate) trait NodeHandle: Send + Sync {
	fn remove_publisher_by_topic(&self, topic_name: &str);
	fn remove_subscriber_by_topic(&self, topic_name: &str);
}

/// Type-erased view of a publisher, for the node's topic map.
pub(crate) trait PublisherLink: Send + Sync {
	fn disconnect(&self);
}

/// Type-erased view of a subscriber.
pub(crate) trait SubscriberLink: Send + Sync {
	fn connect_to_publisher(&self, host: &str, port: u16);
	fn disconnect(&self);
	fn spin(&self);
	fn spin_once(&self);
}

/// A process's connection to the mbus graph. Dropping the node disconnects
/// it.
pub struct Node {
	inner: Arc<NodeInner>,
}

pub(crate) struct NodeInner {
	node_name: String,
	rpc: Arc<RpcSocket>,
	publishers: Mutex<HashMap<String, Weak<dyn PublisherLink>>>,
	subscribers: Mutex<HashMap<String, Weak<dyn SubscriberLink>>>,
	connected: AtomicBool,
	disconnected: Mutex<bool>,
	disconnect_cvar: Condvar,
}

impl Node {
	/// Connect to the mediator and register this node under `node_name`.
	pub fn new(node_name: &str, mediator_address: &str, mediator_port: u16) -> Result<Node, Error> {
		let connecting_message = json!({ "node_name": node_name });
		let rpc = RpcSocket::connect_to_server(
			mediator_address,
			mediator_port,
			&connecting_message,
			MEDIATOR_CONNECT_TIMEOUT_MS,
		)?;
		let inner = Arc::new(NodeInner {
			node_name: node_name.to_owned(),
			rpc: rpc.clone(),
			publishers: Mutex::new(HashMap::new()),
			subscribers: Mutex::new(HashMap::new()),
			connected: AtomicBool::new(true),
			disconnected: Mutex::new(false),
			disconnect_cvar: Condvar::new(),
		});

		let weak = Arc::downgrade(&inner);
		rpc.register_request_callback("connectSubscriberToPublishers", move |message| {
			if let Some(inner) = weak.upgrade() {
				inner.connect_subscriber_to_publishers(message);
			}
		});
		let weak = Arc::downgrade(&inner);
		rpc.register_closing_callback(move || {
			if let Some(inner) = weak.upgrade() {
				inner.disconnect();
			}
		});
		rpc.start()?;

		// Ctrl-C must tear nodes down the same way a mediator-side close
		// does.
		if let Some(lifecycle) = Lifecycle::try_get() {
			let weak = Arc::downgrade(&inner);
			lifecycle.register_deactivate_routine(move || {
				if let Some(inner) = weak.upgrade() {
					inner.disconnect();
				}
			});
		}
		info!(
			"node {} connected to mediator at {}:{}",
			node_name, mediator_address, mediator_port
		);
		Ok(Node { inner })
	}

	pub fn name(&self) -> &str {
		&self.inner.node_name
	}

	pub fn connected(&self) -> bool {
		self.inner.connected.load(Ordering::SeqCst)
	}

	/// Create a publisher for `topic_name`. At most one publisher per topic
	/// per node.
	pub fn create_publisher<M: JsonMessage>(
		&self,
		topic_name: &str,
	) -> Result<Arc<Publisher<M>>, Error> {
		self.check_connected()?;
		let publisher = {
			let mut publishers = self.inner.publishers.lock();
			if let Some(existing) = publishers.get(topic_name) {
				if existing.upgrade().is_some() {
					return Err(Error::InvalidState(format!(
						"node {} already publishes on topic {}",
						self.inner.node_name, topic_name
					)));
				}
			}
			let node_handle_arc: Arc<dyn NodeHandle> = self.inner.clone();
			let node_handle: Weak<dyn NodeHandle> = Arc::downgrade(&node_handle_arc);
			let publisher = Publisher::new(node_handle, topic_name)?;
			let publisher_arc: Arc<dyn PublisherLink> = publisher.clone();
			let link: Weak<dyn PublisherLink> = Arc::downgrade(&publisher_arc);
			publishers.insert(topic_name.to_owned(), link);
			publisher
		};
		let (address, port) = publisher.address();
		self.inner.rpc.send_request(
			"addPublisher",
			&json!({ "topic_name": topic_name, "address": address, "port": port }),
		)?;
		Ok(publisher)
	}

	/// Create a subscriber for `topic_name` with a bounded queue of
	/// `queue_size` messages. The mediator's reply routes through
	/// `connectSubscriberToPublishers`, which dials every current publisher.
	pub fn create_subscriber<M, F>(
		&self,
		topic_name: &str,
		queue_size: usize,
		callback: F,
	) -> Result<Arc<Subscriber<M>>, Error>
	where
		M: JsonMessage,
		F: Fn(M) + Send + Sync + 'static,
	{
		self.check_connected()?;
		let subscriber = {
			let mut subscribers = self.inner.subscribers.lock();
			if let Some(existing) = subscribers.get(topic_name) {
				if existing.upgrade().is_some() {
					return Err(Error::InvalidState(format!(
						"node {} already subscribes to topic {}",
						self.inner.node_name, topic_name
					)));
				}
			}
			let node_handle_arc: Arc<dyn NodeHandle> = self.inner.clone();
			let node_handle: Weak<dyn NodeHandle> = Arc::downgrade(&node_handle_arc);
			let subscriber = Subscriber::new(node_handle, topic_name, queue_size, callback);
			let subscriber_arc: Arc<dyn SubscriberLink> = subscriber.clone();
			let link: Weak<dyn SubscriberLink> = Arc::downgrade(&subscriber_arc);
			subscribers.insert(topic_name.to_owned(), link);
			subscriber
		};
		self.inner.rpc.send_request_and_get_response(
			"addSubscriber",
			&json!({ "topic_name": topic_name }),
			"connectSubscriberToPublishers",
		)?;
		Ok(subscriber)
	}

	/// Disconnect from the mediator and stop every publisher and subscriber.
	/// Idempotent.
	pub fn disconnect(&self) {
		self.inner.disconnect();
	}

	/// Start every subscriber's dispatch thread, then block until the node
	/// disconnects.
	pub fn spin(&self) {
		for subscriber in self.inner.live_subscribers() {
			subscriber.spin();
		}
		let mut disconnected = self.inner.disconnected.lock();
		while !*disconnected {
			self.inner.disconnect_cvar.wait(&mut disconnected);
		}
	}

	/// Dispatch at most one queued message per subscriber and return.
	pub fn spin_once(&self) {
		for subscriber in self.inner.live_subscribers() {
			subscriber.spin_once();
		}
	}

	fn check_connected(&self) -> Result<(), Error> {
		if !self.connected() {
			return Err(Error::InvalidState(format!(
				"node {} is disconnected",
				self.inner.node_name
			)));
		}
		Ok(())
	}
}

impl Drop for Node {
	fn drop(&mut self) {
		self.inner.disconnect();
	}
}

impl NodeInner {
	fn live_subscribers(&self) -> Vec<Arc<dyn SubscriberLink>> {
		self.subscribers
			.lock()
			.values()
			.filter_map(Weak::upgrade)
			.collect()
	}

	fn live_publishers(&self) -> Vec<Arc<dyn PublisherLink>> {
		self.publishers
			.lock()
			.values()
			.filter_map(Weak::upgrade)
			.collect()
	}

	/// Discovery callback: dial each advertised endpoint for the topic's
	/// subscriber. Unknown topics and duplicate endpoints are ignored.
	fn connect_subscriber_to_publishers(&self, message: &Value) {
		let topic_name = match message.get("topic_name").and_then(Value::as_str) {
			Some(topic_name) => topic_name,
			None => {
				debug!("discovery message without a topic name: {}", message);
				return;
			}
		};
		let subscriber = self
			.subscribers
			.lock()
			.get(topic_name)
			.and_then(Weak::upgrade);
		let subscriber = match subscriber {
			Some(subscriber) => subscriber,
			None => {
				debug!("discovery for topic {} with no local subscriber", topic_name);
				return;
			}
		};
		let addresses = message
			.get("publisher_addresses")
			.and_then(Value::as_array)
			.cloned()
			.unwrap_or_default();
		let ports = message
			.get("publisher_ports")
			.and_then(Value::as_array)
			.cloned()
			.unwrap_or_default();
		for (address, port) in addresses.iter().zip(ports.iter()) {
			if let (Some(host), Some(port)) = (address.as_str(), port.as_u64()) {
				subscriber.connect_to_publisher(host, port as u16);
			}
		}
	}

	pub(crate) fn disconnect(&self) {
		if !self.connected.swap(false, Ordering::SeqCst) {
			return;
		}
		info!("node {} disconnecting", self.node_name);
		self.rpc.close();
		for publisher in self.live_publishers() {
			publisher.disconnect();
		}
		for subscriber in self.live_subscribers() {
			subscriber.disconnect();
		}
		let mut disconnected = self.disconnected.lock();
		*disconnected = true;
		drop(disconnected);
		self.disconnect_cvar.notify_all();
	}
}

impl NodeHandle for NodeInner {
	fn remove_publisher_by_topic(&self, topic_name: &str) {
		self.publishers.lock().remove(topic_name);
		if self.connected.load(Ordering::SeqCst) {
			let _ = self
				.rpc
				.send_request("removePublisher", &json!({ "topic_name": topic_name }));
		}
	}

	fn remove_subscriber_by_topic(&self, topic_name: &str) {
		self.subscribers.lock().remove(topic_name);
		if self.connected.load(Ordering::SeqCst) {
			let _ = self
				.rpc
				.send_request("removeSubscriber", &json!({ "topic_name": topic_name }));
		}
	}
}

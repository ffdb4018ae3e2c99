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

//! The mediator's bookkeeping: which nodes publish and subscribe to which
//! topics, and the live RPC connection to each node.
//!
//! Lock discipline: operations needing both tables take `topic_table` first,
//! then `node_table`. No other nesting is allowed.

use mbus_socket::RpcSocket;
use mbus_util::RwLock;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

type TopicName = String;
type NodeUri = String;

#[derive(Default)]
struct TopicRecord {
	publishing_nodes: HashSet<NodeUri>,
	subscribing_nodes: HashSet<NodeUri>,
}

struct NodeRecord {
	name: String,
	connection: Arc<RpcSocket>,
	publisher_endpoints: HashMap<TopicName, (String, u16)>,
	subscribed_topics: HashSet<TopicName>,
}

/// Topic and node tables. Operations on unknown URIs are idempotent no-ops;
/// a lookup miss is not an error. Topic records are created lazily and may
/// persist empty.
pub struct Registry {
	topic_table: RwLock<HashMap<TopicName, TopicRecord>>,
	node_table: RwLock<HashMap<NodeUri, NodeRecord>>,
}

impl Registry {
	pub fn new() -> Registry {
		Registry {
			topic_table: RwLock::new(HashMap::new()),
			node_table: RwLock::new(HashMap::new()),
		}
	}

	/// Record a freshly accepted connection. The node's name stays blank
	/// until its connecting message arrives.
	pub fn insert_node(&self, uri: &str, connection: Arc<RpcSocket>) {
		let mut nodes = self.node_table.write();
		nodes.insert(
			uri.to_owned(),
			NodeRecord {
				name: String::new(),
				connection,
				publisher_endpoints: HashMap::new(),
				subscribed_topics: HashSet::new(),
			},
		);
	}

	/// Set the node's name, reported once at registration.
	pub fn add_node(&self, uri: &str, name: &str) {
		debug!("add node {} ({})", uri, name);
		let mut nodes = self.node_table.write();
		if let Some(node) = nodes.get_mut(uri) {
			node.name = name.to_owned();
		}
	}

	pub fn add_node_from_json(&self, uri: &str, message: &Value) {
		match message.get("node_name").and_then(Value::as_str) {
			Some(name) => self.add_node(uri, name),
			None => debug!("connecting message from {} carries no node name", uri),
		}
	}

	/// Record a new publisher endpoint and ask every node subscribed to the
	/// topic to dial it.
	pub fn add_publisher(&self, uri: &str, topic: &str, address: &str, port: u16) {
		debug!(
			"add publisher: node {} topic {} at {}:{}",
			uri, topic, address, port
		);
		let subscribers: Vec<NodeUri> = {
			let mut topics = self.topic_table.write();
			let record = topics.entry(topic.to_owned()).or_default();
			record.publishing_nodes.insert(uri.to_owned());
			record.subscribing_nodes.iter().cloned().collect()
		};

		let mut nodes = self.node_table.write();
		if !nodes.contains_key(uri) {
			debug!("add_publisher from unknown node {}", uri);
			drop(nodes);
			let mut topics = self.topic_table.write();
			if let Some(record) = topics.get_mut(topic) {
				record.publishing_nodes.remove(uri);
			}
			return;
		}
		if let Some(node) = nodes.get_mut(uri) {
			node.publisher_endpoints
				.insert(topic.to_owned(), (address.to_owned(), port));
		}

		// Notifications go out while the node table is locked, so a racing
		// removal cannot yank a connection mid-broadcast.
		let notification = json!({
			"topic_name": topic,
			"publisher_addresses": [address],
			"publisher_ports": [port],
		});
		for subscriber_uri in subscribers {
			if let Some(subscriber) = nodes.get(&subscriber_uri) {
				if let Err(e) = subscriber
					.connection
					.send_request("connectSubscriberToPublishers", &notification)
				{
					debug!(
						"notifying {} of publisher on {} failed: {}",
						subscriber_uri, topic, e
					);
				}
			}
		}
	}

	pub fn add_publisher_from_json(&self, uri: &str, message: &Value) {
		let topic = message.get("topic_name").and_then(Value::as_str);
		let address = message.get("address").and_then(Value::as_str);
		let port = message.get("port").and_then(Value::as_u64);
		match (topic, address, port) {
			(Some(topic), Some(address), Some(port)) => {
				self.add_publisher(uri, topic, address, port as u16)
			}
			_ => debug!("malformed addPublisher payload from {}: {}", uri, message),
		}
	}

	/// Record a subscription and return the current publisher endpoints for
	/// the topic as parallel address/port arrays.
	pub fn add_subscriber(&self, uri: &str, topic: &str) -> Value {
		debug!("add subscriber: node {} topic {}", uri, topic);
		let publishers: Vec<NodeUri> = {
			let mut topics = self.topic_table.write();
			let record = topics.entry(topic.to_owned()).or_default();
			record.subscribing_nodes.insert(uri.to_owned());
			record.publishing_nodes.iter().cloned().collect()
		};

		let mut nodes = self.node_table.write();
		if !nodes.contains_key(uri) {
			debug!("add_subscriber from unknown node {}", uri);
			drop(nodes);
			let mut topics = self.topic_table.write();
			if let Some(record) = topics.get_mut(topic) {
				record.subscribing_nodes.remove(uri);
			}
			return publisher_list(topic, Vec::new(), Vec::new());
		}
		if let Some(node) = nodes.get_mut(uri) {
			node.subscribed_topics.insert(topic.to_owned());
		}

		let mut addresses = Vec::new();
		let mut ports = Vec::new();
		for publisher_uri in publishers {
			if let Some(publisher) = nodes.get(&publisher_uri) {
				if let Some((host, port)) = publisher.publisher_endpoints.get(topic) {
					addresses.push(host.clone());
					ports.push(*port);
				}
			}
		}
		publisher_list(topic, addresses, ports)
	}

	pub fn add_subscriber_from_json(&self, uri: &str, message: &Value) -> Value {
		match message.get("topic_name").and_then(Value::as_str) {
			Some(topic) => self.add_subscriber(uri, topic),
			None => {
				debug!("malformed addSubscriber payload from {}: {}", uri, message);
				publisher_list("", Vec::new(), Vec::new())
			}
		}
	}

	pub fn remove_publisher(&self, uri: &str, topic: &str) {
		debug!("remove publisher: node {} topic {}", uri, topic);
		{
			let mut topics = self.topic_table.write();
			if let Some(record) = topics.get_mut(topic) {
				record.publishing_nodes.remove(uri);
			}
		}
		let mut nodes = self.node_table.write();
		if let Some(node) = nodes.get_mut(uri) {
			node.publisher_endpoints.remove(topic);
		}
	}

	pub fn remove_subscriber(&self, uri: &str, topic: &str) {
		debug!("remove subscriber: node {} topic {}", uri, topic);
		{
			let mut topics = self.topic_table.write();
			if let Some(record) = topics.get_mut(topic) {
				record.subscribing_nodes.remove(uri);
			}
		}
		let mut nodes = self.node_table.write();
		if let Some(node) = nodes.get_mut(uri) {
			node.subscribed_topics.remove(topic);
		}
	}

	pub fn remove_topic_member_from_json(&self, uri: &str, message: &Value, publisher: bool) {
		match message.get("topic_name").and_then(Value::as_str) {
			Some(topic) if publisher => self.remove_publisher(uri, topic),
			Some(topic) => self.remove_subscriber(uri, topic),
			None => debug!("malformed remove payload from {}: {}", uri, message),
		}
	}

	/// Strip a node from every topic record and release its connection.
	/// Invoked from the connection's closing callback and therefore never
	/// performs its own closing handshake.
	pub fn remove_node(&self, uri: &str) {
		info!("removing node {}", uri);
		let mut topics = self.topic_table.write();
		let mut nodes = self.node_table.write();
		if let Some(record) = nodes.remove(uri) {
			for topic in record.publisher_endpoints.keys() {
				if let Some(t) = topics.get_mut(topic) {
					t.publishing_nodes.remove(uri);
				}
			}
			for topic in &record.subscribed_topics {
				if let Some(t) = topics.get_mut(topic) {
					t.subscribing_nodes.remove(uri);
				}
			}
			// Dropping the record releases the connection object.
		}
	}

	/// Drop every connection and clear both tables. Remote nodes observe the
	/// hangup and run their own closing routines.
	pub fn shutdown(&self) {
		let mut topics = self.topic_table.write();
		let mut nodes = self.node_table.write();
		for (uri, record) in nodes.drain() {
			debug!("dropping connection to {}", uri);
			record.connection.shutdown();
		}
		topics.clear();
	}

	pub fn node_count(&self) -> usize {
		self.node_table.read().len()
	}

	pub fn contains_node(&self, uri: &str) -> bool {
		self.node_table.read().contains_key(uri)
	}

	pub fn node_name(&self, uri: &str) -> Option<String> {
		self.node_table.read().get(uri).map(|n| n.name.clone())
	}

	pub fn publishers_of(&self, topic: &str) -> Vec<String> {
		let mut uris: Vec<String> = self
			.topic_table
			.read()
			.get(topic)
			.map(|t| t.publishing_nodes.iter().cloned().collect())
			.unwrap_or_default();
		uris.sort();
		uris
	}

	pub fn subscribers_of(&self, topic: &str) -> Vec<String> {
		let mut uris: Vec<String> = self
			.topic_table
			.read()
			.get(topic)
			.map(|t| t.subscribing_nodes.iter().cloned().collect())
			.unwrap_or_default();
		uris.sort();
		uris
	}

	pub fn endpoint_of(&self, uri: &str, topic: &str) -> Option<(String, u16)> {
		self.node_table
			.read()
			.get(uri)
			.and_then(|n| n.publisher_endpoints.get(topic).cloned())
	}

	pub fn subscribed_topics_of(&self, uri: &str) -> Vec<String> {
		let mut topics: Vec<String> = self
			.node_table
			.read()
			.get(uri)
			.map(|n| n.subscribed_topics.iter().cloned().collect())
			.unwrap_or_default();
		topics.sort();
		topics
	}
}

impl Default for Registry {
	fn default() -> Registry {
		Registry::new()
	}
}

fn publisher_list(topic: &str, addresses: Vec<String>, ports: Vec<u16>) -> Value {
	json!({
		"topic_name": topic,
		"publisher_addresses": addresses,
		"publisher_ports": ports,
	})
}

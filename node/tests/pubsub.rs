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

//! End-to-end pub/sub scenarios with a live in-process mediator.

use mbus_mediator::Mediator;
use mbus_node::{CounterMessage, Error, Node, StringMessage};
use mbus_util::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

struct MediatorFixture {
	mediator: Arc<Mediator>,
	run_thread: Option<JoinHandle<()>>,
}

impl MediatorFixture {
	fn start() -> MediatorFixture {
		let _ = env_logger::builder().is_test(true).try_init();
		let mediator = Arc::new(Mediator::bind("127.0.0.1", 0).unwrap());
		let runner = mediator.clone();
		let run_thread = thread::spawn(move || runner.run());
		MediatorFixture {
			mediator,
			run_thread: Some(run_thread),
		}
	}

	fn address(&self) -> (String, u16) {
		self.mediator.local_addr()
	}
}

impl Drop for MediatorFixture {
	fn drop(&mut self) {
		self.mediator.shutdown();
		if let Some(handle) = self.run_thread.take() {
			let _ = handle.join();
		}
	}
}

fn wait_for(predicate: impl Fn() -> bool, timeout: Duration) -> bool {
	let deadline = Instant::now() + timeout;
	while Instant::now() < deadline {
		if predicate() {
			return true;
		}
		thread::sleep(Duration::from_millis(5));
	}
	predicate()
}

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn basic_pub_sub_with_publisher_recreation() {
	let fixture = MediatorFixture::start();
	let (address, port) = fixture.address();

	let node_a = Node::new("a", &address, port).unwrap();
	let received = Arc::new(Mutex::new(Vec::<String>::new()));
	let sink = received.clone();
	let subscriber = node_a
		.create_subscriber("t", 1, move |message: StringMessage| {
			sink.lock().push(message.data);
		})
		.unwrap();
	subscriber.spin();

	let node_b = Node::new("b", &address, port).unwrap();
	let publisher = node_b.create_publisher::<StringMessage>("t").unwrap();
	assert!(wait_for(
		|| publisher.subscriber_count() == 1,
		DISCOVERY_TIMEOUT
	));

	publisher.publish(&StringMessage {
		data: "x".to_owned(),
	});
	assert!(wait_for(
		|| received.lock().contains(&"x".to_owned()),
		DISCOVERY_TIMEOUT
	));

	// Re-creating the publisher after a drop must re-establish delivery.
	drop(publisher);
	assert!(wait_for(
		|| subscriber.connected_publisher_count() == 0,
		DISCOVERY_TIMEOUT
	));

	let publisher = node_b.create_publisher::<StringMessage>("t").unwrap();
	assert!(wait_for(
		|| publisher.subscriber_count() == 1,
		DISCOVERY_TIMEOUT
	));
	publisher.publish(&StringMessage {
		data: "y".to_owned(),
	});
	assert!(wait_for(
		|| received.lock().contains(&"y".to_owned()),
		DISCOVERY_TIMEOUT
	));
}

#[test]
fn late_subscriber_discovers_existing_publisher() {
	let fixture = MediatorFixture::start();
	let (address, port) = fixture.address();

	let node_b = Node::new("b", &address, port).unwrap();
	let publisher = node_b.create_publisher::<StringMessage>("t").unwrap();

	let node_a = Node::new("a", &address, port).unwrap();
	let received = Arc::new(Mutex::new(Vec::<String>::new()));
	let sink = received.clone();
	let subscriber = node_a
		.create_subscriber("t", 4, move |message: StringMessage| {
			sink.lock().push(message.data);
		})
		.unwrap();
	subscriber.spin();

	// The addSubscriber reply carries the existing endpoint.
	assert!(wait_for(
		|| subscriber.connected_publisher_count() == 1,
		DISCOVERY_TIMEOUT
	));
	publisher.publish(&StringMessage {
		data: "late".to_owned(),
	});
	assert!(wait_for(
		|| received.lock().contains(&"late".to_owned()),
		DISCOVERY_TIMEOUT
	));
}

#[test]
fn fan_out_delivers_everything_in_order() {
	const MESSAGES: i64 = 100;
	let fixture = MediatorFixture::start();
	let (address, port) = fixture.address();

	let mut nodes = Vec::new();
	let mut subscribers = Vec::new();
	let mut logs = Vec::new();
	for name in ["s1", "s2", "s3"] {
		let node = Node::new(name, &address, port).unwrap();
		let log = Arc::new(Mutex::new(Vec::<i64>::new()));
		let sink = log.clone();
		let subscriber = node
			.create_subscriber("t", 150, move |message: CounterMessage| {
				sink.lock().push(message.count);
			})
			.unwrap();
		subscriber.spin();
		nodes.push(node);
		subscribers.push(subscriber);
		logs.push(log);
	}

	let publisher_node = Node::new("p", &address, port).unwrap();
	let publisher = publisher_node
		.create_publisher::<CounterMessage>("t")
		.unwrap();
	assert!(wait_for(
		|| publisher.subscriber_count() == 3,
		DISCOVERY_TIMEOUT
	));

	for count in 0..MESSAGES {
		publisher.publish(&CounterMessage { count });
	}

	for log in &logs {
		assert!(wait_for(
			|| log.lock().len() == MESSAGES as usize,
			DISCOVERY_TIMEOUT
		));
		let observed = log.lock().clone();
		let expected: Vec<i64> = (0..MESSAGES).collect();
		assert_eq!(observed, expected);
	}
}

#[test]
fn slow_consumer_keeps_only_the_newest_messages() {
	let fixture = MediatorFixture::start();
	let (address, port) = fixture.address();

	let node_a = Node::new("a", &address, port).unwrap();
	let drained = Arc::new(Mutex::new(Vec::<i64>::new()));
	let sink = drained.clone();
	let subscriber = node_a
		.create_subscriber("t", 2, move |message: CounterMessage| {
			sink.lock().push(message.count);
		})
		.unwrap();

	let node_b = Node::new("b", &address, port).unwrap();
	let publisher = node_b.create_publisher::<CounterMessage>("t").unwrap();
	assert!(wait_for(
		|| publisher.subscriber_count() == 1,
		DISCOVERY_TIMEOUT
	));

	// Nothing drains the queue while these go out, so all but the last two
	// must be evicted, oldest first.
	for count in 0..10 {
		publisher.publish(&CounterMessage { count });
		thread::sleep(Duration::from_millis(5));
	}
	thread::sleep(Duration::from_millis(300));

	subscriber.spin_once();
	subscriber.spin_once();
	assert_eq!(drained.lock().clone(), vec![8, 9]);
}

#[test]
fn subscriber_survives_a_vanished_publisher() {
	let fixture = MediatorFixture::start();
	let (address, port) = fixture.address();

	let node_a = Node::new("a", &address, port).unwrap();
	let received = Arc::new(Mutex::new(Vec::<String>::new()));
	let sink = received.clone();
	let subscriber = node_a
		.create_subscriber("t", 4, move |message: StringMessage| {
			sink.lock().push(message.data);
		})
		.unwrap();
	subscriber.spin();

	let node_b = Node::new("b", &address, port).unwrap();
	let publisher = node_b.create_publisher::<StringMessage>("t").unwrap();
	assert!(wait_for(
		|| publisher.subscriber_count() == 1,
		DISCOVERY_TIMEOUT
	));
	publisher.publish(&StringMessage {
		data: "before".to_owned(),
	});
	assert!(wait_for(|| !received.lock().is_empty(), DISCOVERY_TIMEOUT));

	// The publisher's sockets close; the subscriber notices the hangup,
	// prunes the connection and keeps running.
	drop(publisher);
	assert!(wait_for(
		|| subscriber.connected_publisher_count() == 0,
		DISCOVERY_TIMEOUT
	));
	let seen = received.lock().len();
	thread::sleep(Duration::from_millis(200));
	assert_eq!(received.lock().len(), seen);
}

#[test]
fn node_disconnect_clears_the_registry() {
	let fixture = MediatorFixture::start();
	let (address, port) = fixture.address();

	let node = Node::new("transient", &address, port).unwrap();
	let _publisher = node.create_publisher::<StringMessage>("t").unwrap();
	assert!(wait_for(
		|| fixture.mediator.registry().node_count() == 1,
		DISCOVERY_TIMEOUT
	));
	assert!(wait_for(
		|| !fixture.mediator.registry().publishers_of("t").is_empty(),
		DISCOVERY_TIMEOUT
	));

	drop(_publisher);
	drop(node);
	assert!(wait_for(
		|| fixture.mediator.registry().node_count() == 0,
		DISCOVERY_TIMEOUT
	));
	assert!(fixture.mediator.registry().publishers_of("t").is_empty());
}

#[test]
fn duplicate_topic_endpoints_are_rejected() {
	let fixture = MediatorFixture::start();
	let (address, port) = fixture.address();

	let node = Node::new("dup", &address, port).unwrap();
	let _publisher = node.create_publisher::<StringMessage>("t").unwrap();
	assert!(matches!(
		node.create_publisher::<StringMessage>("t"),
		Err(Error::InvalidState(_))
	));

	let _subscriber = node
		.create_subscriber("t", 2, |_message: StringMessage| {})
		.unwrap();
	assert!(matches!(
		node.create_subscriber("t", 2, |_message: StringMessage| {}),
		Err(Error::InvalidState(_))
	));
}

#[test]
fn repeated_dials_to_one_endpoint_hold_one_connection() {
	let fixture = MediatorFixture::start();
	let (address, port) = fixture.address();

	let node_a = Node::new("a", &address, port).unwrap();
	let received = Arc::new(Mutex::new(Vec::<String>::new()));
	let sink = received.clone();
	let subscriber = node_a
		.create_subscriber("t", 8, move |message: StringMessage| {
			sink.lock().push(message.data);
		})
		.unwrap();
	subscriber.spin();

	let node_b = Node::new("b", &address, port).unwrap();
	let publisher = node_b.create_publisher::<StringMessage>("t").unwrap();
	assert!(wait_for(
		|| subscriber.connected_publisher_count() == 1,
		DISCOVERY_TIMEOUT
	));

	let (publisher_address, publisher_port) = publisher.address();
	subscriber.connect_to_publisher(&publisher_address, publisher_port);
	subscriber.connect_to_publisher(&publisher_address, publisher_port);
	assert_eq!(subscriber.connected_publisher_count(), 1);

	// Wait out the stale accepted sockets, then check a publish is delivered
	// exactly once.
	assert!(wait_for(
		|| publisher.subscriber_count() >= 1,
		DISCOVERY_TIMEOUT
	));
	thread::sleep(Duration::from_millis(100));
	publisher.publish(&StringMessage {
		data: "once".to_owned(),
	});
	assert!(wait_for(
		|| received.lock().iter().any(|data| data == "once"),
		DISCOVERY_TIMEOUT
	));
	thread::sleep(Duration::from_millis(200));
	assert_eq!(
		received
			.lock()
			.iter()
			.filter(|data| data.as_str() == "once")
			.count(),
		1
	);
}

#[test]
fn mediator_shutdown_disconnects_spinning_nodes() {
	let fixture = MediatorFixture::start();
	let (address, port) = fixture.address();

	let node = Arc::new(Node::new("spinner", &address, port).unwrap());
	let _subscriber = node
		.create_subscriber("t", 2, |_message: StringMessage| {})
		.unwrap();

	let spin_returned = Arc::new(AtomicBool::new(false));
	let flag = spin_returned.clone();
	let spin_node = node.clone();
	let spinner = thread::spawn(move || {
		spin_node.spin();
		flag.store(true, Ordering::SeqCst);
	});

	assert!(wait_for(
		|| fixture.mediator.registry().node_count() == 1,
		DISCOVERY_TIMEOUT
	));
	fixture.mediator.shutdown();

	assert!(wait_for(
		|| spin_returned.load(Ordering::SeqCst),
		DISCOVERY_TIMEOUT
	));
	assert!(!node.connected());
	spinner.join().unwrap();
}

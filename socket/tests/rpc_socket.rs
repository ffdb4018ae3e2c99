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

//! RPC socket tests: requests both directions, request/response, connecting
//! and closing callbacks, and the zero-loss close handshake.

use mbus_socket::{Acceptor, Error, RpcSocket};
use mbus_util::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const CONNECT_TIMEOUT_MS: i64 = 5000;

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

/// Build a connected client/server pair. `server_setup` runs before the
/// connecting handshake so server-side callbacks are in place for it; the
/// client's receive loop is left for the caller to start after registering
/// its own callbacks.
fn rpc_pair<S>(connecting_message: Value, server_setup: S) -> (Arc<RpcSocket>, Arc<RpcSocket>)
where
	S: FnOnce(&Arc<RpcSocket>),
{
	let _ = env_logger::builder().is_test(true).try_init();
	let acceptor = Acceptor::bind("127.0.0.1", 0).unwrap();
	let (host, port) = acceptor.local_addr();
	let client_thread = thread::spawn(move || {
		RpcSocket::connect_to_server(&host, port, &connecting_message, CONNECT_TIMEOUT_MS).unwrap()
	});
	let server = loop {
		if let Some((rpc, _peer)) = acceptor.try_accept_rpc().unwrap() {
			break rpc;
		}
		thread::sleep(Duration::from_millis(1));
	};
	server_setup(&server);
	server.start_connection().unwrap();
	let client = client_thread.join().unwrap();
	(client, server)
}

#[test]
fn request_from_server_reaches_client_callback() {
	let payload = json!({
		"message": "correct for request callback 1",
		"ports": [12, 13, 14, 15, 16],
	});
	let received = Arc::new(Mutex::new(Vec::<Value>::new()));

	let (client, server) = rpc_pair(json!({ "node_name": "tester" }), |_server| {});
	let sink = received.clone();
	client.register_request_callback("requestCallback1", move |value| {
		sink.lock().push(value.clone());
	});
	client.start().unwrap();

	server.send_request("requestCallback1", &payload).unwrap();
	assert!(wait_for(
		|| !received.lock().is_empty(),
		Duration::from_secs(2)
	));
	assert_eq!(received.lock().clone(), vec![payload]);
}

#[test]
fn request_from_client_reaches_server_callback() {
	let payload = json!({ "data": "uphill" });
	let received = Arc::new(Mutex::new(Vec::<Value>::new()));
	let sink = received.clone();

	let (client, _server) = rpc_pair(json!({}), move |server| {
		server.register_request_callback("requestCallback1", move |value| {
			sink.lock().push(value.clone());
		});
	});
	client.start().unwrap();

	client.send_request("requestCallback1", &payload).unwrap();
	assert!(wait_for(
		|| !received.lock().is_empty(),
		Duration::from_secs(2)
	));
	assert_eq!(received.lock().clone(), vec![payload]);
}

#[test]
fn request_response_round_trips_through_both_sides() {
	let payload = json!({ "question": "echo me", "id": 42 });
	let answered = Arc::new(Mutex::new(Vec::<Value>::new()));
	let sink = answered.clone();

	let (client, server) = rpc_pair(json!({}), move |server| {
		server.register_request_callback("captureAnswer", move |value| {
			sink.lock().push(value.clone());
		});
	});
	client.register_request_response_callback("echo", |value| value.clone());
	client.start().unwrap();

	server
		.send_request_and_get_response("echo", &payload, "captureAnswer")
		.unwrap();
	assert!(wait_for(
		|| !answered.lock().is_empty(),
		Duration::from_secs(2)
	));
	assert_eq!(answered.lock().clone(), vec![payload]);
}

#[test]
fn connecting_callback_sees_the_connecting_message() {
	let connecting_message = json!({ "node_name": "greeter", "extra": [1, 2] });
	let seen = Arc::new(Mutex::new(Vec::<Value>::new()));
	let sink = seen.clone();

	let (client, _server) = rpc_pair(connecting_message.clone(), move |server| {
		server.register_connecting_callback(move |value| {
			sink.lock().push(value.clone());
		});
	});
	client.start().unwrap();

	assert_eq!(seen.lock().clone(), vec![connecting_message]);
}

#[test]
fn close_handshake_runs_closing_callbacks_once() {
	let client_closings = Arc::new(AtomicUsize::new(0));
	let server_closings = Arc::new(AtomicUsize::new(0));
	let server_counter = server_closings.clone();

	let (client, server) = rpc_pair(json!({}), move |server| {
		let counter = server_counter.clone();
		server.register_closing_callback(move || {
			counter.fetch_add(1, Ordering::SeqCst);
		});
	});
	let counter = client_closings.clone();
	client.register_closing_callback(move || {
		counter.fetch_add(1, Ordering::SeqCst);
	});
	client.start().unwrap();

	client.close();
	assert!(wait_for(
		|| server_closings.load(Ordering::SeqCst) == 1,
		Duration::from_secs(2)
	));
	assert!(wait_for(
		|| client_closings.load(Ordering::SeqCst) == 1,
		Duration::from_secs(2)
	));
	assert!(!client.connected());
	assert!(wait_for(|| !server.connected(), Duration::from_secs(2)));

	// Idempotent: a second close must not run callbacks again.
	client.close();
	server.close();
	assert_eq!(client_closings.load(Ordering::SeqCst), 1);
	assert_eq!(server_closings.load(Ordering::SeqCst), 1);

	assert!(matches!(
		client.send_request("anything", &json!({})),
		Err(Error::InvalidState(_))
	));
}

#[test]
fn every_frame_sent_before_close_is_processed() {
	const REQUESTS: usize = 100;
	let processed = Arc::new(AtomicUsize::new(0));
	let counter = processed.clone();

	let (client, _server) = rpc_pair(json!({}), move |server| {
		server.register_request_callback("count", move |_| {
			counter.fetch_add(1, Ordering::SeqCst);
		});
	});
	client.start().unwrap();

	for i in 0..REQUESTS {
		client.send_request("count", &json!({ "seq": i })).unwrap();
	}
	// The closing frame is the last frame the peer's receive loop reads, so
	// once close returns every prior request has been processed.
	client.close();
	assert_eq!(processed.load(Ordering::SeqCst), REQUESTS);
}

#[test]
fn connect_times_out_without_a_server_handshake() {
	let acceptor = Acceptor::bind("127.0.0.1", 0).unwrap();
	let (host, port) = acceptor.local_addr();
	// Accept the raw stream but never run the connecting handshake.
	let client_thread = thread::spawn(move || {
		RpcSocket::connect_to_server(&host, port, &json!({}), 100)
	});
	let _stream = loop {
		if let Some(accepted) = acceptor.try_accept().unwrap() {
			break accepted;
		}
		thread::sleep(Duration::from_millis(1));
	};
	let result = client_thread.join().unwrap();
	assert!(matches!(result, Err(Error::Timeout)));
}

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

//! Bidirectional RPC over a framed socket. Each side registers named
//! callbacks; frames name the callback to invoke on the peer. Four shapes
//! travel on the wire:
//!
//! - request: `{"callback_name": n, "message": m}`
//! - request/response: the above plus `"response_callback_name"`; the peer's
//!   return value comes back as a plain request to that callback
//! - closing: `{"close": bool}`, the last frame either side processes
//! - connecting tokens `{"reply":"ack"}` / `{"reply":"clr"}` framing a
//!   caller-supplied connecting message during connection setup
//!
//! The closing handshake guarantees zero message loss: the receive loop
//! processes frames strictly in order, so by the time a side sees the closing
//! frame it has handled everything sent before it.

use crate::bson_socket::BsonSocket;
use crate::error::Error;
use crate::POLL_INTERVAL;
use mbus_util::{Condvar, Mutex};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Passed as the connect timeout to wait forever for the server's ack.
pub const INDEFINITE_TIMEOUT: i64 = -1;

// Upper bound on waiting for the peer to mirror a closing frame. A wedged
// peer would otherwise block `close` forever.
const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);

pub type RequestCallback = Arc<dyn Fn(&Value) + Send + Sync>;
pub type RequestResponseCallback = Arc<dyn Fn(&Value) -> Value + Send + Sync>;
pub type ClosingCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
	Fresh,
	HandshakeInProgress,
	Connected,
	Closing,
	Closed,
}

/// One endpoint of an RPC connection. Client and server-accepted sockets are
/// built by different constructors but behave identically once connected.
pub struct RpcSocket {
	socket: BsonSocket,
	state: Mutex<State>,
	connected: AtomicBool,
	request_callbacks: Mutex<HashMap<String, RequestCallback>>,
	request_response_callbacks: Mutex<HashMap<String, RequestResponseCallback>>,
	closing_callback: Mutex<Option<ClosingCallback>>,
	connecting_callback: Mutex<Option<RequestCallback>>,
	sending: Mutex<()>,
	closing_message_received: Mutex<bool>,
	closing_cvar: Condvar,
	receiver_started: AtomicBool,
}

impl RpcSocket {
	fn new(socket: BsonSocket) -> RpcSocket {
		RpcSocket {
			socket,
			state: Mutex::new(State::Fresh),
			connected: AtomicBool::new(false),
			request_callbacks: Mutex::new(HashMap::new()),
			request_response_callbacks: Mutex::new(HashMap::new()),
			closing_callback: Mutex::new(None),
			connecting_callback: Mutex::new(None),
			sending: Mutex::new(()),
			closing_message_received: Mutex::new(false),
			closing_cvar: Condvar::new(),
			receiver_started: AtomicBool::new(false),
		}
	}

	/// Client-side constructor. Connects, performs the connecting handshake
	/// (ack / connecting message / clr) and returns with the socket in the
	/// `Connected` state. `timeout_ms` bounds the wait for the server's ack
	/// only; values below zero wait indefinitely. The receive loop is not yet
	/// running — register callbacks, then call `start`.
	pub fn connect_to_server(
		host: &str,
		port: u16,
		connecting_message: &Value,
		timeout_ms: i64,
	) -> Result<Arc<RpcSocket>, Error> {
		let socket = BsonSocket::connect(host, port)?;
		if timeout_ms >= 0 {
			let timeout = Duration::from_millis((timeout_ms.max(1)) as u64);
			socket.set_read_timeout(Some(timeout))?;
		}
		let rpc = Arc::new(RpcSocket::new(socket));
		*rpc.state.lock() = State::HandshakeInProgress;

		let ack = rpc.socket.recv()?;
		if !is_reply(&ack, "ack") {
			return Err(Error::InvalidMessage(format!(
				"expected connection ack, got {}",
				ack
			)));
		}
		rpc.socket.send(connecting_message)?;
		rpc.socket.set_read_timeout(Some(POLL_INTERVAL))?;
		loop {
			match rpc.socket.recv() {
				Ok(ref reply) if is_reply(reply, "clr") => break,
				Ok(other) => {
					return Err(Error::InvalidMessage(format!(
						"expected connection clear, got {}",
						other
					)))
				}
				Err(Error::Timeout) => continue,
				Err(e) => return Err(e),
			}
		}
		rpc.connected.store(true, Ordering::SeqCst);
		*rpc.state.lock() = State::Connected;
		debug!("rpc client connected to {}:{}", host, port);
		Ok(rpc)
	}

	/// Server-side constructor for a stream handed out by the acceptor. The
	/// connecting handshake is deferred to `start_connection` so callbacks
	/// can be registered first.
	pub fn from_accepted(stream: TcpStream) -> Result<Arc<RpcSocket>, Error> {
		let socket = BsonSocket::from_stream(stream);
		socket.set_read_timeout(Some(POLL_INTERVAL))?;
		Ok(Arc::new(RpcSocket::new(socket)))
	}

	/// Drive the server side of the connecting handshake, then start the
	/// receive loop: send ack, receive the peer's connecting message, hand it
	/// to the connecting callback if one is registered, send clr.
	pub fn start_connection(self: &Arc<Self>) -> Result<(), Error> {
		{
			let mut state = self.state.lock();
			if *state != State::Fresh {
				return Err(Error::InvalidState(format!(
					"connection handshake attempted from {:?}",
					*state
				)));
			}
			*state = State::HandshakeInProgress;
		}
		self.socket.send(&reply_frame("ack"))?;
		let connecting_message = loop {
			match self.socket.recv() {
				Ok(value) => break value,
				Err(Error::Timeout) => continue,
				Err(e) => return Err(e),
			}
		};
		let connecting = self.connecting_callback.lock().clone();
		if let Some(callback) = connecting {
			callback(&connecting_message);
		}
		self.socket.send(&reply_frame("clr"))?;
		self.connected.store(true, Ordering::SeqCst);
		*self.state.lock() = State::Connected;
		self.start()
	}

	/// Spawn the receive loop. The thread holds only a weak reference, so
	/// dropping the last handle to this socket closes the descriptor and the
	/// loop unwinds on its own.
	pub fn start(self: &Arc<Self>) -> Result<(), Error> {
		if self.receiver_started.swap(true, Ordering::SeqCst) {
			return Err(Error::InvalidState(
				"receive loop already started".to_owned(),
			));
		}
		let weak = Arc::downgrade(self);
		thread::Builder::new()
			.name("rpc_receive".to_owned())
			.spawn(move || {
				loop {
					let rpc = match weak.upgrade() {
						Some(rpc) => rpc,
						None => break,
					};
					if rpc.receive_step() {
						break;
					}
				}
				trace!("rpc receive loop exited");
			})?;
		Ok(())
	}

	pub fn connected(&self) -> bool {
		self.connected.load(Ordering::SeqCst)
	}

	pub fn peer_addr(&self) -> Result<SocketAddr, Error> {
		self.socket.peer_addr()
	}

	pub fn register_request_callback<F>(&self, callback_name: &str, callback: F)
	where
		F: Fn(&Value) + Send + Sync + 'static,
	{
		self.request_callbacks
			.lock()
			.insert(callback_name.to_owned(), Arc::new(callback));
		trace!("request callback {} registered", callback_name);
	}

	pub fn register_request_response_callback<F>(&self, callback_name: &str, callback: F)
	where
		F: Fn(&Value) -> Value + Send + Sync + 'static,
	{
		self.request_response_callbacks
			.lock()
			.insert(callback_name.to_owned(), Arc::new(callback));
		trace!("request/response callback {} registered", callback_name);
	}

	/// Run just before the transport closes, on whichever side's receive loop
	/// observes the closing message.
	pub fn register_closing_callback<F>(&self, callback: F)
	where
		F: Fn() + Send + Sync + 'static,
	{
		*self.closing_callback.lock() = Some(Arc::new(callback));
	}

	/// Server side only: receives the connecting message supplied by the
	/// peer's `connect_to_server`.
	pub fn register_connecting_callback<F>(&self, callback: F)
	where
		F: Fn(&Value) + Send + Sync + 'static,
	{
		*self.connecting_callback.lock() = Some(Arc::new(callback));
	}

	/// Invoke the named one-way callback on the peer. Transport failures are
	/// swallowed; the receive loop will observe the closure.
	pub fn send_request(&self, callback_name: &str, argument: &Value) -> Result<(), Error> {
		self.check_connected()?;
		let message = json!({ "callback_name": callback_name, "message": argument });
		let _guard = self.sending.lock();
		if let Err(e) = self.socket.send(&message) {
			debug!("send_request {}: {}", callback_name, e);
		}
		Ok(())
	}

	/// Invoke the named callback on the peer and route its return value back
	/// to `response_callback_name` on this side.
	pub fn send_request_and_get_response(
		&self,
		callback_name: &str,
		argument: &Value,
		response_callback_name: &str,
	) -> Result<(), Error> {
		self.check_connected()?;
		let message = json!({
			"callback_name": callback_name,
			"response_callback_name": response_callback_name,
			"message": argument,
		});
		let _guard = self.sending.lock();
		if let Err(e) = self.socket.send(&message) {
			debug!("send_request_and_get_response {}: {}", callback_name, e);
		}
		Ok(())
	}

	/// Cooperatively close the connection. The initiating side sends a
	/// closing frame and waits until the peer mirrors it, which guarantees
	/// both receive loops have drained every frame sent beforehand.
	/// Idempotent; a no-op once closed.
	pub fn close(&self) {
		{
			let mut state = self.state.lock();
			match *state {
				State::Closed => return,
				State::Fresh | State::HandshakeInProgress => {
					*state = State::Closed;
					self.socket.close();
					return;
				}
				State::Connected | State::Closing => {}
			}
		}
		let initiated = {
			let _guard = self.sending.lock();
			if self.connected.swap(false, Ordering::SeqCst) {
				*self.state.lock() = State::Closing;
				self.send_closing_frame();
				true
			} else {
				false
			}
		};
		if !initiated {
			// The receive loop (or another caller) already owns the
			// handshake and will finish it.
			return;
		}
		let mut received = self.closing_message_received.lock();
		if !*received {
			let result = self.closing_cvar.wait_while_for(
				&mut received,
				|received| !*received,
				CLOSE_HANDSHAKE_TIMEOUT,
			);
			if result.timed_out() {
				error!(
					"rpc close: no closing message from peer within {:?}",
					CLOSE_HANDSHAKE_TIMEOUT
				);
			}
		}
		drop(received);
		*self.state.lock() = State::Closed;
	}

	/// Close the transport without the cooperative handshake. Used when the
	/// process is tearing down and the peer is expected to notice the hangup
	/// on its own.
	pub fn shutdown(&self) {
		self.connected.store(false, Ordering::SeqCst);
		self.socket.close();
		*self.state.lock() = State::Closed;
	}

	/// One iteration of the receive loop. Returns true when the loop should
	/// exit.
	fn receive_step(&self) -> bool {
		let message = match self.socket.recv() {
			Ok(value) => value,
			Err(Error::Timeout) => return false,
			Err(e) => {
				trace!("rpc receive: treating {} as a closing signal", e);
				Value::Null
			}
		};
		let fields = match message.as_object() {
			Some(fields) if !fields.is_empty() && !fields.contains_key("close") => fields.clone(),
			_ => {
				self.handle_closing_message();
				return true;
			}
		};
		if fields.contains_key("response_callback_name") {
			self.process_request_response(&fields);
		} else if fields.contains_key("callback_name") {
			self.process_request(&fields);
		} else {
			debug!("rpc receive: discarding message with unknown shape");
		}
		false
	}

	fn process_request(&self, fields: &Map<String, Value>) {
		let callback_name = match fields.get("callback_name").and_then(Value::as_str) {
			Some(name) => name.to_owned(),
			None => {
				debug!("rpc request with a non-string callback name");
				return;
			}
		};
		let argument = fields.get("message").cloned().unwrap_or(Value::Null);
		// Clone the handler out so user code runs without the table lock.
		let callback = self.request_callbacks.lock().get(&callback_name).cloned();
		match callback {
			Some(callback) => callback(&argument),
			None => debug!("request callback {} not registered", callback_name),
		}
	}

	fn process_request_response(&self, fields: &Map<String, Value>) {
		let callback_name = match fields.get("callback_name").and_then(Value::as_str) {
			Some(name) => name.to_owned(),
			None => {
				debug!("rpc request/response with a non-string callback name");
				return;
			}
		};
		let response_callback_name = match fields
			.get("response_callback_name")
			.and_then(Value::as_str)
		{
			Some(name) => name.to_owned(),
			None => {
				debug!("rpc request/response with a non-string response callback name");
				return;
			}
		};
		let argument = fields.get("message").cloned().unwrap_or(Value::Null);
		let callback = self
			.request_response_callbacks
			.lock()
			.get(&callback_name)
			.cloned();
		let result = match callback {
			Some(callback) => callback(&argument),
			None => {
				debug!("request/response callback {} not registered", callback_name);
				return;
			}
		};
		let response = json!({ "callback_name": response_callback_name, "message": result });
		let _guard = self.sending.lock();
		if let Err(e) = self.socket.send(&response) {
			debug!("rpc response to {} failed: {}", response_callback_name, e);
		}
	}

	/// The closing path of the receive loop: mirror the closing frame if this
	/// side has not already sent one, close the transport, run the closing
	/// callback, then wake anyone blocked in `close`.
	fn handle_closing_message(&self) {
		{
			let _guard = self.sending.lock();
			if self.connected.swap(false, Ordering::SeqCst) {
				self.send_closing_frame();
			}
			self.socket.close();
		}
		let closing = self.closing_callback.lock().take();
		if let Some(callback) = closing {
			callback();
		}
		{
			let mut received = self.closing_message_received.lock();
			*received = true;
		}
		self.closing_cvar.notify_all();
		*self.state.lock() = State::Closed;
	}

	fn send_closing_frame(&self) {
		let has_closing_callback = self.closing_callback.lock().is_some();
		if let Err(e) = self.socket.send(&json!({ "close": has_closing_callback })) {
			trace!("closing frame send failed: {}", e);
		}
	}

	fn check_connected(&self) -> Result<(), Error> {
		if *self.state.lock() != State::Connected {
			return Err(Error::InvalidState(
				"rpc socket is not connected".to_owned(),
			));
		}
		Ok(())
	}
}

impl Drop for RpcSocket {
	fn drop(&mut self) {
		self.socket.close();
	}
}

fn is_reply(value: &Value, token: &str) -> bool {
	value.get("reply").and_then(Value::as_str) == Some(token)
}

fn reply_frame(token: &str) -> Value {
	json!({ "reply": token })
}

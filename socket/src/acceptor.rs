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

//! Non-blocking connection acceptor. Accept loops call `try_accept` between
//! stop-flag checks instead of parking in the kernel.

use crate::bson_socket::BsonSocket;
use crate::error::Error;
use crate::rpc::RpcSocket;
use mbus_util::Mutex;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;

/// Wraps a non-blocking listening socket. Binding to port 0 lets the kernel
/// assign one; `local_addr` reports the recovered value.
pub struct Acceptor {
	listener: Mutex<Option<TcpListener>>,
	local_addr: SocketAddr,
}

impl Acceptor {
	pub fn bind(address: &str, port: u16) -> Result<Acceptor, Error> {
		let listener = TcpListener::bind((address, port))?;
		listener.set_nonblocking(true)?;
		let local_addr = listener.local_addr()?;
		debug!("acceptor listening on {}", local_addr);
		Ok(Acceptor {
			listener: Mutex::new(Some(listener)),
			local_addr,
		})
	}

	/// The bound address and port.
	pub fn local_addr(&self) -> (String, u16) {
		(self.local_addr.ip().to_string(), self.local_addr.port())
	}

	/// Accept a pending connection if the backlog has one, without blocking.
	pub fn try_accept(&self) -> Result<Option<(TcpStream, SocketAddr)>, Error> {
		let guard = self.listener.lock();
		let listener = guard.as_ref().ok_or(Error::SocketClosed)?;
		match listener.accept() {
			Ok((stream, peer_addr)) => {
				// The listener is nonblocking and accepted streams inherit
				// that; flip them back to blocking before use.
				stream.set_nonblocking(false)?;
				Ok(Some((stream, peer_addr)))
			}
			Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
			Err(e) => Err(Error::Io(e)),
		}
	}

	/// Accept a pending connection as a framed data socket.
	pub fn try_accept_data(&self) -> Result<Option<BsonSocket>, Error> {
		match self.try_accept()? {
			Some((stream, _)) => Ok(Some(BsonSocket::from_stream(stream))),
			None => Ok(None),
		}
	}

	/// Accept a pending connection as a server-role RPC socket, returning the
	/// peer host and port alongside it.
	pub fn try_accept_rpc(&self) -> Result<Option<(Arc<RpcSocket>, (String, u16))>, Error> {
		match self.try_accept()? {
			Some((stream, peer_addr)) => {
				let peer = (peer_addr.ip().to_string(), peer_addr.port());
				let rpc = RpcSocket::from_accepted(stream)?;
				Ok(Some((rpc, peer)))
			}
			None => Ok(None),
		}
	}

	/// Stop listening. Idempotent; later `try_accept` calls fail with
	/// `SocketClosed`.
	pub fn close(&self) {
		self.listener.lock().take();
	}
}

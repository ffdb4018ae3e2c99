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

/// Errors surfaced by the socket layer.
#[derive(thiserror::Error, Debug)]
pub enum Error {
	/// Underlying transport failure.
	#[error("connection error: {0}")]
	Io(#[from] std::io::Error),
	/// The peer closed its end of the connection.
	#[error("peer closed the connection")]
	PeerClosed,
	/// This socket has already been closed locally.
	#[error("socket is closed")]
	SocketClosed,
	/// A bounded wait expired before the operation could complete.
	#[error("operation timed out")]
	Timeout,
	/// A frame arrived that could not be decoded, or an outgoing value cannot
	/// be framed.
	#[error("invalid message: {0}")]
	InvalidMessage(String),
	/// The operation is not permitted in the socket's current state.
	#[error("invalid state: {0}")]
	InvalidState(String),
}

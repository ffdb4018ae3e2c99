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

//! A message socket carrying self-delimiting frames over TCP: an 8-byte
//! little-endian length followed by that many bytes of BSON encoding a JSON
//! object. The reader keeps partial frames (and tail bytes of the next frame)
//! buffered across calls, so a configured read timeout lets callers poll
//! their stop flags without losing data.

use crate::error::Error;
use bson::Document;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use mbus_util::Mutex;
use serde_json::Value;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const FRAME_PREFIX_LEN: usize = 8;
const RECV_CHUNK_SIZE: usize = 4096;

// Cap on a single inbound frame. A length beyond this is treated as a corrupt
// stream rather than an allocation request.
const MAX_FRAME_LEN: u64 = 64 * 1024 * 1024;

#[derive(Default)]
struct ReadBuffer {
	buf: Vec<u8>,
}

impl ReadBuffer {
	/// Pop one complete frame body off the front of the buffer, leaving any
	/// tail bytes of the next frame in place.
	fn take_frame(&mut self) -> Result<Option<Vec<u8>>, Error> {
		if self.buf.len() < FRAME_PREFIX_LEN {
			return Ok(None);
		}
		let length = (&self.buf[..FRAME_PREFIX_LEN]).read_u64::<LittleEndian>()?;
		if length > MAX_FRAME_LEN {
			return Err(Error::InvalidMessage(format!(
				"frame length {} exceeds cap of {}",
				length, MAX_FRAME_LEN
			)));
		}
		let total = FRAME_PREFIX_LEN + length as usize;
		if self.buf.len() < total {
			return Ok(None);
		}
		let tail = self.buf.split_off(total);
		let mut frame = std::mem::replace(&mut self.buf, tail);
		frame.drain(..FRAME_PREFIX_LEN);
		Ok(Some(frame))
	}
}

/// A framed message socket. `send` and `recv` take `&self`; the receive
/// buffer is guarded internally so one thread can receive while others send.
pub struct BsonSocket {
	stream: TcpStream,
	open: AtomicBool,
	reader: Mutex<ReadBuffer>,
}

impl BsonSocket {
	/// Connect to a listening peer.
	pub fn connect(host: &str, port: u16) -> Result<BsonSocket, Error> {
		let stream = TcpStream::connect((host, port))?;
		Ok(BsonSocket::from_stream(stream))
	}

	/// Wrap an accepted stream.
	pub fn from_stream(stream: TcpStream) -> BsonSocket {
		BsonSocket {
			stream,
			open: AtomicBool::new(true),
			reader: Mutex::new(ReadBuffer::default()),
		}
	}

	/// Configure how long `recv` blocks before returning `Timeout`. `None`
	/// blocks indefinitely.
	pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<(), Error> {
		self.stream.set_read_timeout(timeout)?;
		Ok(())
	}

	pub fn peer_addr(&self) -> Result<SocketAddr, Error> {
		Ok(self.stream.peer_addr()?)
	}

	pub fn is_open(&self) -> bool {
		self.open.load(Ordering::SeqCst)
	}

	/// Send one JSON object as a single frame. The whole frame is written
	/// before returning; short writes are retried by `write_all`.
	pub fn send(&self, message: &Value) -> Result<(), Error> {
		if !self.is_open() {
			return Err(Error::SocketClosed);
		}
		let document = bson::to_document(message).map_err(|e| {
			Error::InvalidMessage(format!("message does not encode to a BSON document: {}", e))
		})?;
		let mut body = Vec::new();
		document
			.to_writer(&mut body)
			.map_err(|e| Error::InvalidMessage(e.to_string()))?;

		// Probe for a read hangup so we fail fast instead of writing into a
		// connection the peer has already torn down.
		if self.peer_hung_up() {
			return Err(Error::PeerClosed);
		}

		let mut frame = Vec::with_capacity(FRAME_PREFIX_LEN + body.len());
		frame.write_u64::<LittleEndian>(body.len() as u64)?;
		frame.extend_from_slice(&body);
		match (&self.stream).write_all(&frame) {
			Ok(()) => Ok(()),
			Err(ref e)
				if e.kind() == std::io::ErrorKind::BrokenPipe
					|| e.kind() == std::io::ErrorKind::ConnectionReset =>
			{
				Err(Error::PeerClosed)
			}
			Err(e) => Err(Error::Io(e)),
		}
	}

	/// Receive one frame and decode it. Returns `Timeout` when a read timeout
	/// is configured and expires first; any bytes already read stay buffered
	/// for the next call. A reader never consumes more than one frame per
	/// call.
	pub fn recv(&self) -> Result<Value, Error> {
		if !self.is_open() {
			return Err(Error::SocketClosed);
		}
		let mut reader = self.reader.lock();
		loop {
			if let Some(frame) = reader.take_frame()? {
				return decode_frame(&frame);
			}
			let mut chunk = [0u8; RECV_CHUNK_SIZE];
			match (&self.stream).read(&mut chunk) {
				Ok(0) => {
					if !self.is_open() {
						return Err(Error::SocketClosed);
					}
					return Err(Error::PeerClosed);
				}
				Ok(n) => reader.buf.extend_from_slice(&chunk[..n]),
				Err(ref e)
					if e.kind() == std::io::ErrorKind::WouldBlock
						|| e.kind() == std::io::ErrorKind::TimedOut =>
				{
					return Err(Error::Timeout)
				}
				Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
				Err(e) => {
					if !self.is_open() {
						return Err(Error::SocketClosed);
					}
					return Err(Error::Io(e));
				}
			}
		}
	}

	/// Close the socket. Idempotent; subsequent `send`/`recv` calls fail with
	/// `SocketClosed`.
	pub fn close(&self) {
		if self.open.swap(false, Ordering::SeqCst) {
			let _ = self.stream.shutdown(Shutdown::Both);
		}
	}

	/// A zero-byte result from a nonblocking peek means the peer sent a FIN.
	/// The receive side tolerates the transient `WouldBlock` this toggle can
	/// cause, the same way timeouts are tolerated.
	fn peer_hung_up(&self) -> bool {
		if self.stream.set_nonblocking(true).is_err() {
			return false;
		}
		let mut probe = [0u8; 1];
		let hung_up = matches!(self.stream.peek(&mut probe), Ok(0));
		let _ = self.stream.set_nonblocking(false);
		hung_up
	}
}

impl Drop for BsonSocket {
	fn drop(&mut self) {
		self.close();
	}
}

fn decode_frame(bytes: &[u8]) -> Result<Value, Error> {
	let mut reader = bytes;
	let document = Document::from_reader(&mut reader)
		.map_err(|e| Error::InvalidMessage(format!("undecodable BSON frame: {}", e)))?;
	serde_json::to_value(&document).map_err(|e| Error::InvalidMessage(e.to_string()))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn frame_bytes(value: &Value) -> Vec<u8> {
		let document = bson::to_document(value).unwrap();
		let mut body = Vec::new();
		document.to_writer(&mut body).unwrap();
		let mut frame = Vec::new();
		frame.write_u64::<LittleEndian>(body.len() as u64).unwrap();
		frame.extend_from_slice(&body);
		frame
	}

	#[test]
	fn take_frame_handles_partial_and_coalesced_input() {
		let first = serde_json::json!({ "seq": 1, "data": "abc" });
		let second = serde_json::json!({ "seq": 2 });
		let mut bytes = frame_bytes(&first);
		bytes.extend_from_slice(&frame_bytes(&second));

		let mut reader = ReadBuffer::default();

		// Feed the combined stream a few bytes at a time; frames must come
		// out whole and in order with the tail preserved between them.
		let mut decoded = Vec::new();
		for chunk in bytes.chunks(3) {
			reader.buf.extend_from_slice(chunk);
			while let Some(frame) = reader.take_frame().unwrap() {
				decoded.push(decode_frame(&frame).unwrap());
			}
		}
		assert_eq!(decoded, vec![first, second]);
		assert!(reader.buf.is_empty());
	}

	#[test]
	fn take_frame_rejects_oversized_length() {
		let mut reader = ReadBuffer::default();
		reader
			.buf
			.write_u64::<LittleEndian>(MAX_FRAME_LEN + 1)
			.unwrap();
		assert!(matches!(
			reader.take_frame(),
			Err(Error::InvalidMessage(_))
		));
	}
}

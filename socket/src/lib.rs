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

//! Socket layer for mbus. `BsonSocket` moves length-prefixed BSON frames over
//! TCP, `RpcSocket` adds named-callback RPC with connecting and closing
//! handshakes on top of it, and `Acceptor` produces both from a non-blocking
//! listener.

#[macro_use]
extern crate log;

mod acceptor;
mod bson_socket;
mod error;
mod rpc;

pub use crate::acceptor::Acceptor;
pub use crate::bson_socket::BsonSocket;
pub use crate::error::Error;
pub use crate::rpc::{RpcSocket, INDEFINITE_TIMEOUT};

use std::time::Duration;

/// How long background loops sleep or block before re-checking their stop
/// flags. Also the default read timeout on sockets driven by such loops.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

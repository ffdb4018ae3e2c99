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

//! The mbus node runtime. A `Node` keeps one RPC connection to the mediator
//! and hands out typed `Publisher<M>` / `Subscriber<M>` endpoints. Discovery
//! goes through the mediator; message traffic flows directly between nodes.

#[macro_use]
extern crate log;

mod error;
mod messages;
mod node;
mod publisher;
mod subscriber;

pub use crate::error::Error;
pub use crate::messages::{CounterMessage, JsonMessage, StringMessage};
pub use crate::node::Node;
pub use crate::publisher::Publisher;
pub use crate::subscriber::Subscriber;

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

//! The mbus mediator: a registry of nodes, topics, publishers and subscribers
//! plus the RPC server that keeps it current. The mediator only brokers
//! discovery; after a subscriber has dialed a publisher, message traffic is
//! peer-to-peer and the mediator is not on the data path.

#[macro_use]
extern crate log;

mod error;
mod mediator;
mod registry;

pub use crate::error::Error;
pub use crate::mediator::{Mediator, DEFAULT_ADDRESS, DEFAULT_PORT};
pub use crate::registry::Registry;

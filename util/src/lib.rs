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

//! Shared utilities for the mbus crates: the process lifecycle root, logging
//! setup and the lock types used throughout the workspace.

#[macro_use]
extern crate log;

pub mod lifecycle;
pub mod logger;

mod error;

pub use crate::error::Error;
pub use crate::lifecycle::Lifecycle;

// Re-export the lock types so the rest of the workspace agrees on one
// implementation.
pub use parking_lot::{Condvar, Mutex, RwLock};

/// Canonical node/publisher identifier derived from a peer address.
pub fn to_uri(host: &str, port: u16) -> String {
	format!("http://{}:{}", host, port)
}

#[cfg(test)]
mod tests {
	use super::to_uri;

	#[test]
	fn uri_format() {
		assert_eq!(to_uri("127.0.0.1", 13330), "http://127.0.0.1:13330");
	}
}

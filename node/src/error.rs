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

/// Node runtime errors.
#[derive(thiserror::Error, Debug)]
pub enum Error {
	/// Failure in the underlying socket layer.
	#[error("socket error: {0}")]
	Socket(#[from] mbus_socket::Error),
	/// An operation not permitted in the node's current state, such as a
	/// second publisher or subscriber on one topic.
	#[error("invalid state: {0}")]
	InvalidState(String),
}

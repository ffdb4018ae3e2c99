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

//! The message capability and a couple of ready-made message types. The
//! registry is untyped (JSON on the wire); types are re-imposed at the
//! publisher and subscriber endpoints.

use serde_derive::{Deserialize, Serialize};
use serde_json::Value;

/// Capability a type needs to travel on a topic.
pub trait JsonMessage: Default + Send + 'static {
	fn to_json(&self) -> Value;

	/// Overwrite this message from a received JSON value. Implementations
	/// leave the message untouched on values they cannot interpret.
	fn set_from_json(&mut self, value: &Value);
}

/// A single string payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringMessage {
	pub data: String,
}

impl JsonMessage for StringMessage {
	fn to_json(&self) -> Value {
		serde_json::to_value(self).unwrap_or(Value::Null)
	}

	fn set_from_json(&mut self, value: &Value) {
		if let Ok(message) = serde_json::from_value(value.clone()) {
			*self = message;
		}
	}
}

/// A single counter payload, handy for ordering checks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterMessage {
	pub count: i64,
}

impl JsonMessage for CounterMessage {
	fn to_json(&self) -> Value {
		serde_json::to_value(self).unwrap_or(Value::Null)
	}

	fn set_from_json(&mut self, value: &Value) {
		if let Ok(message) = serde_json::from_value(value.clone()) {
			*self = message;
		}
	}
}

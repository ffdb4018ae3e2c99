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

/// Errors from process-wide utilities.
#[derive(thiserror::Error, Debug)]
pub enum Error {
	/// An operation was attempted in a state that does not allow it, such as
	/// initializing the lifecycle root twice.
	#[error("invalid state: {0}")]
	InvalidState(String),
	/// Logger configuration or installation failed.
	#[error("logger setup failed: {0}")]
	Logger(String),
	/// The SIGINT handler could not be installed.
	#[error("signal handler setup failed: {0}")]
	Signal(String),
}

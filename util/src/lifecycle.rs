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

//! The process lifecycle root. A single instance per process holds the active
//! flag and the list of deactivation routines to run on Ctrl-C.

use crate::error::Error;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

static LIFECYCLE: OnceCell<Lifecycle> = OnceCell::new();

type DeactivateRoutine = Arc<dyn Fn() + Send + Sync>;

/// Process-wide active flag plus the deactivation hooks that tear the process
/// down on SIGINT. Initialized at most once per process.
pub struct Lifecycle {
	active: AtomicBool,
	deactivate_routines: Mutex<Vec<DeactivateRoutine>>,
}

impl Lifecycle {
	/// Install the single instance and the SIGINT handler. A second call
	/// fails with `InvalidState`.
	pub fn init() -> Result<&'static Lifecycle, Error> {
		LIFECYCLE
			.set(Lifecycle {
				active: AtomicBool::new(true),
				deactivate_routines: Mutex::new(Vec::new()),
			})
			.map_err(|_| Error::InvalidState("lifecycle root already initialized".to_owned()))?;
		ctrlc::set_handler(|| {
			if let Some(lifecycle) = LIFECYCLE.get() {
				info!("SIGINT received, running deactivation routines");
				lifecycle.deactivate();
			}
		})
		.map_err(|e| Error::Signal(e.to_string()))?;
		LIFECYCLE
			.get()
			.ok_or_else(|| Error::InvalidState("lifecycle root missing after init".to_owned()))
	}

	/// The instance, if `init` has been called.
	pub fn try_get() -> Option<&'static Lifecycle> {
		LIFECYCLE.get()
	}

	/// False once SIGINT has been handled or `deactivate` has been called.
	pub fn active(&self) -> bool {
		self.active.load(Ordering::SeqCst)
	}

	/// Append a routine to run on deactivation. Routines run in registration
	/// order.
	pub fn register_deactivate_routine<F>(&self, routine: F)
	where
		F: Fn() + Send + Sync + 'static,
	{
		self.deactivate_routines.lock().push(Arc::new(routine));
	}

	/// Run every registered routine in order, then clear the active flag.
	/// Also invoked directly by servers and tests that shut down without a
	/// signal.
	pub fn deactivate(&self) {
		// Snapshot so a routine that registers further hooks cannot deadlock
		// against the list lock.
		let routines: Vec<DeactivateRoutine> = self.deactivate_routines.lock().clone();
		for routine in routines {
			routine();
		}
		self.active.store(false, Ordering::SeqCst);
	}
}

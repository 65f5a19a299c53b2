/*
 * Copyright 2025 The MOS Authors
 *
 * This file is part of MOS.
 *
 * MOS is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * MOS is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * MOS. If not, see <https://www.gnu.org/licenses/>.
 */

//! The naive scheduling policy: FIFO over a single runqueue.

use super::SchedulerPolicy;
use crate::{process::thread::Thread, sync::IntMutex};
use alloc::{collections::VecDeque, sync::Arc};

/// FIFO policy state.
pub struct Naive {
	/// The runqueue, under its own lock.
	queue: IntMutex<VecDeque<Arc<Thread>>>,
}

impl Naive {
	/// Creates an empty runqueue.
	pub const fn new() -> Self {
		Self {
			queue: IntMutex::new(VecDeque::new()),
		}
	}
}

impl Default for Naive {
	fn default() -> Self {
		Self::new()
	}
}

/// The naive policy singleton.
pub static NAIVE: Naive = Naive::new();

impl SchedulerPolicy for Naive {
	fn name(&self) -> &'static str {
		"naive"
	}

	fn init(&self) {
		self.queue.lock().clear();
	}

	fn add_thread(&self, thread: Arc<Thread>) {
		let mut queue = self.queue.lock();
		if !queue.iter().any(|t| t.tid == thread.tid) {
			queue.push_back(thread);
		}
	}

	fn remove_thread(&self, thread: &Thread) {
		self.queue.lock().retain(|t| t.tid != thread.tid);
	}

	fn select_next(&self) -> Option<Arc<Thread>> {
		self.queue.lock().pop_front()
	}
}

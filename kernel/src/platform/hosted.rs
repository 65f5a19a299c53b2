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

//! The hosted platform backs the machine interface with host OS threads.
//!
//! Every kernel thread runs on its own host thread, which stands in for a
//! CPU. Blocking parks the host thread on a permit; waking grants the permit.
//! The thread state machine stays authoritative: the platform only ever
//! parks and unparks.

use super::{Platform, PlatformInfo, ThreadEntry};
use crate::process::{
	scheduler,
	thread::{Thread, Tid},
};
use alloc::sync::Arc;
use std::{
	cell::RefCell,
	collections::BTreeMap,
	sync::{Condvar, Mutex as StdMutex},
	thread_local,
	time::Instant,
};

/// A one-permit parking spot for a thread.
#[derive(Default)]
struct Parker {
	permit: StdMutex<bool>,
	cond: Condvar,
}

impl Parker {
	/// Waits until a permit is available and consumes it.
	fn park(&self) {
		let mut permit = self.permit.lock().unwrap();
		while !*permit {
			permit = self.cond.wait(permit).unwrap();
		}
		*permit = false;
	}

	/// Grants a permit, waking the parked thread if any.
	fn unpark(&self) {
		*self.permit.lock().unwrap() = true;
		self.cond.notify_one();
	}
}

thread_local! {
	/// The kernel thread running on this host thread.
	static CURRENT: RefCell<Option<Arc<Thread>>> = const { RefCell::new(None) };
}

/// The hosted platform.
pub struct Hosted {
	info: PlatformInfo,
	/// Parking spots, keyed by thread ID.
	parkers: StdMutex<BTreeMap<Tid, Arc<Parker>>>,
	/// Boot time reference.
	epoch: Instant,
}

impl Hosted {
	/// Creates the platform.
	pub fn new() -> Self {
		Self {
			info: PlatformInfo {
				pml_levels: 4,
				hugepage_max_level: 1,
				nr_cpus: 1,
				syscall_insn_len: 4,
			},
			parkers: StdMutex::new(BTreeMap::new()),
			epoch: Instant::now(),
		}
	}

	fn parker(&self, tid: Tid) -> Arc<Parker> {
		self.parkers
			.lock()
			.unwrap()
			.get(&tid)
			.expect("thread not registered with the platform")
			.clone()
	}

	/// Attaches the calling host thread to the given kernel thread.
	///
	/// Used by the test harness to turn the test runner itself into a kernel
	/// thread.
	pub fn adopt_current(thread: Arc<Thread>) {
		CURRENT.with(|c| *c.borrow_mut() = Some(thread));
	}

	/// Detaches the calling host thread.
	pub fn disown_current() {
		CURRENT.with(|c| *c.borrow_mut() = None);
	}
}

impl Default for Hosted {
	fn default() -> Self {
		Self::new()
	}
}

impl Platform for Hosted {
	fn info(&self) -> &PlatformInfo {
		&self.info
	}

	fn console_write(&self, s: &str) {
		std::eprint!("{s}");
	}

	fn current_thread(&self) -> Option<Arc<Thread>> {
		CURRENT.with(|c| c.borrow().clone())
	}

	fn register_thread(&self, thread: &Arc<Thread>) {
		self.parkers
			.lock()
			.unwrap()
			.insert(thread.tid, Arc::new(Parker::default()));
	}

	fn unregister_thread(&self, thread: &Thread) {
		self.parkers.lock().unwrap().remove(&thread.tid);
	}

	fn spawn_thread(&self, thread: Arc<Thread>, entry: ThreadEntry) {
		let tid = thread.tid;
		let parker = self.parker(tid);
		std::thread::Builder::new()
			.name(std::format!("kthread-{tid}"))
			.spawn(move || {
				CURRENT.with(|c| *c.borrow_mut() = Some(thread));
				// Wait until the scheduler makes the thread runnable
				parker.park();
				scheduler::thread_startup();
				entry();
				crate::process::thread::exit_current();
			})
			.expect("failed to spawn host thread");
	}

	fn block_current(&self) {
		let thread = self.current_thread().expect("blocking with no thread");
		self.parker(thread.tid).park();
	}

	fn unblock(&self, thread: &Thread) {
		self.parker(thread.tid).unpark();
	}

	fn yield_now(&self) {
		std::thread::yield_now();
	}

	fn now_ms(&self) -> u64 {
		self.epoch.elapsed().as_millis() as u64
	}

	fn sleep_ms(&self, ms: u64) {
		std::thread::sleep(std::time::Duration::from_millis(ms));
	}

	fn poweroff(&self, reboot: bool) -> ! {
		panic!("hosted poweroff (reboot={reboot})");
	}

	fn halt(&self) -> ! {
		panic!("hosted halt");
	}
}

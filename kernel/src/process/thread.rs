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

//! Threads.
//!
//! A thread is the unit of scheduling. Its state machine is:
//!
//! ```text
//! CREATED ──add──► READY ──pick──► RUNNING ──block──► BLOCKED
//!                    ▲                │                │
//!                    └────wake────────┘                │
//!                         RUNNING ──exit──► DEAD ◄─────┘
//! ```
//!
//! Transitions happen under the thread's state lock; only the scheduler sets
//! `Running`.

use super::{pid, wait::WaitList, Process};
use crate::{
	memory::VirtAddr,
	platform::{self, UserContext},
	process::signal::SignalState,
	sync::{IntMutex, Mutex},
};
use alloc::{
	collections::BTreeMap,
	string::{String, ToString},
	sync::{Arc, Weak},
};
use core::fmt;

/// A thread identifier.
pub type Tid = u32;

/// The privilege mode a thread executes in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ThreadMode {
	/// Kernel thread.
	Kernel,
	/// Userspace thread.
	User,
}

/// The scheduling state of a thread.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ThreadState {
	/// Created, not yet known to the scheduler.
	Created,
	/// Eligible to run.
	Ready,
	/// Currently executing on a CPU.
	Running,
	/// Waiting on a waitlist; signals wake it early.
	Blocked,
	/// Waiting and deaf to signals.
	NonInterruptible,
	/// Exited.
	Dead,
}

impl ThreadState {
	/// Single-character rendering for diagnostics.
	pub fn as_char(self) -> char {
		match self {
			Self::Created => 'C',
			Self::Ready => 'R',
			Self::Running => 'r',
			Self::Blocked => 'B',
			Self::NonInterruptible => 'N',
			Self::Dead => 'D',
		}
	}
}

/// Description of a thread's user stack.
#[derive(Clone, Copy, Debug, Default)]
pub struct StackInfo {
	/// Lowest address of the stack mapping.
	pub base: VirtAddr,
	/// Size in pages.
	pub pages: usize,
}

/// A thread of execution.
pub struct Thread {
	/// The thread's ID.
	pub tid: Tid,
	/// The privilege mode.
	pub mode: ThreadMode,
	/// The thread's name.
	pub name: Mutex<String>,
	/// The owning process.
	process: Mutex<Weak<Process>>,
	/// The scheduling state, under the state lock.
	state: IntMutex<ThreadState>,
	/// Per-thread signal state.
	pub signals: Mutex<SignalState>,
	/// Threads waiting for this one to die.
	pub waiters: WaitList,
	/// Saved user-mode registers.
	pub user_ctx: Mutex<UserContext>,
	/// The user stack, if any.
	pub ustack: Mutex<StackInfo>,
}

/// Every live thread, by TID.
static THREADS: Mutex<BTreeMap<Tid, Arc<Thread>>> = Mutex::new(BTreeMap::new());

impl Thread {
	/// Creates a thread in the `Created` state and registers it.
	pub fn new(mode: ThreadMode, name: &str) -> Arc<Self> {
		let thread = Arc::new(Self {
			tid: pid::alloc_tid(),
			mode,
			name: Mutex::new(name.to_string()),
			process: Mutex::new(Weak::new()),
			state: IntMutex::new(ThreadState::Created),
			signals: Mutex::new(SignalState::default()),
			waiters: WaitList::new(),
			user_ctx: Mutex::new(UserContext::default()),
			ustack: Mutex::new(StackInfo::default()),
		});
		THREADS.lock().insert(thread.tid, thread.clone());
		platform::platform().register_thread(&thread);
		thread
	}

	/// The thread running on the current CPU.
	///
	/// Panics outside of thread context.
	pub fn current() -> Arc<Self> {
		platform::platform()
			.current_thread()
			.expect("no current thread")
	}

	/// The thread running on the current CPU, if any.
	pub fn try_current() -> Option<Arc<Self>> {
		platform::try_platform()?.current_thread()
	}

	/// The owning process.
	pub fn process(&self) -> Arc<Process> {
		self.process
			.lock()
			.upgrade()
			.expect("thread without a process")
	}

	/// Attaches the thread to its owning process. Called once.
	pub(super) fn attach(&self, proc: &Arc<Process>) {
		*self.process.lock() = Arc::downgrade(proc);
	}

	/// The current scheduling state.
	pub fn state(&self) -> ThreadState {
		*self.state.lock()
	}

	/// Locks the state for a transition.
	pub(crate) fn state_lock(&self) -> crate::sync::mutex::MutexGuard<'_, ThreadState> {
		self.state.lock()
	}

	/// Tells whether the thread has exited.
	pub fn is_dead(&self) -> bool {
		self.state() == ThreadState::Dead
	}
}

impl fmt::Debug for Thread {
	fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			fmt,
			"[t{} '{}' {}]",
			self.tid,
			self.name.lock(),
			self.state().as_char()
		)
	}
}

/// Returns the thread with the given TID, if it is still alive.
pub fn get(tid: Tid) -> Option<Arc<Thread>> {
	THREADS.lock().get(&tid).cloned()
}

/// Terminates the current thread.
///
/// Marks it dead, wakes joiners and unregisters it everywhere. In a bare
/// metal build this never returns; in the hosted build the caller's host
/// thread unwinds naturally afterwards.
pub fn exit_current() {
	let thread = Thread::current();
	exit_thread(&thread);
}

/// Terminates the given thread on its behalf. It must not be running.
pub(super) fn exit_thread(thread: &Arc<Thread>) {
	{
		let mut state = thread.state_lock();
		if *state == ThreadState::Dead {
			return;
		}
		*state = ThreadState::Dead;
	}
	super::scheduler::policy().remove_thread(thread);
	// Wake joiners, and refuse new ones
	thread.waiters.close();
	thread.waiters.wake_all();
	// Detach from the process; the last thread out marks the process exited
	let proc = thread.process();
	let last = proc.detach_thread(thread);
	if last && !proc.is_exited() {
		proc.mark_exited(0, None);
	}
	THREADS.lock().remove(&thread.tid);
	platform::platform().unregister_thread(thread);
	pid::free_tid(thread.tid);
}

/// Blocks until the given thread dies.
///
/// Returns `false` if interrupted by a signal.
pub fn join(thread: &Arc<Thread>) -> bool {
	loop {
		if thread.is_dead() {
			return true;
		}
		if !super::scheduler::reschedule_for_waitlist(&thread.waiters) {
			// Closed: the thread is dying or dead
			return true;
		}
		if crate::process::signal::has_pending() {
			return false;
		}
	}
}

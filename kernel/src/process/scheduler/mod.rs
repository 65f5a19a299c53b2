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

//! The scheduler.
//!
//! Scheduling is parallel and preemptive across CPUs, cooperative within a
//! trap frame. The policy is pluggable; the reference policy is a FIFO
//! runqueue. The scheduler owns every thread state transition except
//! creation: a thread becomes `Ready` when added or woken, `Running` only
//! here, and `Blocked` only through [`reschedule_for_waitlist`].

pub mod naive;

use super::{
	thread::{Thread, ThreadState},
	wait::WaitList,
};
use crate::{cmdline, platform, sync::OnceInit};
use alloc::sync::Arc;

/// A scheduling policy.
pub trait SchedulerPolicy: Send + Sync {
	/// The policy's name, matched against `scheduler=<name>`.
	fn name(&self) -> &'static str;
	/// One-time initialization when the policy is elected.
	fn init(&self);
	/// Hands a runnable thread to the policy.
	fn add_thread(&self, thread: Arc<Thread>);
	/// Takes a thread away from the policy.
	fn remove_thread(&self, thread: &Thread);
	/// Picks the next thread to run, if any.
	fn select_next(&self) -> Option<Arc<Thread>>;
}

/// Every built-in policy.
static POLICIES: &[&dyn SchedulerPolicy] = &[&naive::NAIVE];

/// The elected policy.
static ACTIVE: OnceInit<&'static dyn SchedulerPolicy> = OnceInit::new();

/// Elects the scheduling policy, honoring `scheduler=<name>` from the
/// command line, and initializes it.
pub fn init() {
	let policy = match cmdline::scheduler_name() {
		Some(name) => match POLICIES.iter().find(|p| p.name() == name) {
			Some(p) => *p,
			None => {
				pr_warn!("scheduler '{name}' not found, using the first scheduler");
				POLICIES[0]
			}
		},
		None => POLICIES[0],
	};
	policy.init();
	pr_info!("active scheduler: {}", policy.name());
	ACTIVE.init(policy);
}

/// The elected policy.
pub fn policy() -> &'static dyn SchedulerPolicy {
	*ACTIVE.get()
}

/// Makes a created or ready thread runnable.
pub fn add_thread(thread: &Arc<Thread>) {
	{
		let mut state = thread.state_lock();
		debug_assert!(
			matches!(*state, ThreadState::Created | ThreadState::Ready),
			"adding thread in invalid state"
		);
		*state = ThreadState::Ready;
	}
	policy().add_thread(thread.clone());
	platform::platform().unblock(thread);
}

/// Wakes a blocked thread.
///
/// A thread that has not reached its sleep yet still gets a wake permit, so
/// a wake racing ahead of the sleep is never lost; the sleeper's predicate
/// loop absorbs the resulting spurious wakeup.
pub fn wake_thread(thread: &Arc<Thread>) {
	let transitioned = {
		let mut state = thread.state_lock();
		match *state {
			ThreadState::Dead => return,
			ThreadState::Blocked | ThreadState::NonInterruptible => {
				*state = ThreadState::Ready;
				true
			}
			_ => false,
		}
	};
	if transitioned {
		pr_debug!(scheduler, "waking up {thread:?}");
		policy().add_thread(thread.clone());
	}
	platform::platform().unblock(thread);
}

/// Like [`wake_thread`], but leaves non-interruptible sleepers alone.
///
/// The signal layer uses this: a non-interruptible block ignores signals
/// until it completes.
pub fn wake_thread_for_signal(thread: &Arc<Thread>) {
	let transitioned = {
		let mut state = thread.state_lock();
		match *state {
			ThreadState::Dead | ThreadState::NonInterruptible => return,
			ThreadState::Blocked => {
				*state = ThreadState::Ready;
				true
			}
			_ => false,
		}
	};
	if transitioned {
		policy().add_thread(thread.clone());
	}
	platform::platform().unblock(thread);
}

/// First transition of a freshly-started thread, from `Ready` to `Running`.
pub fn thread_startup() {
	let thread = Thread::current();
	{
		let mut state = thread.state_lock();
		debug_assert_eq!(*state, ThreadState::Ready);
		*state = ThreadState::Running;
	}
	policy().remove_thread(&thread);
}

/// Yields the CPU, giving other runnable threads a chance.
pub fn yield_now() {
	let thread = Thread::current();
	{
		let mut state = thread.state_lock();
		if *state != ThreadState::Running {
			return;
		}
		*state = ThreadState::Ready;
	}
	policy().add_thread(thread.clone());
	platform::platform().yield_now();
	{
		let mut state = thread.state_lock();
		*state = ThreadState::Running;
	}
	policy().remove_thread(&thread);
}

/// Blocks the current thread in the given state until woken.
fn blocked_reschedule(target: ThreadState) {
	let thread = Thread::current();
	{
		let mut state = thread.state_lock();
		debug_assert_eq!(*state, ThreadState::Running);
		*state = target;
	}
	pr_debug!(scheduler, "{thread:?} is now blocked");
	platform::platform().block_current();
	{
		// A real wake left us Ready; a stale permit leaves the blocked
		// state in place — either way we run now
		let mut state = thread.state_lock();
		*state = ThreadState::Running;
	}
	policy().remove_thread(&thread);
}

/// Blocks the current thread after the caller has already queued it on a
/// waitlist.
///
/// Used by the rendezvous paths that must queue themselves *before* waking
/// their counterpart.
pub fn block_current() {
	blocked_reschedule(ThreadState::Blocked);
}

/// Atomically appends the current thread to `waitlist` and blocks.
///
/// Returns `false` if the waitlist is closed, without blocking. Wakeup by a
/// signal also returns here; no residue is left on the list either way.
pub fn reschedule_for_waitlist(waitlist: &WaitList) -> bool {
	debug_assert!(
		Thread::current().state() != ThreadState::Blocked,
		"thread is already blocked"
	);
	if !waitlist.append() {
		return false;
	}
	blocked_reschedule(ThreadState::Blocked);
	waitlist.remove_me();
	true
}

/// Like [`reschedule_for_waitlist`], but deaf to signals.
pub fn reschedule_for_waitlist_noninterruptible(waitlist: &WaitList) -> bool {
	if !waitlist.append() {
		return false;
	}
	blocked_reschedule(ThreadState::NonInterruptible);
	waitlist.remove_me();
	true
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::{
		process::thread::ThreadMode,
		selftest,
	};

	#[test]
	fn fifo_policy_order() {
		selftest::ensure_booted();
		// A private runqueue: the live one serves the other tests
		let policy = naive::Naive::new();
		let a = Thread::new(ThreadMode::Kernel, "sched-a");
		let b = Thread::new(ThreadMode::Kernel, "sched-b");
		// Threads enter and leave in FIFO order
		policy.add_thread(a.clone());
		policy.add_thread(b.clone());
		assert_eq!(policy.select_next().unwrap().tid, a.tid);
		assert_eq!(policy.select_next().unwrap().tid, b.tid);
		assert!(policy.select_next().is_none());
		// Removal takes a queued thread out
		policy.add_thread(a.clone());
		policy.add_thread(b.clone());
		policy.remove_thread(&a);
		assert_eq!(policy.select_next().unwrap().tid, b.tid);
		assert!(policy.select_next().is_none());
		crate::platform::platform().unregister_thread(&a);
		crate::platform::platform().unregister_thread(&b);
	}
}

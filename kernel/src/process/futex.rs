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

//! Futexes.
//!
//! The key of a futex is the physical address backing the user word, so
//! forked mappings share a futex exactly when they share the underlying
//! frame.

use super::{scheduler, wait::WaitList, Process};
use crate::{memory::VirtAddr, sync::Mutex};
use alloc::{collections::BTreeMap, sync::Arc};
use utils::errno::EResult;

/// Waitlists keyed by the futex word's physical address.
static FUTEXES: Mutex<BTreeMap<usize, Arc<WaitList>>> = Mutex::new(BTreeMap::new());

/// Returns the waitlist for the given key, creating it on first use.
fn bucket(key: usize) -> Arc<WaitList> {
	FUTEXES
		.lock()
		.entry(key)
		.or_insert_with(|| Arc::new(WaitList::new()))
		.clone()
}

/// Blocks until a wake on the futex word at `uaddr`.
///
/// If the word's current value differs from `expected`, the function returns
/// `false` immediately: this is the guard against lost wakeups when another
/// thread changed the word and issued its wake before we went to sleep.
pub fn wait(uaddr: VirtAddr, expected: u32) -> EResult<bool> {
	let mm = Process::current().mm();
	let current: u32 = mm.read_obj(uaddr)?;
	if current != expected {
		return Ok(false);
	}
	let key = mm.get_phys(uaddr)?.0;
	let waiters = bucket(key);
	pr_debug!(futex, "tid {} waiting on key {key:#x}", super::thread::Thread::current().tid);
	let ok = scheduler::reschedule_for_waitlist(&waiters);
	debug_assert!(ok);
	pr_debug!(futex, "tid {} woke up", super::thread::Thread::current().tid);
	Ok(true)
}

/// Wakes up to `count` waiters on the futex word at `uaddr`.
pub fn wake(uaddr: VirtAddr, count: usize) -> EResult<bool> {
	let mm = Process::current().mm();
	let key = mm.get_phys(uaddr)?.0;
	let waiters = FUTEXES.lock().get(&key).cloned();
	if let Some(waiters) = waiters {
		waiters.wake(count);
	}
	Ok(true)
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::{
		memory::paging::VmFlags,
		process::mem_space::{MmapFlags, VmaContent},
		selftest,
	};

	#[test]
	fn mismatch_returns_immediately() {
		let run = selftest::spawn_process("futex-mismatch", || {
			let mm = Process::current().mm();
			let addr = mm
				.map_anonymous(
					VirtAddr(0),
					MmapFlags::PRIVATE,
					VmFlags::READ | VmFlags::WRITE,
					1,
					VmaContent::Mmap,
				)
				.unwrap();
			mm.write_obj(addr, &7u32).unwrap();
			// The lost-wakeup guard: the word changed, do not sleep
			assert!(!wait(addr, 0).unwrap());
		});
		run.join();
	}

	#[test]
	fn wait_then_wake() {
		let run = selftest::spawn_process("futex-main", || {
			let proc = Process::current();
			let mm = proc.mm();
			let addr = mm
				.map_anonymous(
					VirtAddr(0),
					MmapFlags::PRIVATE,
					VmFlags::READ | VmFlags::WRITE,
					1,
					VmaContent::Mmap,
				)
				.unwrap();
			mm.write_obj(addr, &0u32).unwrap();
			let waiter = selftest::spawn_thread_in(&proc, "futex-waiter", move || {
				let mm = Process::current().mm();
				// Spurious wakeups re-check the word
				loop {
					let val: u32 = mm.read_obj(addr).unwrap();
					if val != 0 {
						break val;
					}
					wait(addr, 0).unwrap();
				}
			});
			// Let the waiter park, then publish and wake
			while waiter.thread.state() != crate::process::thread::ThreadState::Blocked {
				crate::process::scheduler::yield_now();
			}
			mm.write_obj(addr, &1u32).unwrap();
			wake(addr, 1).unwrap();
			assert_eq!(waiter.join(), 1);
		});
		run.join();
	}
}

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

//! Process and thread identifier allocation.
//!
//! PID 1 is init and PID 2 is kthreadd; both are allocated during the
//! `KTHREAD` init phase and never freed.

use crate::sync::Mutex;
use utils::collections::id_allocator::IDAllocator;

/// A process identifier.
pub type Pid = u32;

/// The PID of the init process.
pub const INIT_PID: Pid = 1;
/// The PID of the kernel thread daemon.
pub const KTHREADD_PID: Pid = 2;

/// The PID allocator.
static PIDS: Mutex<IDAllocator> = Mutex::new(IDAllocator::new(1));
/// The TID allocator.
static TIDS: Mutex<IDAllocator> = Mutex::new(IDAllocator::new(1));

/// Allocates a process identifier.
pub fn alloc_pid() -> Pid {
	PIDS.lock().alloc()
}

/// Frees a process identifier.
pub fn free_pid(pid: Pid) {
	PIDS.lock().free(pid);
}

/// Allocates a thread identifier.
pub fn alloc_tid() -> u32 {
	TIDS.lock().alloc()
}

/// Frees a thread identifier.
pub fn free_tid(tid: u32) {
	TIDS.lock().free(tid);
}

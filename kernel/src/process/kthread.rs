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

//! Kernel threads.
//!
//! Kernel threads belong to kthreadd (PID 2) and run entirely in kernel
//! mode. They end when their entry function returns.

use super::{
	scheduler,
	thread::{Thread, ThreadMode},
};
use crate::platform;
use alloc::{boxed::Box, sync::Arc};

/// Spawns a kernel thread running `entry` under kthreadd.
pub fn spawn<F: FnOnce() + Send + 'static>(name: &str, entry: F) -> Arc<Thread> {
	spawn_in(&super::kthreadd(), name, entry)
}

/// Spawns a kernel-mode thread in the given process.
///
/// Used by kernel subsystems and by the hosted harness, which models user
/// processes with kernel-mode bodies.
pub fn spawn_in<F: FnOnce() + Send + 'static>(
	proc: &Arc<super::Process>,
	name: &str,
	entry: F,
) -> Arc<Thread> {
	let thread = Thread::new(ThreadMode::Kernel, name);
	proc.attach_thread(&thread);
	scheduler::add_thread(&thread);
	platform::platform().spawn_thread(thread.clone(), Box::new(entry));
	thread
}

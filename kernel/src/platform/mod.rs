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

//! The platform interface.
//!
//! Everything architecture-specific lives behind this narrow interface: the
//! console, CPU-local state, context switching and power control. The rest of
//! the kernel is platform-neutral.
//!
//! The `hosted` implementation backs this interface with host OS threads so
//! the whole kernel runs under a test harness.

#[cfg(any(test, feature = "hosted"))]
pub mod hosted;

use crate::{process::thread::Thread, sync::OnceInit};
use alloc::{boxed::Box, sync::Arc};
use utils::bytes::AnyRepr;

/// Entry point of a kernel thread.
pub type ThreadEntry = Box<dyn FnOnce() + Send + 'static>;

/// Static description of the platform's paging capability.
#[derive(Clone, Debug)]
pub struct PlatformInfo {
	/// The number of page-table levels, in `2..=5`.
	pub pml_levels: u8,
	/// The highest level at which the platform supports huge-page entries.
	/// `1` means no huge-page support.
	pub hugepage_max_level: u8,
	/// The number of CPUs.
	pub nr_cpus: usize,
	/// The length in bytes of the syscall instruction, used to rewind the
	/// program counter for a syscall restart.
	pub syscall_insn_len: usize,
}

/// The saved user-mode register state of a thread.
///
/// Register names are architecture-neutral; the trap code of each
/// architecture marshals the real frame into this form.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct UserContext {
	/// Program counter.
	pub pc: usize,
	/// Stack pointer.
	pub sp: usize,
	/// First argument register, also used to pass the signal number to a
	/// signal handler.
	pub arg0: usize,
	/// Syscall return value register.
	pub retval: usize,
	/// Syscall number register.
	pub syscall_nr: usize,
}

unsafe impl AnyRepr for UserContext {}

/// The machine interface implemented by each architecture.
pub trait Platform: Send + Sync {
	/// Returns the platform's static description.
	fn info(&self) -> &PlatformInfo;

	/// Writes a string to the kernel console.
	fn console_write(&self, s: &str);

	/// Returns the thread running on the current CPU, if any.
	fn current_thread(&self) -> Option<Arc<Thread>>;

	/// Registers a thread with the platform. Must be called before the thread
	/// can be spawned, blocked or woken.
	fn register_thread(&self, thread: &Arc<Thread>);
	/// Forgets a dead thread.
	fn unregister_thread(&self, thread: &Thread);

	/// Starts executing `entry` on the given thread.
	///
	/// The thread begins in the `Created` state and runs once the scheduler
	/// has made it runnable.
	fn spawn_thread(&self, thread: Arc<Thread>, entry: ThreadEntry);

	/// Suspends the current thread until it is made runnable again.
	///
	/// The caller must have moved the thread out of the `Running` state
	/// beforehand, under the thread's state lock.
	fn block_current(&self);

	/// Makes the given thread eligible to run again after [`Self::block_current`].
	fn unblock(&self, thread: &Thread);

	/// Relinquishes the CPU to another runnable thread, if any.
	fn yield_now(&self);

	/// Milliseconds elapsed since boot.
	fn now_ms(&self) -> u64;
	/// Suspends the calling thread for the given duration.
	fn sleep_ms(&self, ms: u64);

	/// Powers the machine off, or reboots it.
	fn poweroff(&self, reboot: bool) -> !;
	/// Halts the current CPU.
	fn halt(&self) -> !;
}

/// The installed platform.
static PLATFORM: OnceInit<&'static dyn Platform> = OnceInit::new();

/// Installs the platform. To be called once, before kernel initialization.
pub fn init(plat: &'static dyn Platform) {
	PLATFORM.init(plat);
}

/// Returns the installed platform.
#[inline]
pub fn platform() -> &'static dyn Platform {
	*PLATFORM.get()
}

/// Returns the installed platform, or `None` during early boot.
#[inline]
pub fn try_platform() -> Option<&'static dyn Platform> {
	PLATFORM.try_get().copied()
}

/// Returns the platform description.
#[inline]
pub fn info() -> &'static PlatformInfo {
	platform().info()
}

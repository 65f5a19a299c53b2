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

//! The kernel panic path.
//!
//! Panics are reserved for invariant violations. The path is single-use: a
//! second panic while panicking halts immediately instead of recursing.
//! Whether the machine powers off or spins is decided by the
//! `poweroff_on_panic` command line option.
//!
//! In the hosted configuration, Rust's own panic machinery is in charge and
//! this module only provides the common reporting helper.

use crate::cmdline;
use core::sync::atomic::{AtomicBool, Ordering::SeqCst};

/// Set while a panic is being handled.
static PANICKING: AtomicBool = AtomicBool::new(false);

/// Reports a kernel panic and decides the machine's fate.
///
/// Never returns to the caller's context.
pub fn panic_report(args: core::fmt::Arguments<'_>) -> ! {
	if PANICKING.swap(true, SeqCst) {
		// Recursed: stop immediately
		crate::platform::platform().halt();
	}
	pr_err!("kernel panic: {args}");
	if let Some(thread) = crate::process::thread::Thread::try_current() {
		pr_err!("  on {thread:?}");
		let ctx = *thread.user_ctx.lock();
		pr_err!("  user pc={:#x} sp={:#x}", ctx.pc, ctx.sp);
	}
	if cmdline::poweroff_on_panic() {
		crate::power::poweroff(false);
	}
	crate::power::halt()
}

/// The bare-metal panic handler. The hosted build keeps the host's.
#[cfg(not(any(test, feature = "hosted")))]
#[panic_handler]
fn panic_handler(info: &core::panic::PanicInfo) -> ! {
	panic_report(format_args!("{info}"))
}

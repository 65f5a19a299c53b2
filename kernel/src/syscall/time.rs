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

//! Time, power and module system calls.

use crate::{memory::user::UserPtr, memory::user::UserString, platform};
use macros::syscall;
use utils::{bytes::AnyRepr, errno, errno::EResult};

/// A point in time.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct TimeSpec {
	/// Seconds.
	pub sec: u64,
	/// Nanoseconds.
	pub nsec: u64,
}

unsafe impl AnyRepr for TimeSpec {}

/// Magic value required by `poweroff`.
pub const POWEROFF_MAGIC: u32 = u32::from_le_bytes(*b"GBye");

#[syscall]
pub fn clock_gettimeofday(ts: UserPtr<TimeSpec>) -> EResult<usize> {
	let ms = platform::platform().now_ms();
	ts.write(&TimeSpec {
		sec: ms / 1000,
		nsec: (ms % 1000) * 1_000_000,
	})?;
	Ok(0)
}

#[syscall]
pub fn clock_msleep(ms: u64) -> EResult<usize> {
	platform::platform().sleep_ms(ms);
	Ok(0)
}

#[syscall]
pub fn poweroff(reboot: bool, magic: u32) -> EResult<usize> {
	if magic != POWEROFF_MAGIC {
		pr_warn!("poweroff called with wrong magic number ({magic:#x})");
		return Err(errno!(EINVAL));
	}
	if !reboot {
		pr_info!("Meow, see ya~ :3");
	}
	crate::power::poweroff(reboot);
}

#[syscall]
pub fn kmod_load(path: UserString) -> EResult<usize> {
	// Loadable modules are not part of the core runtime
	let _ = path.read()?;
	Err(errno!(ENOSYS))
}

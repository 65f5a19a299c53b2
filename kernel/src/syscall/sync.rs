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

//! Synchronization system calls.

use crate::{memory::VirtAddr, process::futex};
use macros::syscall;
use utils::{errno, errno::EResult};

#[syscall]
pub fn futex_wait(addr: VirtAddr, expected: u32) -> EResult<usize> {
	if addr.is_null() || addr.0 % 4 != 0 {
		return Err(errno!(EINVAL));
	}
	Ok(futex::wait(addr, expected)? as usize)
}

#[syscall]
pub fn futex_wake(addr: VirtAddr, count: usize) -> EResult<usize> {
	if addr.is_null() || addr.0 % 4 != 0 || count == 0 {
		return Err(errno!(EINVAL));
	}
	Ok(futex::wake(addr, count)? as usize)
}

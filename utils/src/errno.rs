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

//! The errno space used across the kernel.
//!
//! Kernel code returns typed [`Errno`] values; the syscall layer translates
//! them into negative machine words at the user boundary.
//! [`ERESTARTSYS`] is internal and must never cross that boundary.

use core::{alloc::AllocError, fmt};

/// Result of a fallible operation inside the kernel.
pub type EResult<T> = Result<T, Errno>;
/// Result of an allocation.
pub type AllocResult<T> = Result<T, AllocError>;

/// An error number.
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct Errno(pub i32);

/// Operation not permitted.
pub const EPERM: i32 = 1;
/// No such file or directory.
pub const ENOENT: i32 = 2;
/// No such process.
pub const ESRCH: i32 = 3;
/// Interrupted system call.
pub const EINTR: i32 = 4;
/// I/O error.
pub const EIO: i32 = 5;
/// Bad file descriptor.
pub const EBADF: i32 = 9;
/// Try again.
pub const EAGAIN: i32 = 11;
/// Out of memory.
pub const ENOMEM: i32 = 12;
/// Permission denied.
pub const EACCES: i32 = 13;
/// Bad address.
pub const EFAULT: i32 = 14;
/// Device or resource busy.
pub const EBUSY: i32 = 16;
/// File exists.
pub const EEXIST: i32 = 17;
/// No such device.
pub const ENODEV: i32 = 19;
/// Not a directory.
pub const ENOTDIR: i32 = 20;
/// Is a directory.
pub const EISDIR: i32 = 21;
/// Invalid argument.
pub const EINVAL: i32 = 22;
/// Too many open files.
pub const EMFILE: i32 = 24;
/// No space left on device.
pub const ENOSPC: i32 = 28;
/// Illegal seek.
pub const ESPIPE: i32 = 29;
/// Read-only file system.
pub const EROFS: i32 = 30;
/// Broken pipe.
pub const EPIPE: i32 = 32;
/// Numerical result out of range.
pub const ERANGE: i32 = 34;
/// File name too long.
pub const ENAMETOOLONG: i32 = 36;
/// Function not implemented.
pub const ENOSYS: i32 = 38;
/// Directory not empty.
pub const ENOTEMPTY: i32 = 39;
/// Too many levels of symbolic links.
pub const ELOOP: i32 = 40;
/// Not a typewriter.
pub const ENOTTY: i32 = 25;
/// Operation not supported.
pub const ENOTSUP: i32 = 95;
/// Software caused connection abort.
pub const ECONNABORTED: i32 = 103;
/// Connection refused.
pub const ECONNREFUSED: i32 = 111;
/// Interrupted system call, to be restarted.
///
/// Internal use only.
pub const ERESTARTSYS: i32 = 512;

impl Errno {
	/// Returns the raw error number.
	#[inline]
	pub fn as_raw(self) -> i32 {
		self.0
	}

	/// Returns the value to be returned by a failing syscall.
	#[inline]
	pub fn to_retval(self) -> isize {
		-(self.0 as isize)
	}

	/// Returns the error's name, if known.
	fn name(self) -> Option<&'static str> {
		let s = match self.0 {
			EPERM => "EPERM",
			ENOENT => "ENOENT",
			ESRCH => "ESRCH",
			EINTR => "EINTR",
			EIO => "EIO",
			EBADF => "EBADF",
			EAGAIN => "EAGAIN",
			ENOMEM => "ENOMEM",
			EACCES => "EACCES",
			EFAULT => "EFAULT",
			EBUSY => "EBUSY",
			EEXIST => "EEXIST",
			ENODEV => "ENODEV",
			ENOTDIR => "ENOTDIR",
			EISDIR => "EISDIR",
			EINVAL => "EINVAL",
			EMFILE => "EMFILE",
			ENOSPC => "ENOSPC",
			ESPIPE => "ESPIPE",
			EROFS => "EROFS",
			EPIPE => "EPIPE",
			ERANGE => "ERANGE",
			ENAMETOOLONG => "ENAMETOOLONG",
			ENOSYS => "ENOSYS",
			ENOTEMPTY => "ENOTEMPTY",
			ELOOP => "ELOOP",
			ENOTTY => "ENOTTY",
			ENOTSUP => "ENOTSUP",
			ECONNABORTED => "ECONNABORTED",
			ECONNREFUSED => "ECONNREFUSED",
			ERESTARTSYS => "ERESTARTSYS",
			_ => return None,
		};
		Some(s)
	}
}

impl From<AllocError> for Errno {
	fn from(_: AllocError) -> Self {
		Self(ENOMEM)
	}
}

impl fmt::Display for Errno {
	fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.name() {
			Some(name) => write!(fmt, "{name}"),
			None => write!(fmt, "errno {}", self.0),
		}
	}
}

impl fmt::Debug for Errno {
	fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(self, fmt)
	}
}

/// Builds an [`Errno`] from its name.
#[macro_export]
macro_rules! errno {
	($name:ident) => {
		$crate::errno::Errno($crate::errno::$name)
	};
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn retval_is_negative() {
		assert_eq!(errno!(EINVAL).to_retval(), -22);
		assert_eq!(errno!(ENOENT).to_retval(), -2);
	}

	#[test]
	fn display_names() {
		extern crate alloc;
		use alloc::format;
		assert_eq!(format!("{}", errno!(EPIPE)), "EPIPE");
		assert_eq!(format!("{}", Errno(9999)), "errno 9999");
	}
}

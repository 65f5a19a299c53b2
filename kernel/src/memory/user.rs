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

//! Typed accessors for userspace memory.
//!
//! Syscall handlers never dereference user pointers; every access goes
//! through the current address space's copy routines, which drive the fault
//! handler the way the MMU would and fail with `EFAULT` on bad addresses.

use super::VirtAddr;
use crate::process::Process;
use alloc::{string::String, vec, vec::Vec};
use core::marker::PhantomData;
use utils::{
	bytes::AnyRepr,
	errno,
	errno::EResult,
	limits::PATH_MAX,
};

/// A pointer into the current process's address space.
#[derive(Clone, Copy, Debug)]
pub struct UserPtr<T: AnyRepr> {
	addr: VirtAddr,
	_phantom: PhantomData<T>,
}

impl<T: AnyRepr> UserPtr<T> {
	/// Wraps a raw user address.
	pub fn from_addr(addr: usize) -> Self {
		Self {
			addr: VirtAddr(addr),
			_phantom: PhantomData,
		}
	}

	/// Tells whether the pointer is null.
	pub fn is_null(&self) -> bool {
		self.addr.is_null()
	}

	/// The wrapped address.
	pub fn addr(&self) -> VirtAddr {
		self.addr
	}

	/// Reads the pointed value.
	pub fn read(&self) -> EResult<T> {
		if self.is_null() {
			return Err(errno!(EFAULT));
		}
		Process::current().mm().read_obj(self.addr)
	}

	/// Writes the pointed value.
	pub fn write(&self, val: &T) -> EResult<()> {
		if self.is_null() {
			return Err(errno!(EFAULT));
		}
		Process::current().mm().write_obj(self.addr, val)
	}
}

/// A byte range in the current process's address space.
#[derive(Clone, Copy, Debug)]
pub struct UserSlice {
	addr: VirtAddr,
	len: usize,
}

impl UserSlice {
	/// Wraps a raw user range.
	pub fn new(addr: usize, len: usize) -> Self {
		Self {
			addr: VirtAddr(addr),
			len,
		}
	}

	/// The range's length in bytes.
	pub fn len(&self) -> usize {
		self.len
	}

	/// Tells whether the range is empty.
	pub fn is_empty(&self) -> bool {
		self.len == 0
	}

	/// Copies the range into a kernel buffer.
	pub fn read_to_vec(&self) -> EResult<Vec<u8>> {
		let mut buf = vec![0u8; self.len];
		Process::current().mm().read_bytes(self.addr, &mut buf)?;
		Ok(buf)
	}

	/// Copies a kernel buffer over the range, truncated to the range.
	///
	/// Returns the number of bytes written.
	pub fn write_from(&self, buf: &[u8]) -> EResult<usize> {
		let n = buf.len().min(self.len);
		Process::current().mm().write_bytes(self.addr, &buf[..n])?;
		Ok(n)
	}
}

/// A NUL-terminated string in the current process's address space.
#[derive(Clone, Copy, Debug)]
pub struct UserString(pub VirtAddr);

impl UserString {
	/// Wraps a raw user address.
	pub fn from_addr(addr: usize) -> Self {
		Self(VirtAddr(addr))
	}

	/// Tells whether the pointer is null.
	pub fn is_null(&self) -> bool {
		self.0.is_null()
	}

	/// Copies the string, bounded by `PATH_MAX`.
	pub fn read(&self) -> EResult<String> {
		if self.is_null() {
			return Err(errno!(EFAULT));
		}
		Process::current().mm().read_cstring(self.0, PATH_MAX)
	}
}

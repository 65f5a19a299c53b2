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

//! The file descriptor table.

use crate::io::Io;
use alloc::{sync::Arc, vec, vec::Vec};
use bitflags::bitflags;
use utils::{errno, errno::EResult, limits::OPEN_MAX};

/// A file descriptor.
pub type Fd = i32;

bitflags! {
	/// Per-descriptor flags (as opposed to per-open-file flags).
	#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
	pub struct FdFlags: u32 {
		/// Close the descriptor on `execve`.
		const CLOEXEC = 1 << 0;
	}
}

/// One slot of the table.
#[derive(Clone)]
pub struct FdEntry {
	/// The open IO object.
	pub io: Arc<Io>,
	/// Descriptor flags.
	pub flags: FdFlags,
}

/// A process's file descriptor table: a fixed-size array of slots.
#[derive(Clone)]
pub struct FdTable {
	slots: Vec<Option<FdEntry>>,
}

impl Default for FdTable {
	fn default() -> Self {
		Self {
			slots: vec![None; OPEN_MAX],
		}
	}
}

impl FdTable {
	/// Attaches an IO object to the lowest free descriptor.
	pub fn attach(&mut self, io: Arc<Io>, flags: FdFlags) -> EResult<Fd> {
		let slot = self
			.slots
			.iter_mut()
			.enumerate()
			.find(|(_, s)| s.is_none())
			.ok_or(errno!(EMFILE))?;
		*slot.1 = Some(FdEntry {
			io,
			flags,
		});
		Ok(slot.0 as Fd)
	}

	/// Attaches an IO object at the given descriptor, closing whatever was
	/// there.
	pub fn attach_at(&mut self, fd: Fd, io: Arc<Io>, flags: FdFlags) -> EResult<Fd> {
		let slot = self.slot_mut(fd)?;
		*slot = Some(FdEntry {
			io,
			flags,
		});
		Ok(fd)
	}

	/// The IO object behind the descriptor.
	pub fn get(&self, fd: Fd) -> EResult<Arc<Io>> {
		Ok(self.entry(fd)?.io)
	}

	/// The full slot behind the descriptor.
	pub fn entry(&self, fd: Fd) -> EResult<FdEntry> {
		usize::try_from(fd)
			.ok()
			.and_then(|i| self.slots.get(i))
			.and_then(|s| s.clone())
			.ok_or(errno!(EBADF))
	}

	/// Updates the descriptor flags.
	pub fn set_flags(&mut self, fd: Fd, flags: FdFlags) -> EResult<()> {
		let slot = self.slot_mut(fd)?;
		let entry = slot.as_mut().ok_or(errno!(EBADF))?;
		entry.flags = flags;
		Ok(())
	}

	/// Closes the descriptor.
	pub fn close(&mut self, fd: Fd) -> EResult<()> {
		let slot = self.slot_mut(fd)?;
		slot.take().ok_or(errno!(EBADF))?;
		Ok(())
	}

	/// Closes every descriptor.
	pub fn clear(&mut self) {
		self.slots.iter_mut().for_each(|s| *s = None);
	}

	/// Closes every descriptor flagged close-on-exec.
	pub fn close_cloexec(&mut self) {
		for slot in self.slots.iter_mut() {
			if let Some(entry) = slot {
				if entry.flags.contains(FdFlags::CLOEXEC) {
					*slot = None;
				}
			}
		}
	}

	fn slot_mut(&mut self, fd: Fd) -> EResult<&mut Option<FdEntry>> {
		usize::try_from(fd)
			.ok()
			.and_then(|i| self.slots.get_mut(i))
			.ok_or(errno!(EBADF))
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::io;

	#[test]
	fn attach_get_close() {
		let mut table = FdTable::default();
		let io = io::Io::new_null();
		let fd = table.attach(io.clone(), FdFlags::empty()).unwrap();
		assert_eq!(fd, 0);
		assert!(Arc::ptr_eq(&table.get(fd).unwrap(), &io));
		table.close(fd).unwrap();
		assert!(table.get(fd).is_err());
		assert!(table.close(fd).is_err());
		assert!(table.get(-1).is_err());
	}

	#[test]
	fn cloexec_sweep() {
		let mut table = FdTable::default();
		let keep = table
			.attach(io::Io::new_null(), FdFlags::empty())
			.unwrap();
		let drop_ = table
			.attach(io::Io::new_null(), FdFlags::CLOEXEC)
			.unwrap();
		table.close_cloexec();
		assert!(table.get(keep).is_ok());
		assert!(table.get(drop_).is_err());
	}
}

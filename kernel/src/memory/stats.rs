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

//! Memory usage statistics, exposed at `/sys/mmstat/stat`.

use crate::sync::Mutex;
use alloc::string::String;
use core::fmt::Write;

/// Global memory counters, in pages.
#[derive(Debug, Default)]
pub struct MemInfo {
	/// Total number of frames.
	pub mem_total: usize,
	/// Number of free frames.
	pub mem_free: usize,
	/// Number of reserved frames.
	pub mem_reserved: usize,
	/// Number of frames sitting in page caches.
	pub pagecache: usize,
}

impl MemInfo {
	/// Sets the initial counters from the PMM.
	pub fn init(&mut self, total: usize, free: usize) {
		self.mem_total = total;
		self.mem_free = free;
		self.mem_reserved = total - free;
	}

	/// Accounts an allocation of `pages`.
	pub fn on_alloc(&mut self, pages: usize) {
		self.mem_free -= pages.min(self.mem_free);
	}

	/// Accounts a release of `pages`.
	pub fn on_free(&mut self, pages: usize) {
		self.mem_free += pages;
	}
}

/// The global memory statistics.
pub static MEM_INFO: Mutex<MemInfo> = Mutex::new(MemInfo {
	mem_total: 0,
	mem_free: 0,
	mem_reserved: 0,
	pagecache: 0,
});

/// Renders the statistics for sysfs.
pub fn render() -> String {
	let info = MEM_INFO.lock();
	let mut out = String::new();
	let _ = writeln!(out, "MemTotal: {} pages", info.mem_total);
	let _ = writeln!(out, "MemFree: {} pages", info.mem_free);
	let _ = writeln!(out, "MemReserved: {} pages", info.mem_reserved);
	let _ = writeln!(out, "PageCache: {} pages", info.pagecache);
	out
}

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

//! The page cache.
//!
//! Each inode owns a map from file page offset to a physical frame, filled on
//! demand through the filesystem's [`CacheOps`](super::inode::CacheOps). File
//! IO and file-backed mappings both go through this cache, which is what
//! makes a `SHARED` mapping coherent with `read`/`write`.

use super::inode::Inode;
use crate::{
	memory::{phys, stats, Pfn},
	sync::Mutex,
};
use alloc::collections::BTreeMap;
use core::cmp::min;
use utils::{errno, errno::EResult, limits::PAGE_SIZE};

/// A per-inode page cache.
pub struct PageCache {
	/// The cached frames by page offset, under the inode's cache lock.
	pages: Mutex<BTreeMap<usize, Pfn>>,
}

impl PageCache {
	/// Creates an empty cache.
	pub fn new() -> Self {
		Self {
			pages: Mutex::new(BTreeMap::new()),
		}
	}

	/// The number of cached pages.
	pub fn len(&self) -> usize {
		self.pages.lock().len()
	}

	/// Tells whether the cache is empty.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// The cached frame at `pgoff`, if present.
	pub fn peek(&self, pgoff: usize) -> Option<Pfn> {
		self.pages.lock().get(&pgoff).copied()
	}

	/// Drops every cached page, releasing the cache's references.
	pub fn clear(&self) {
		let pages = core::mem::take(&mut *self.pages.lock());
		let mut info = stats::MEM_INFO.lock();
		info.pagecache -= pages.len().min(info.pagecache);
		drop(info);
		for pfn in pages.into_values() {
			phys::unref_frames(pfn, 1);
		}
	}
}

impl Default for PageCache {
	fn default() -> Self {
		Self::new()
	}
}

impl Drop for PageCache {
	fn drop(&mut self) {
		self.clear();
	}
}

/// Returns the frame caching `pgoff` of the inode, filling the cache on
/// miss.
pub fn get_page_for_read(inode: &Inode, pgoff: usize) -> EResult<Pfn> {
	let ops = inode.cache_ops.as_ref().ok_or(errno!(ENOTSUP))?;
	let mut pages = inode.cache.pages.lock();
	if let Some(pfn) = pages.get(&pgoff) {
		return Ok(*pfn);
	}
	let pfn = ops.fill_cache(inode, pgoff)?;
	stats::MEM_INFO.lock().pagecache += 1;
	pages.insert(pgoff, pfn);
	Ok(pfn)
}

/// Same as [`get_page_for_read`], invoking the filesystem's write hooks.
pub fn get_page_for_write(inode: &Inode, pgoff: usize) -> EResult<Pfn> {
	let ops = inode.cache_ops.as_ref().ok_or(errno!(ENOTSUP))?;
	let mut pages = inode.cache.pages.lock();
	if let Some(pfn) = pages.get(&pgoff) {
		return Ok(*pfn);
	}
	let pfn = ops.page_write_begin(inode, pgoff)?;
	stats::MEM_INFO.lock().pagecache += 1;
	pages.insert(pgoff, pfn);
	Ok(pfn)
}

/// Reads from the inode through its page cache.
///
/// The read is clamped to the file's size; reading at or past the end
/// returns 0.
pub fn read(inode: &Inode, buf: &mut [u8], offset: u64) -> EResult<usize> {
	let size = inode.size();
	if offset >= size {
		return Ok(0);
	}
	let len = min(buf.len() as u64, size - offset) as usize;
	let mut done = 0;
	while done < len {
		let pos = offset as usize + done;
		let inpage_off = pos % PAGE_SIZE;
		let chunk = min(PAGE_SIZE - inpage_off, len - done);
		let pfn = get_page_for_read(inode, pos / PAGE_SIZE)?;
		let page = unsafe { pfn.page_mut() };
		buf[done..done + chunk].copy_from_slice(&page[inpage_off..inpage_off + chunk]);
		done += chunk;
	}
	Ok(done)
}

/// Writes to the inode through its page cache, extending the file as
/// needed.
pub fn write(inode: &Inode, buf: &[u8], offset: u64) -> EResult<usize> {
	let ops = inode.cache_ops.as_ref().ok_or(errno!(ENOTSUP))?;
	let mut done = 0;
	while done < buf.len() {
		let pos = offset as usize + done;
		let inpage_off = pos % PAGE_SIZE;
		let chunk = min(PAGE_SIZE - inpage_off, buf.len() - done);
		let pfn = get_page_for_write(inode, pos / PAGE_SIZE)?;
		let page = unsafe { pfn.page_mut() };
		page[inpage_off..inpage_off + chunk].copy_from_slice(&buf[done..done + chunk]);
		done += chunk;
	}
	let end = offset + done as u64;
	{
		let mut stat = inode.stat.lock();
		if end > stat.size {
			stat.size = end;
		}
	}
	ops.page_write_end(inode, end);
	Ok(done)
}

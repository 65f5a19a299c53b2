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

//! Virtual memory areas.

use crate::{
	file::inode::Inode,
	memory::{paging::VmFlags, VirtAddr},
};
use alloc::{sync::Arc, vec, vec::Vec};
use utils::limits::PAGE_SIZE;

/// What a mapping holds, for diagnostics and accounting.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum VmaContent {
	/// Unclassified.
	#[default]
	Unknown,
	/// A thread stack.
	Stack,
	/// A file mapped by the loader.
	File,
	/// A plain `mmap` region.
	Mmap,
	/// Device memory.
	Dma,
}

/// What happens to a mapping across `fork`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ForkMode {
	/// The child gets a copy-on-write clone.
	Private,
	/// Parent and child alias the same frames.
	Shared,
}

/// The backing of a mapping.
#[derive(Clone)]
pub enum VmaBacking {
	/// Zero-filled on first touch.
	Anon,
	/// Pages come from the file's page cache.
	File {
		/// The backing inode.
		inode: Arc<Inode>,
		/// Page offset of the mapping's first page inside the file.
		pgoff: usize,
	},
}

impl core::fmt::Debug for VmaBacking {
	fn fmt(&self, fmt: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		match self {
			Self::Anon => write!(fmt, "anon"),
			Self::File {
				pgoff, ..
			} => write!(fmt, "file@pg{pgoff}"),
		}
	}
}

/// Accounting bucket of one mapped page.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum PageBucket {
	/// Not populated yet.
	#[default]
	Absent,
	/// An anonymous frame owned through the mapping.
	Regular,
	/// A frame borrowed from a page cache.
	PageCache,
	/// A frame privately copied by a write fault.
	Cow,
}

/// Per-VMA counters, one per bucket.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct VmaStats {
	/// Anonymous pages.
	pub regular: usize,
	/// Page-cache pages.
	pub pagecache: usize,
	/// Copied-on-write pages.
	pub cow: usize,
}

/// A contiguous range of user virtual memory with uniform protection and
/// backing.
#[derive(Clone, Debug)]
pub struct VmArea {
	/// First address of the range.
	pub begin: VirtAddr,
	/// Size in pages.
	pub npages: usize,
	/// Protection and attributes.
	pub flags: VmFlags,
	/// Content classification.
	pub content: VmaContent,
	/// Behavior across `fork`.
	pub fork_mode: ForkMode,
	/// Where pages come from.
	pub backing: VmaBacking,
	/// Accounting bucket of each page.
	pub pages: Vec<PageBucket>,
}

impl VmArea {
	/// Creates an area with every page absent.
	pub fn new(
		begin: VirtAddr,
		npages: usize,
		flags: VmFlags,
		content: VmaContent,
		fork_mode: ForkMode,
		backing: VmaBacking,
	) -> Self {
		Self {
			begin,
			npages,
			flags,
			content,
			fork_mode,
			backing,
			pages: vec![PageBucket::Absent; npages],
		}
	}

	/// One past the last address of the range.
	#[inline]
	pub fn end(&self) -> VirtAddr {
		self.begin + self.npages * PAGE_SIZE
	}

	/// Tells whether the area contains the given address.
	#[inline]
	pub fn contains(&self, addr: VirtAddr) -> bool {
		addr >= self.begin && addr < self.end()
	}

	/// Tells whether the area intersects `[start, end)`.
	pub fn intersects(&self, start: VirtAddr, end: VirtAddr) -> bool {
		self.begin < end && start < self.end()
	}

	/// The page index of the given address inside the area.
	#[inline]
	pub fn page_index(&self, addr: VirtAddr) -> usize {
		(addr.page_align_down() - self.begin) / PAGE_SIZE
	}

	/// The area's counters.
	pub fn stats(&self) -> VmaStats {
		let mut stats = VmaStats::default();
		for p in &self.pages {
			match p {
				PageBucket::Absent => {}
				PageBucket::Regular => stats.regular += 1,
				PageBucket::PageCache => stats.pagecache += 1,
				PageBucket::Cow => stats.cow += 1,
			}
		}
		stats
	}

	/// Splits the area around `[off, off + n)` (in pages), returning the
	/// pieces before and after the removed range.
	pub fn split(&self, off: usize, n: usize) -> (Option<VmArea>, Option<VmArea>) {
		let before = (off > 0).then(|| {
			let mut v = self.clone();
			v.npages = off;
			v.pages.truncate(off);
			v
		});
		let after = (off + n < self.npages).then(|| {
			let mut v = self.clone();
			v.begin = self.begin + (off + n) * PAGE_SIZE;
			v.npages = self.npages - off - n;
			v.pages = self.pages[off + n..].to_vec();
			if let VmaBacking::File {
				inode,
				pgoff,
			} = &self.backing
			{
				v.backing = VmaBacking::File {
					inode: inode.clone(),
					pgoff: pgoff + off + n,
				};
			}
			v
		});
		(before, after)
	}
}

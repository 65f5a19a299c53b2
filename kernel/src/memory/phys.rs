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

//! The physical memory manager.
//!
//! A buddy allocator owns every frame in `[0, max_pfn)`. Frame metadata lives
//! in a single contiguous array carved out of RAM itself, indexed by PFN and
//! reachable through the direct map. Free lists are kept per order, sorted by
//! PFN, and linked through frame indices.
//!
//! Allocations are compound at grant time: `alloc_frames(n)` hands out a
//! whole `2^^k` block, but every frame records order 0 so frames are
//! individually refcounted; freeing goes frame-by-frame and coalescing
//! restores the pristine free lists.

use super::Pfn;
use crate::{boot::BootInfo, memory::stats, sync::IntMutex, sync::OnceInit};
use core::{alloc::AllocError, mem::size_of, slice};
use utils::{errno::AllocResult, limits::PAGE_SIZE, math};

/// The order of a frame block.
pub type FrameOrder = u8;

/// The maximum order of a buddy block.
pub const MAX_ORDER: FrameOrder = 10;

/// Frames below this PFN (the first megabyte) are reserved regardless of the
/// bootloader's memory map.
pub const LOW_RESERVED_PFN: usize = 0x100000 / PAGE_SIZE;

/// Index value for "no frame".
const FRAME_NONE: u32 = u32::MAX;

/// The state of a physical frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum FrameState {
	/// The frame is not allocatable.
	Reserved,
	/// The frame belongs to the buddy free lists.
	Free,
	/// The frame has been handed out.
	Allocated,
}

/// Per-frame metadata.
///
/// `prev`/`next` link free block heads into the per-order free lists; they
/// hold frame indices rather than pointers to keep the array compact.
struct Frame {
	/// Previous free block head of the same order.
	prev: u32,
	/// Next free block head of the same order.
	next: u32,
	/// The block order, only meaningful on a linked head.
	order: FrameOrder,
	/// The frame's state.
	state: FrameState,
	/// Tells whether the frame heads a block in a free list.
	linked: bool,
	/// The number of virtual mappings referencing the frame.
	mapped_count: u32,
}

/// The buddy allocator over the frame array.
pub(crate) struct FrameAllocator {
	/// The frame metadata array.
	frames: *mut Frame,
	/// The number of frames.
	nframes: usize,
	/// Head of the free list for each order.
	free_lists: [u32; (MAX_ORDER + 1) as usize],
	/// Number of currently allocated pages.
	allocated_pages: usize,
}

unsafe impl Send for FrameAllocator {}

impl FrameAllocator {
	/// Creates an allocator over uninitialized metadata. Every frame starts
	/// `Reserved`; usable ranges are then seeded with [`Self::seed_range`].
	///
	/// # Safety
	///
	/// `frames` must point to an array of at least `nframes` entries, valid
	/// for the allocator's whole lifetime.
	pub(crate) unsafe fn new(frames: *mut Frame, nframes: usize) -> Self {
		let mut a = Self {
			frames,
			nframes,
			free_lists: [FRAME_NONE; (MAX_ORDER + 1) as usize],
			allocated_pages: 0,
		};
		for f in a.frames_mut() {
			*f = Frame {
				prev: FRAME_NONE,
				next: FRAME_NONE,
				order: 0,
				state: FrameState::Reserved,
				linked: false,
				mapped_count: 0,
			};
		}
		a
	}

	#[inline]
	fn frames_mut(&mut self) -> &mut [Frame] {
		unsafe { slice::from_raw_parts_mut(self.frames, self.nframes) }
	}

	#[inline]
	fn frame(&self, id: u32) -> &Frame {
		debug_assert!((id as usize) < self.nframes);
		unsafe { &*self.frames.add(id as usize) }
	}

	#[inline]
	fn frame_mut(&mut self, id: u32) -> &mut Frame {
		debug_assert!((id as usize) < self.nframes);
		unsafe { &mut *self.frames.add(id as usize) }
	}

	/// Links the free block headed by `id` into its order's free list,
	/// keeping the list sorted by PFN.
	fn link(&mut self, id: u32) {
		let order = self.frame(id).order;
		debug_assert!(!self.frame(id).linked);
		debug_assert_eq!(self.frame(id).state, FrameState::Free);
		// Find insertion point
		let mut prev = FRAME_NONE;
		let mut next = self.free_lists[order as usize];
		while next != FRAME_NONE && next < id {
			prev = next;
			next = self.frame(next).next;
		}
		{
			let f = self.frame_mut(id);
			f.prev = prev;
			f.next = next;
			f.linked = true;
		}
		if prev == FRAME_NONE {
			self.free_lists[order as usize] = id;
		} else {
			self.frame_mut(prev).next = id;
		}
		if next != FRAME_NONE {
			self.frame_mut(next).prev = id;
		}
	}

	/// Unlinks the free block headed by `id` from its free list.
	fn unlink(&mut self, id: u32) {
		let Frame {
			prev,
			next,
			order,
			..
		} = *self.frame(id);
		debug_assert!(self.frame(id).linked);
		if prev == FRAME_NONE {
			self.free_lists[order as usize] = next;
		} else {
			self.frame_mut(prev).next = next;
		}
		if next != FRAME_NONE {
			self.frame_mut(next).prev = prev;
		}
		let f = self.frame_mut(id);
		f.prev = FRAME_NONE;
		f.next = FRAME_NONE;
		f.linked = false;
	}

	/// Marks `id` as the head of a free block of the given order and links
	/// it.
	fn make_free_head(&mut self, id: u32, order: FrameOrder) {
		let f = self.frame_mut(id);
		f.state = FrameState::Free;
		f.order = order;
		f.linked = false;
		self.link(id);
	}

	/// Splits the unlinked free block headed by `id` down to `target` order,
	/// linking the buddy halves back into the free lists.
	fn split_to(&mut self, id: u32, target: FrameOrder) {
		debug_assert!(!self.frame(id).linked);
		while self.frame(id).order > target {
			let order = self.frame(id).order - 1;
			let buddy = id + math::pow2(order as usize) as u32;
			self.frame_mut(id).order = order;
			if (buddy as usize) < self.nframes {
				self.make_free_head(buddy, order);
			}
		}
	}

	/// Coalesces the unlinked free frame block headed by `id` with its free
	/// buddies, then links the resulting block.
	fn coalesce(&mut self, mut id: u32) {
		debug_assert!(!self.frame(id).linked);
		debug_assert_eq!(self.frame(id).state, FrameState::Free);
		loop {
			let order = self.frame(id).order;
			if order >= MAX_ORDER {
				break;
			}
			let buddy = id ^ math::pow2(order as usize) as u32;
			let merged_pages = math::pow2(order as usize + 1) as u32;
			if buddy as usize >= self.nframes
				|| (id.min(buddy) + merged_pages) as usize > self.nframes
			{
				break;
			}
			let bf = self.frame(buddy);
			if !bf.linked || bf.order != order || bf.state != FrameState::Free {
				break;
			}
			self.unlink(buddy);
			let (low, high) = (id.min(buddy), id.max(buddy));
			{
				let hf = self.frame_mut(high);
				hf.order = 0;
				debug_assert_eq!(hf.state, FrameState::Free);
			}
			self.frame_mut(low).order = order + 1;
			id = low;
		}
		self.link(id);
	}

	/// Seeds the free lists with the usable frame range `[start, end)`,
	/// carving the largest aligned power-of-two blocks that fit.
	pub(crate) fn seed_range(&mut self, start: usize, end: usize) {
		debug_assert!(end <= self.nframes);
		for id in start..end {
			let f = self.frame_mut(id as u32);
			f.state = FrameState::Free;
			f.order = 0;
			f.linked = false;
		}
		let mut p = start;
		while p < end {
			let align_order = if p == 0 {
				MAX_ORDER as usize
			} else {
				(p.trailing_zeros() as usize).min(MAX_ORDER as usize)
			};
			let fit_order = math::log2(end - p).min(MAX_ORDER as usize);
			let order = align_order.min(fit_order) as FrameOrder;
			self.make_free_head(p as u32, order);
			p += math::pow2(order as usize);
		}
	}

	/// Takes a free block of at least the given order out of the free lists,
	/// splitting a larger block if needed.
	fn take_order(&mut self, order: FrameOrder) -> Option<u32> {
		let from = (order as usize..=MAX_ORDER as usize)
			.find(|k| self.free_lists[*k] != FRAME_NONE)?;
		let head = self.free_lists[from];
		self.unlink(head);
		self.split_to(head, order);
		Some(head)
	}

	/// Allocates `n` pages, rounded up to a whole block.
	///
	/// Every frame of the block is marked `Allocated` with a zero
	/// `mapped_count` and records order 0.
	pub(crate) fn alloc(&mut self, n: usize) -> Option<Pfn> {
		if n == 0 || n > math::pow2(MAX_ORDER as usize) {
			return None;
		}
		let order = order_for(n);
		let head = self.take_order(order)?;
		let pages = math::pow2(order as usize);
		for id in head..head + pages as u32 {
			let f = self.frame_mut(id);
			debug_assert_eq!(f.state, FrameState::Free);
			f.state = FrameState::Allocated;
			f.order = 0;
			f.linked = false;
			f.mapped_count = 0;
		}
		self.allocated_pages += pages;
		Some(Pfn(head as usize))
	}

	/// Releases one allocated frame back to the buddy and coalesces.
	fn free_one(&mut self, id: u32) {
		let f = self.frame_mut(id);
		assert_eq!(
			f.state,
			FrameState::Allocated,
			"double free of frame {id}"
		);
		f.state = FrameState::Free;
		f.order = 0;
		f.mapped_count = 0;
		self.coalesce(id);
		self.allocated_pages -= 1;
	}

	/// Frees the `n` frames starting at `pfn`.
	pub(crate) fn free(&mut self, pfn: Pfn, n: usize) {
		for i in 0..n {
			self.free_one((pfn.0 + i) as u32);
		}
	}

	/// Increments the mapped count of the `n` frames starting at `pfn`.
	pub(crate) fn ref_frames(&mut self, pfn: Pfn, n: usize) {
		assert!(pfn.0 + n <= self.nframes, "out of bounds");
		for i in 0..n {
			let f = self.frame_mut((pfn.0 + i) as u32);
			debug_assert_eq!(f.state, FrameState::Allocated);
			f.mapped_count += 1;
		}
	}

	/// Decrements the mapped count of the `n` frames starting at `pfn`,
	/// releasing every frame whose count reaches zero.
	pub(crate) fn unref_frames(&mut self, pfn: Pfn, n: usize) {
		assert!(pfn.0 + n <= self.nframes, "out of bounds");
		for i in 0..n {
			let id = (pfn.0 + i) as u32;
			let f = self.frame_mut(id);
			assert!(f.mapped_count > 0, "refcount underflow on frame {id}");
			f.mapped_count -= 1;
			if f.mapped_count == 0 {
				self.free_one(id);
			}
		}
	}

	/// Splits free blocks so that `pfn` becomes an isolated order-0 free
	/// frame, unlinked from the free lists.
	fn isolate(&mut self, pfn: u32) {
		let (mut head, top) = (0..=MAX_ORDER)
			.find_map(|k| {
				let head = pfn & !(math::pow2(k as usize) as u32 - 1);
				let f = self.frame(head);
				(f.linked && f.order == k).then_some((head, k))
			})
			.expect("reserved frame is not part of any free block");
		self.unlink(head);
		let mut order = top;
		while order > 0 {
			order -= 1;
			let low = head;
			let high = head + math::pow2(order as usize) as u32;
			if pfn >= high {
				// Keep walking into the upper half, free the lower
				self.frame_mut(low).order = order;
				debug_assert_eq!(self.frame(low).state, FrameState::Free);
				self.link(low);
				head = high;
				self.frame_mut(head).order = order;
			} else {
				self.make_free_head(high, order);
				self.frame_mut(low).order = order;
			}
		}
		debug_assert_eq!(head, pfn);
	}

	/// Reserves the frame range `[pfn, pfn + n)`, removing it from the free
	/// lists. Reserving an allocated frame is a fatal error.
	pub(crate) fn reserve(&mut self, pfn: Pfn, n: usize) {
		assert!(pfn.0 + n <= self.nframes, "out of bounds");
		for i in 0..n {
			let id = (pfn.0 + i) as u32;
			match self.frame(id).state {
				FrameState::Reserved => continue,
				FrameState::Allocated => {
					panic!("reserving already-allocated frame {id}")
				}
				FrameState::Free => {
					self.isolate(id);
					let f = self.frame_mut(id);
					f.state = FrameState::Reserved;
					f.order = 0;
				}
			}
		}
	}

	/// The number of currently allocated pages.
	pub(crate) fn allocated_pages(&self) -> usize {
		self.allocated_pages
	}

	/// The state of the given frame.
	pub(crate) fn frame_state(&self, pfn: Pfn) -> FrameState {
		self.frame(pfn.0 as u32).state
	}

	/// The mapped count of the given frame.
	pub(crate) fn frame_mapped_count(&self, pfn: Pfn) -> u32 {
		self.frame(pfn.0 as u32).mapped_count
	}

	/// Returns the free lists as `(order, heads)` pairs, for diagnostics and
	/// tests.
	pub(crate) fn free_list_dump(&self) -> alloc::vec::Vec<(FrameOrder, alloc::vec::Vec<u32>)> {
		let mut out = alloc::vec::Vec::new();
		for order in 0..=MAX_ORDER {
			let mut heads = alloc::vec::Vec::new();
			let mut id = self.free_lists[order as usize];
			while id != FRAME_NONE {
				heads.push(id);
				id = self.frame(id).next;
			}
			out.push((order, heads));
		}
		out
	}
}

/// The buddy order needed to fit `n` pages.
#[inline]
pub fn order_for(n: usize) -> FrameOrder {
	if n <= 1 {
		return 0;
	}
	let k = math::log2(n);
	if math::pow2(k) == n {
		k as FrameOrder
	} else {
		(k + 1) as FrameOrder
	}
}

/// The global frame allocator.
static ALLOCATOR: OnceInit<IntMutex<FrameAllocator>> = OnceInit::new();

/// Initializes the PMM from the boot memory map.
///
/// The frame metadata array is carved out of the first usable region large
/// enough to hold it. Gaps in the memory map stay reserved so the frame
/// array covers `[0, max_pfn)` contiguously, and everything below 1 MiB is
/// reserved regardless of the bootloader's types.
pub fn init(boot: &BootInfo<'_>) {
	use crate::boot::MemoryRegionKind;
	let max_pfn = boot
		.memory_map
		.iter()
		.map(|r| r.base / PAGE_SIZE + r.pages)
		.max()
		.expect("empty memory map");
	let meta_bytes = max_pfn * size_of::<Frame>();
	let meta_pages = meta_bytes.div_ceil(PAGE_SIZE);
	// Pick a home for the frame array
	let meta_pfn = boot
		.memory_map
		.iter()
		.filter(|r| r.kind == MemoryRegionKind::Usable)
		.find_map(|r| {
			let start = (r.base / PAGE_SIZE).max(LOW_RESERVED_PFN);
			let end = r.base / PAGE_SIZE + r.pages;
			(start + meta_pages <= end).then_some(start)
		})
		.expect("no usable region can hold the frame array");
	let frames = Pfn(meta_pfn).ptr() as *mut Frame;
	let mut allocator = unsafe { FrameAllocator::new(frames, max_pfn) };
	// Seed usable ranges, leaving out the metadata pages and low memory
	let mut free_pages = 0;
	for r in boot.memory_map.iter() {
		if r.kind != MemoryRegionKind::Usable {
			continue;
		}
		let start = (r.base / PAGE_SIZE).max(LOW_RESERVED_PFN);
		let end = r.base / PAGE_SIZE + r.pages;
		if start >= end {
			continue;
		}
		for (s, e) in split_out(start, end, meta_pfn, meta_pfn + meta_pages) {
			allocator.seed_range(s, e);
			free_pages += e - s;
		}
	}
	stats::MEM_INFO.lock().init(max_pfn, free_pages);
	pr_info!(
		"pmm: {max_pfn} frames, {free_pages} free, metadata at pfn {meta_pfn} ({meta_pages} pages)"
	);
	ALLOCATOR.init(IntMutex::new(allocator));
}

/// Splits `[start, end)` around the hole `[hs, he)`, yielding up to two
/// sub-ranges.
fn split_out(
	start: usize,
	end: usize,
	hs: usize,
	he: usize,
) -> impl Iterator<Item = (usize, usize)> {
	let left = (start, end.min(hs));
	let right = (start.max(he), end);
	[left, right]
		.into_iter()
		.filter(|(s, e)| s < e)
}

/// Allocates `n` contiguous frames.
///
/// Each returned frame has a zero `mapped_count`. The content is not zeroed.
pub fn alloc_frames(n: usize) -> AllocResult<Pfn> {
	let pfn = ALLOCATOR.get().lock().alloc(n).ok_or(AllocError)?;
	stats::MEM_INFO.lock().on_alloc(math::pow2(order_for(n) as usize));
	Ok(pfn)
}

/// Allocates one frame filled with zeros, with a mapped count of 1.
pub fn alloc_frame_zeroed_mapped() -> AllocResult<Pfn> {
	let pfn = alloc_frames(1)?;
	super::zero_frame(pfn);
	ref_frames(pfn, 1);
	Ok(pfn)
}

/// Explicitly frees the `n` frames starting at `pfn`.
pub fn free_frames(pfn: Pfn, n: usize) {
	ALLOCATOR.get().lock().free(pfn, n);
	stats::MEM_INFO.lock().on_free(n);
}

/// Increments the mapped count of `n` frames starting at `pfn`.
pub fn ref_frames(pfn: Pfn, n: usize) {
	ALLOCATOR.get().lock().ref_frames(pfn, n);
}

/// Decrements the mapped count of `n` frames starting at `pfn`. Frames
/// reaching zero go back to the buddy.
pub fn unref_frames(pfn: Pfn, n: usize) {
	let mut a = ALLOCATOR.get().lock();
	let before = a.allocated_pages();
	a.unref_frames(pfn, n);
	let freed = before - a.allocated_pages();
	drop(a);
	if freed > 0 {
		stats::MEM_INFO.lock().on_free(freed);
	}
}

/// Reserves the frame range `[pfn, pfn + n)`.
pub fn reserve_frames(pfn: Pfn, n: usize) {
	ALLOCATOR.get().lock().reserve(pfn, n);
}

/// The state of the given frame.
pub fn frame_state(pfn: Pfn) -> FrameState {
	ALLOCATOR.get().lock().frame_state(pfn)
}

/// The number of mappings currently referencing the given frame.
pub fn frame_mapped_count(pfn: Pfn) -> u32 {
	ALLOCATOR.get().lock().frame_mapped_count(pfn)
}

/// The total number of pages currently allocated.
pub fn allocated_pages_count() -> usize {
	ALLOCATOR.get().lock().allocated_pages()
}

#[cfg(test)]
mod test {
	use super::*;
	use alloc::{boxed::Box, vec, vec::Vec};

	/// Builds a standalone allocator over `n` frames of boxed metadata.
	fn new_allocator(n: usize) -> FrameAllocator {
		// Backed by u64s to satisfy the metadata's alignment
		let words = (n * size_of::<Frame>()).div_ceil(8);
		let meta = Box::leak(vec![0u64; words].into_boxed_slice());
		let mut a = unsafe { FrameAllocator::new(meta.as_mut_ptr() as *mut Frame, n) };
		a.seed_range(0, n);
		a
	}

	#[test]
	fn split_and_merge() {
		let mut a = new_allocator(1024);
		let initial = a.free_list_dump();
		// 3 pages round up to one order-2 block
		let pfn = a.alloc(3).unwrap();
		assert_eq!(pfn.0 % 4, 0);
		for i in 0..4 {
			assert_eq!(a.frame_state(pfn + i), FrameState::Allocated);
			assert_eq!(a.frame_mapped_count(pfn + i), 0);
		}
		assert_eq!(a.allocated_pages(), 4);
		// Map then unmap each frame individually
		a.ref_frames(pfn, 4);
		for i in 0..4 {
			a.unref_frames(pfn + i, 1);
		}
		assert_eq!(a.allocated_pages(), 0);
		assert_eq!(a.free_list_dump(), initial);
	}

	#[test]
	fn exhaustion() {
		let mut a = new_allocator(16);
		let mut got = Vec::new();
		while let Some(p) = a.alloc(1) {
			got.push(p);
		}
		assert_eq!(got.len(), 16);
		// All distinct
		got.sort();
		got.dedup();
		assert_eq!(got.len(), 16);
		for p in got {
			a.free(p, 1);
		}
		assert_eq!(a.allocated_pages(), 0);
	}

	#[test]
	fn reserve_splits_free_blocks() {
		let mut a = new_allocator(64);
		a.reserve(Pfn(13), 3);
		for i in 13..16 {
			assert_eq!(a.frame_state(Pfn(i)), FrameState::Reserved);
		}
		// Remaining frames are still allocatable
		let mut count = 0;
		while a.alloc(1).is_some() {
			count += 1;
		}
		assert_eq!(count, 61);
	}

	#[test]
	#[should_panic(expected = "reserving already-allocated frame")]
	fn reserve_allocated_panics() {
		let mut a = new_allocator(16);
		let p = a.alloc(1).unwrap();
		a.reserve(p, 1);
	}

	#[test]
	fn lifo_refill() {
		let mut a = new_allocator(64);
		let first = a.alloc(1).unwrap();
		a.free(first, 1);
		// The lowest-PFN block is handed out again
		assert_eq!(a.alloc(1).unwrap(), first);
	}

	#[test]
	fn order_rounding() {
		assert_eq!(order_for(1), 0);
		assert_eq!(order_for(2), 1);
		assert_eq!(order_for(3), 2);
		assert_eq!(order_for(4), 2);
		assert_eq!(order_for(5), 3);
		assert_eq!(order_for(1024), 10);
	}
}

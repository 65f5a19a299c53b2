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

//! Architecture-neutral page-table operations.
//!
//! A single generic walker covers every configuration from 2 to 5 levels; the
//! level count comes from the platform. Each operation (map, unmap, flag
//! changes, copy) is a small callback table over the walker, mirroring the
//! hardware's multi-level radix tree stored in RAM frames.
//!
//! Entries are 64-bit. A huge entry terminates the walk at its level where
//! the platform advertises the capability.

use super::{phys, zero_frame, Pfn, VirtAddr};
use crate::platform;
use bitflags::bitflags;
use core::slice;
use utils::{errno::AllocResult, limits::PAGE_SIZE};

/// Number of entries per table.
pub const ENTRIES_PER_TABLE: usize = 512;
/// log2 of [`ENTRIES_PER_TABLE`].
const INDEX_BITS: usize = 9;
/// Mask of the PFN bits inside an entry.
const ADDR_MASK: u64 = 0x000f_ffff_ffff_f000;

bitflags! {
	/// Flag bits of a page-table entry.
	#[derive(Clone, Copy, Debug, Eq, PartialEq)]
	pub struct PteFlags: u64 {
		/// The entry maps something.
		const PRESENT = 1 << 0;
		/// Writes are allowed.
		const WRITE = 1 << 1;
		/// Userspace may access the page.
		const USER = 1 << 2;
		/// The page may be executed.
		const EXEC = 1 << 3;
		/// The TLB entry survives an address-space switch.
		const GLOBAL = 1 << 5;
		/// The entry is a huge leaf, terminating the walk at its level.
		const HUGE = 1 << 7;
	}
}

bitflags! {
	/// Permissions and attributes of a virtual mapping.
	#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
	pub struct VmFlags: u32 {
		/// Readable.
		const READ = 1 << 0;
		/// Writable.
		const WRITE = 1 << 1;
		/// Executable.
		const EXEC = 1 << 2;
		/// Accessible from userspace.
		const USER = 1 << 3;
		/// Global mapping (kernel direct map).
		const GLOBAL = 1 << 4;
	}
}

impl VmFlags {
	/// The page-table flag bits equivalent to these permissions.
	pub fn to_pte(self) -> PteFlags {
		let mut f = PteFlags::empty();
		if self.contains(Self::WRITE) {
			f |= PteFlags::WRITE;
		}
		if self.contains(Self::EXEC) {
			f |= PteFlags::EXEC;
		}
		if self.contains(Self::USER) {
			f |= PteFlags::USER;
		}
		if self.contains(Self::GLOBAL) {
			f |= PteFlags::GLOBAL;
		}
		f
	}
}

/// A page-table entry.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[repr(transparent)]
pub struct Entry(pub u64);

impl Entry {
	/// An entry linking the given child table.
	fn table(pfn: Pfn) -> Self {
		// Intermediate entries stay permissive; leaves carry the policy
		Self(
			(pfn.phys().0 as u64 & ADDR_MASK)
				| (PteFlags::PRESENT | PteFlags::WRITE | PteFlags::USER).bits(),
		)
	}

	/// A leaf entry mapping the given frame.
	pub fn leaf(pfn: Pfn, flags: PteFlags) -> Self {
		Self((pfn.phys().0 as u64 & ADDR_MASK) | flags.bits() | PteFlags::PRESENT.bits())
	}

	/// Tells whether the entry is present.
	#[inline]
	pub fn is_present(self) -> bool {
		self.0 & PteFlags::PRESENT.bits() != 0
	}

	/// Tells whether the entry is a huge leaf.
	#[inline]
	pub fn is_huge(self) -> bool {
		self.0 & PteFlags::HUGE.bits() != 0
	}

	/// The frame the entry points to.
	#[inline]
	pub fn pfn(self) -> Pfn {
		Pfn(((self.0 & ADDR_MASK) / PAGE_SIZE as u64) as usize)
	}

	/// The entry's flag bits.
	#[inline]
	pub fn flags(self) -> PteFlags {
		PteFlags::from_bits_truncate(self.0 & !ADDR_MASK)
	}

	/// Replaces the flag bits, keeping the PFN.
	pub fn set_flags(&mut self, flags: PteFlags) {
		self.0 = (self.0 & ADDR_MASK) | flags.bits() | PteFlags::PRESENT.bits();
	}

	/// Clears the entry.
	pub fn clear(&mut self) {
		self.0 = 0;
	}
}

/// Returns the entries of the table stored in the given frame.
///
/// # Safety
///
/// The frame must hold a page table owned by the caller's context.
unsafe fn table_entries<'a>(pfn: Pfn) -> &'a mut [Entry] {
	slice::from_raw_parts_mut(pfn.ptr() as *mut Entry, ENTRIES_PER_TABLE)
}

/// The index into a table at `level` for the given address.
#[inline]
fn entry_index(vaddr: VirtAddr, level: u8) -> usize {
	(vaddr.0 >> (12 + INDEX_BITS * (level as usize - 1))) & (ENTRIES_PER_TABLE - 1)
}

/// The number of pages covered by one entry at `level`.
#[inline]
fn coverage_pages(level: u8) -> usize {
	1 << (INDEX_BITS * (level as usize - 1))
}

/// The number of page-table levels configured by the platform.
#[inline]
pub fn levels() -> u8 {
	platform::info().pml_levels
}

/// Per-level callbacks driving the walker.
///
/// [`WalkOps::leaf`] runs for every level-1 entry in the walked range.
/// [`WalkOps::pre_descend`] runs each time the walker enters a child table,
/// letting the copy path mirror the tree structure into a destination.
pub trait WalkOps {
	/// Called on each level-1 entry.
	fn leaf(&mut self, e: &mut Entry, vaddr: VirtAddr) -> AllocResult<()>;

	/// Called on the entry at `level` before descending into its child.
	fn pre_descend(&mut self, _level: u8, _e: &mut Entry, _vaddr: VirtAddr) -> AllocResult<()> {
		Ok(())
	}

	/// Called on a huge leaf terminating the walk at `level`.
	fn huge_leaf(&mut self, _level: u8, _e: &mut Entry, _vaddr: VirtAddr) -> AllocResult<()> {
		Ok(())
	}
}

/// Walks the table tree rooted at `root` over `[vaddr, vaddr + n pages)`.
///
/// With `create`, missing intermediate tables are allocated and linked;
/// otherwise non-present subtrees are skipped by whole coverage strides.
pub fn walk(
	root: Pfn,
	vaddr: VirtAddr,
	n: usize,
	create: bool,
	ops: &mut dyn WalkOps,
) -> AllocResult<()> {
	debug_assert!(vaddr.is_aligned_to(PAGE_SIZE));
	let mut vaddr = vaddr;
	let mut remaining = n;
	walk_table(root, levels(), &mut vaddr, &mut remaining, create, ops)
}

fn walk_table(
	table: Pfn,
	level: u8,
	vaddr: &mut VirtAddr,
	remaining: &mut usize,
	create: bool,
	ops: &mut dyn WalkOps,
) -> AllocResult<()> {
	let entries = unsafe { table_entries(table) };
	let mut idx = entry_index(*vaddr, level);
	while *remaining > 0 && idx < ENTRIES_PER_TABLE {
		let e = &mut entries[idx];
		if level == 1 {
			ops.leaf(e, *vaddr)?;
			*vaddr = *vaddr + PAGE_SIZE;
			*remaining -= 1;
		} else if e.is_present() && e.is_huge() {
			let span = span_in_entry(*vaddr, level).min(*remaining);
			ops.huge_leaf(level, e, *vaddr)?;
			*vaddr = *vaddr + span * PAGE_SIZE;
			*remaining -= span;
		} else {
			if !e.is_present() {
				if !create {
					let span = span_in_entry(*vaddr, level).min(*remaining);
					*vaddr = *vaddr + span * PAGE_SIZE;
					*remaining -= span;
					idx += 1;
					continue;
				}
				let frame = phys::alloc_frames(1)?;
				zero_frame(frame);
				*e = Entry::table(frame);
			}
			ops.pre_descend(level, e, *vaddr)?;
			walk_table(e.pfn(), level - 1, vaddr, remaining, create, ops)?;
		}
		idx += 1;
	}
	Ok(())
}

/// The number of pages left from `vaddr` to the end of the entry covering it
/// at `level`.
fn span_in_entry(vaddr: VirtAddr, level: u8) -> usize {
	let cov = coverage_pages(level);
	cov - (vaddr.0 / PAGE_SIZE) % cov
}

/// Callback table for `map`.
struct MapOps {
	pfn: Pfn,
	flags: PteFlags,
}

impl WalkOps for MapOps {
	fn leaf(&mut self, e: &mut Entry, _vaddr: VirtAddr) -> AllocResult<()> {
		debug_assert!(!e.is_present(), "mapping over a live entry");
		*e = Entry::leaf(self.pfn, self.flags);
		self.pfn = self.pfn + 1;
		Ok(())
	}
}

/// Maps `n` pages starting at `vaddr` to the frames starting at `pfn`.
///
/// The frames' mapped counts are incremented.
pub fn map_range(
	root: Pfn,
	vaddr: VirtAddr,
	pfn: Pfn,
	n: usize,
	flags: VmFlags,
) -> AllocResult<()> {
	phys::ref_frames(pfn, n);
	let mut ops = MapOps {
		pfn,
		flags: flags.to_pte(),
	};
	walk(root, vaddr, n, true, &mut ops)
}

/// Maps one frame at `vaddr` with raw PTE flags, without touching refcounts.
pub fn map_one_raw(root: Pfn, vaddr: VirtAddr, pfn: Pfn, flags: PteFlags) -> AllocResult<()> {
	let mut ops = MapOps {
		pfn,
		flags,
	};
	walk(root, vaddr, 1, true, &mut ops)
}

/// Callback table for `unmap`.
struct UnmapOps {
	/// Drop a reference on each unmapped frame.
	unref: bool,
}

impl WalkOps for UnmapOps {
	fn leaf(&mut self, e: &mut Entry, _vaddr: VirtAddr) -> AllocResult<()> {
		if e.is_present() {
			let pfn = e.pfn();
			e.clear();
			if self.unref {
				phys::unref_frames(pfn, 1);
			}
		}
		Ok(())
	}
}

/// Unmaps `n` pages starting at `vaddr`.
///
/// With `unref`, each previously-present frame loses one reference.
pub fn unmap_range(root: Pfn, vaddr: VirtAddr, n: usize, unref: bool) {
	let mut ops = UnmapOps {
		unref,
	};
	// Unmapping never allocates
	walk(root, vaddr, n, false, &mut ops).unwrap();
}

/// Callback table for `set_flags`.
struct FlagOps {
	set: PteFlags,
	clear: PteFlags,
}

impl WalkOps for FlagOps {
	fn leaf(&mut self, e: &mut Entry, _vaddr: VirtAddr) -> AllocResult<()> {
		if e.is_present() {
			let flags = (e.flags() | self.set) - self.clear;
			e.set_flags(flags);
		}
		Ok(())
	}
}

/// Updates the flags of the present entries in the given range.
pub fn set_flags_range(root: Pfn, vaddr: VirtAddr, n: usize, set: PteFlags, clear: PteFlags) {
	let mut ops = FlagOps {
		set,
		clear,
	};
	walk(root, vaddr, n, false, &mut ops).unwrap();
}

/// Resolves the frame mapped at `vaddr`, if any, together with its flags.
///
/// A huge entry resolves to the frame at the faulting offset inside it.
pub fn get_entry(root: Pfn, vaddr: VirtAddr) -> Option<Entry> {
	let mut table = root;
	let mut level = levels();
	loop {
		let entries = unsafe { table_entries(table) };
		let e = entries[entry_index(vaddr, level)];
		if !e.is_present() {
			return None;
		}
		if level == 1 {
			return Some(e);
		}
		if e.is_huge() {
			let off = (vaddr.0 / PAGE_SIZE) % coverage_pages(level);
			return Some(Entry::leaf(e.pfn() + off, e.flags() - PteFlags::HUGE));
		}
		table = e.pfn();
		level -= 1;
	}
}

/// Updates the leaf entry mapping `vaddr`, through `f`.
///
/// Returns `false` if no leaf is present at that address.
pub fn update_entry(root: Pfn, vaddr: VirtAddr, f: &mut dyn FnMut(&mut Entry)) -> bool {
	let mut table = root;
	let mut level = levels();
	loop {
		let entries = unsafe { table_entries(table) };
		let e = &mut entries[entry_index(vaddr, level)];
		if !e.is_present() {
			return false;
		}
		if level == 1 {
			f(e);
			return true;
		}
		table = e.pfn();
		level -= 1;
	}
}

/// Callback table mirroring a tree copy into a destination context.
struct CopyOps {
	/// The destination table at each level, indexed by level.
	dst: [Pfn; 6],
	/// Strip write permission from both source and destination leaves.
	cow: bool,
}

impl WalkOps for CopyOps {
	fn leaf(&mut self, e: &mut Entry, vaddr: VirtAddr) -> AllocResult<()> {
		if !e.is_present() {
			return Ok(());
		}
		if self.cow {
			e.set_flags(e.flags() - PteFlags::WRITE);
		}
		phys::ref_frames(e.pfn(), 1);
		let dst_entries = unsafe { table_entries(self.dst[1]) };
		dst_entries[entry_index(vaddr, 1)] = *e;
		Ok(())
	}

	fn pre_descend(&mut self, level: u8, e: &mut Entry, vaddr: VirtAddr) -> AllocResult<()> {
		let dst_entries = unsafe { table_entries(self.dst[level as usize]) };
		let de = &mut dst_entries[entry_index(vaddr, level)];
		if !de.is_present() {
			let frame = phys::alloc_frames(1)?;
			zero_frame(frame);
			*de = Entry::table(frame);
		}
		// Mirror the intermediate flags
		de.set_flags(e.flags());
		self.dst[level as usize - 1] = de.pfn();
		Ok(())
	}
}

/// Copies the mappings of `[vaddr, vaddr + n pages)` from the tree at
/// `src_root` into the tree at `dst_root`, referencing the physical frames
/// along the way.
///
/// With `cow`, write permission is removed from both sides, so the first
/// write from either context takes the copy-on-write fault path.
pub fn copy_range(
	src_root: Pfn,
	dst_root: Pfn,
	vaddr: VirtAddr,
	n: usize,
	cow: bool,
) -> AllocResult<()> {
	let mut dst = [Pfn(0); 6];
	dst[levels() as usize] = dst_root;
	let mut ops = CopyOps {
		dst,
		cow,
	};
	walk(src_root, vaddr, n, false, &mut ops)
}

/// Clears the leaf entries of `[vaddr, vaddr + n pages)` and frees every
/// intermediate table the range leaves empty.
///
/// With `unref`, each previously-present frame loses one reference. After a
/// `map_range` over the same arguments on a pristine tree, this restores the
/// tree bit-identical to its initial state.
pub fn destroy_range(root: Pfn, vaddr: VirtAddr, n: usize, unref: bool) {
	debug_assert!(vaddr.is_aligned_to(PAGE_SIZE));
	let mut vaddr = vaddr;
	let mut remaining = n;
	destroy_level_range(root, levels(), &mut vaddr, &mut remaining, unref, true);
}

/// Frees the intermediate tables left empty inside the given range, leaving
/// live leaf entries alone.
pub fn reclaim_empty_tables(root: Pfn, vaddr: VirtAddr, n: usize) {
	let mut vaddr = vaddr;
	let mut remaining = n;
	destroy_level_range(root, levels(), &mut vaddr, &mut remaining, false, false);
}

fn destroy_level_range(
	table: Pfn,
	level: u8,
	vaddr: &mut VirtAddr,
	remaining: &mut usize,
	unref: bool,
	clear_leaves: bool,
) {
	let entries = unsafe { table_entries(table) };
	let mut idx = entry_index(*vaddr, level);
	while *remaining > 0 && idx < ENTRIES_PER_TABLE {
		let e = &mut entries[idx];
		if level == 1 {
			if clear_leaves && e.is_present() {
				let pfn = e.pfn();
				e.clear();
				if unref {
					phys::unref_frames(pfn, 1);
				}
			}
			*vaddr = *vaddr + PAGE_SIZE;
			*remaining -= 1;
		} else if !e.is_present() || e.is_huge() {
			let span = span_in_entry(*vaddr, level).min(*remaining);
			*vaddr = *vaddr + span * PAGE_SIZE;
			*remaining -= span;
		} else {
			let child = e.pfn();
			destroy_level_range(child, level - 1, vaddr, remaining, unref, clear_leaves);
			// A child drained by the walk goes back to the buddy
			if table_is_empty(child) {
				phys::free_frames(child, 1);
				e.clear();
			}
		}
		idx += 1;
	}
}

/// Tells whether a table holds no present entry.
fn table_is_empty(table: Pfn) -> bool {
	unsafe { table_entries(table) }
		.iter()
		.all(|e| !e.is_present())
}

/// Frees every table frame of the tree below `root`, non-recursively into
/// leaves.
///
/// Present leaf entries must have been unmapped beforehand; intermediate
/// tables are freed unconditionally.
pub fn destroy_tree(root: Pfn) {
	destroy_level(root, levels());
}

fn destroy_level(table: Pfn, level: u8) {
	if level > 1 {
		let entries = unsafe { table_entries(table) };
		for e in entries.iter_mut() {
			if e.is_present() && !e.is_huge() {
				destroy_level(e.pfn(), level - 1);
			}
			e.clear();
		}
	}
	if level < levels() {
		phys::free_frames(table, 1);
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::selftest;

	fn new_root() -> Pfn {
		let root = phys::alloc_frames(1).unwrap();
		zero_frame(root);
		root
	}

	#[test]
	fn map_translate_unmap() {
		selftest::ensure_booted();
		let root = new_root();
		let frames = phys::alloc_frames(4).unwrap();
		let base = VirtAddr(0x40_0000_0000);
		map_range(root, base, frames, 4, VmFlags::READ | VmFlags::WRITE | VmFlags::USER)
			.unwrap();
		// Translation hits the right frames
		for i in 0..4 {
			let e = get_entry(root, base + i * 4096).unwrap();
			assert_eq!(e.pfn(), frames + i);
			assert!(e.flags().contains(PteFlags::WRITE));
			assert_eq!(phys::frame_mapped_count(frames + i), 1);
		}
		// A hole next door stays a hole
		assert!(get_entry(root, base + 4 * 4096).is_none());
		// Unmap restores refcounts and frees the frames
		unmap_range(root, base, 4, true);
		assert!(get_entry(root, base).is_none());
		destroy_tree(root);
		phys::free_frames(root, 1);
	}

	#[test]
	fn destroy_range_restores_pristine_tables() {
		selftest::ensure_booted();
		let root = new_root();
		let frames = phys::alloc_frames(4).unwrap();
		// Two distant ranges, each pulling in its own intermediate tables
		let a = VirtAddr(0x43_0000_0000);
		let b = VirtAddr(0x44_8000_0000);
		let flags = VmFlags::READ | VmFlags::WRITE | VmFlags::USER;
		map_range(root, a, frames, 2, flags).unwrap();
		map_range(root, b, frames + 2, 2, flags).unwrap();
		assert!(get_entry(root, a).is_some());
		assert!(get_entry(root, b).is_some());
		// Tearing down with identical arguments reclaims every emptied
		// intermediate table: the root ends up bit-identical to a fresh one
		destroy_range(root, a, 2, true);
		assert!(get_entry(root, a).is_none());
		assert!(get_entry(root, b).is_some());
		destroy_range(root, b, 2, true);
		assert!(table_is_empty(root));
		phys::free_frames(root, 1);
	}

	#[test]
	fn reclaim_leaves_live_entries_alone() {
		selftest::ensure_booted();
		let root = new_root();
		let frame = phys::alloc_frames(1).unwrap();
		let base = VirtAddr(0x45_0000_0000);
		map_range(root, base, frame, 1, VmFlags::READ | VmFlags::USER).unwrap();
		reclaim_empty_tables(root, base, 1);
		assert_eq!(get_entry(root, base).unwrap().pfn(), frame);
		destroy_range(root, base, 1, true);
		assert!(table_is_empty(root));
		phys::free_frames(root, 1);
	}

	#[test]
	fn flag_updates() {
		selftest::ensure_booted();
		let root = new_root();
		let frame = phys::alloc_frames(1).unwrap();
		let base = VirtAddr(0x41_0000_0000);
		map_range(root, base, frame, 1, VmFlags::READ | VmFlags::WRITE | VmFlags::USER)
			.unwrap();
		set_flags_range(root, base, 1, PteFlags::empty(), PteFlags::WRITE);
		let e = get_entry(root, base).unwrap();
		assert!(!e.flags().contains(PteFlags::WRITE));
		assert!(e.flags().contains(PteFlags::USER));
		unmap_range(root, base, 1, true);
		destroy_tree(root);
		phys::free_frames(root, 1);
	}

	#[test]
	fn copy_shares_frames() {
		selftest::ensure_booted();
		let (src, dst) = (new_root(), new_root());
		let frames = phys::alloc_frames(2).unwrap();
		let base = VirtAddr(0x42_0000_0000);
		map_range(src, base, frames, 2, VmFlags::READ | VmFlags::WRITE | VmFlags::USER)
			.unwrap();
		copy_range(src, dst, base, 2, true).unwrap();
		for i in 0..2 {
			let se = get_entry(src, base + i * 4096).unwrap();
			let de = get_entry(dst, base + i * 4096).unwrap();
			assert_eq!(se.pfn(), de.pfn());
			// Both sides are read-only now
			assert!(!se.flags().contains(PteFlags::WRITE));
			assert!(!de.flags().contains(PteFlags::WRITE));
			assert_eq!(phys::frame_mapped_count(frames + i), 2);
		}
		unmap_range(src, base, 2, true);
		unmap_range(dst, base, 2, true);
		destroy_tree(src);
		destroy_tree(dst);
		phys::free_frames(src, 1);
		phys::free_frames(dst, 1);
	}
}

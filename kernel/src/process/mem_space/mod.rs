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

//! Process address spaces.
//!
//! An address space owns a root page directory and an ordered list of VMAs.
//! Areas never overlap. The permissions visible to the hardware are the
//! minimum of what the VMA grants and what the page table stores: fork
//! downgrades the page-table side, never the VMA, and the write fault
//! resolves the difference with a copy or a permission restore.
//!
//! User memory is only ever touched through [`MemSpace::read_bytes`] and
//! [`MemSpace::write_bytes`], which drive the fault handler exactly like the
//! MMU would.

pub mod vma;

use crate::{
	file::{inode::Inode, page_cache},
	memory::{
		self,
		paging::{self, PteFlags, VmFlags},
		phys, Pfn, PhysAddr, VirtAddr, ADDR_USER_MMAP, USER_BASE, USER_END,
	},
	sync::Mutex,
};
use alloc::{collections::BTreeMap, sync::Arc};
use bitflags::bitflags;
use core::mem::{size_of, MaybeUninit};
use utils::{bytes::AnyRepr, errno, errno::EResult, limits::PAGE_SIZE, math};
pub use vma::{ForkMode, PageBucket, VmArea, VmaBacking, VmaContent, VmaStats};

bitflags! {
	/// Flags controlling an `mmap` operation.
	#[derive(Clone, Copy, Debug, Eq, PartialEq)]
	pub struct MmapFlags: u32 {
		/// Fail if the hint address is not available.
		const EXACT = 1 << 0;
		/// Modifications stay private to this address space across `fork`.
		const PRIVATE = 1 << 1;
		/// Modifications are shared with every mapping of the same object.
		const SHARED = 1 << 2;
	}
}

/// Limit on fault-retry loops in the user access paths.
const FAULT_RETRIES: usize = 4;

#[derive(Default)]
#[derive(Debug)]
struct SpaceInner {
	/// Areas, keyed by start address.
	vmas: BTreeMap<VirtAddr, VmArea>,
}

impl SpaceInner {
	/// The area containing `addr`, if any.
	fn vma_for(&self, addr: VirtAddr) -> Option<&VmArea> {
		self.vmas
			.range(..=addr)
			.next_back()
			.map(|(_, v)| v)
			.filter(|v| v.contains(addr))
	}

	fn vma_for_mut(&mut self, addr: VirtAddr) -> Option<&mut VmArea> {
		self.vmas
			.range_mut(..=addr)
			.next_back()
			.map(|(_, v)| v)
			.filter(|v| v.contains(addr))
	}

	/// Tells whether `[start, start + npages)` overlaps no area.
	fn is_free(&self, start: VirtAddr, npages: usize) -> bool {
		let end = start + npages * PAGE_SIZE;
		!self.vmas.values().any(|v| v.intersects(start, end))
	}

	/// Finds the first gap of `npages` pages at or above `from`.
	fn find_gap(&self, from: VirtAddr, npages: usize) -> Option<VirtAddr> {
		let mut candidate = VirtAddr(math::align_up(from.0.max(USER_BASE.0), PAGE_SIZE));
		for vma in self.vmas.values() {
			if vma.end() <= candidate {
				continue;
			}
			if vma.begin >= candidate + npages * PAGE_SIZE {
				break;
			}
			candidate = vma.end();
		}
		(candidate + npages * PAGE_SIZE <= USER_END).then_some(candidate)
	}
}

/// A process address space.
#[derive(Debug)]
pub struct MemSpace {
	/// PFN of the top-level page table.
	root: Pfn,
	/// The shared kernel context never tears down its tables.
	kernel: bool,
	/// The space's big lock, protecting the VMA list and flag changes.
	inner: Mutex<SpaceInner>,
}

impl MemSpace {
	/// Creates an empty user address space.
	pub fn new() -> EResult<Self> {
		let root = phys::alloc_frames(1)?;
		memory::zero_frame(root);
		Ok(Self {
			root,
			kernel: false,
			inner: Mutex::new(SpaceInner::default()),
		})
	}

	/// Returns the shared kernel address space.
	pub fn kernel() -> Arc<MemSpace> {
		static KERNEL: crate::sync::OnceInit<Arc<MemSpace>> = crate::sync::OnceInit::new();
		if let Some(mm) = KERNEL.try_get() {
			return mm.clone();
		}
		KERNEL.init(Arc::new(MemSpace {
			root: memory::kernel_root(),
			kernel: true,
			inner: Mutex::new(SpaceInner::default()),
		}));
		KERNEL.get().clone()
	}

	/// The PFN of the space's top-level table.
	pub fn root(&self) -> Pfn {
		self.root
	}

	/// Places and records an area.
	fn map_impl(
		&self,
		hint: VirtAddr,
		flags: MmapFlags,
		vm_flags: VmFlags,
		npages: usize,
		content: VmaContent,
		backing: VmaBacking,
	) -> EResult<VirtAddr> {
		if npages == 0 || !hint.is_aligned_to(PAGE_SIZE) {
			return Err(errno!(EINVAL));
		}
		if flags.contains(MmapFlags::PRIVATE) == flags.contains(MmapFlags::SHARED) {
			return Err(errno!(EINVAL));
		}
		let fork_mode = if flags.contains(MmapFlags::SHARED) {
			ForkMode::Shared
		} else {
			ForkMode::Private
		};
		let mut inner = self.inner.lock();
		let begin = if flags.contains(MmapFlags::EXACT) {
			if hint.is_null() || hint < USER_BASE || hint + npages * PAGE_SIZE > USER_END {
				return Err(errno!(EINVAL));
			}
			if !inner.is_free(hint, npages) {
				return Err(errno!(EEXIST));
			}
			hint
		} else {
			// Search upward from the hint, then from the mmap base;
			// placement does not depend on SHARED vs PRIVATE
			let from_hint = (!hint.is_null())
				.then(|| inner.find_gap(hint, npages))
				.flatten();
			from_hint
				.or_else(|| inner.find_gap(ADDR_USER_MMAP, npages))
				.ok_or(errno!(ENOMEM))?
		};
		let vma = VmArea::new(begin, npages, vm_flags | VmFlags::USER, content, fork_mode, backing);
		inner.vmas.insert(begin, vma);
		Ok(begin)
	}

	/// Maps `npages` of zero-filled memory.
	///
	/// Physical frames materialize on first touch.
	pub fn map_anonymous(
		&self,
		hint: VirtAddr,
		flags: MmapFlags,
		vm_flags: VmFlags,
		npages: usize,
		content: VmaContent,
	) -> EResult<VirtAddr> {
		self.map_impl(hint, flags, vm_flags, npages, content, VmaBacking::Anon)
	}

	/// Maps `npages` of the given file, starting at page offset `pgoff`.
	///
	/// Pages come from the inode's page cache on demand. `SHARED` mappings
	/// alias the cache frames; `PRIVATE` mappings copy on write.
	pub fn map_file(
		&self,
		hint: VirtAddr,
		flags: MmapFlags,
		vm_flags: VmFlags,
		npages: usize,
		inode: Arc<Inode>,
		pgoff: usize,
		content: VmaContent,
	) -> EResult<VirtAddr> {
		self.map_impl(
			hint,
			flags,
			vm_flags,
			npages,
			content,
			VmaBacking::File {
				inode,
				pgoff,
			},
		)
	}

	/// Unmaps every page intersecting `[addr, addr + size)`.
	///
	/// A partially covered area at either end is split.
	pub fn unmap(&self, addr: VirtAddr, size: usize) -> EResult<()> {
		if size == 0 {
			return Err(errno!(EINVAL));
		}
		let start = addr.page_align_down();
		let end = VirtAddr(math::align_up(addr.0 + size, PAGE_SIZE));
		let mut inner = self.inner.lock();
		let hit: alloc::vec::Vec<VirtAddr> = inner
			.vmas
			.values()
			.filter(|v| v.intersects(start, end))
			.map(|v| v.begin)
			.collect();
		for begin in hit {
			let vma = inner.vmas.remove(&begin).unwrap();
			let rm_start = vma.begin.0.max(start.0);
			let rm_end = vma.end().0.min(end.0);
			let off = (rm_start - vma.begin.0) / PAGE_SIZE;
			let n = (rm_end - rm_start) / PAGE_SIZE;
			// Drop the pages and reclaim intermediate tables the hole empties
			paging::destroy_range(self.root, VirtAddr(rm_start), n, true);
			let (before, after) = vma.split(off, n);
			if let Some(v) = before {
				inner.vmas.insert(v.begin, v);
			}
			if let Some(v) = after {
				inner.vmas.insert(v.begin, v);
			}
		}
		Ok(())
	}

	/// Changes the protection of every page in `[addr, addr + size)`.
	///
	/// The VMA records the new permissions; live page-table entries are
	/// downgraded immediately, while upgrades materialize lazily through the
	/// fault handler so copy-on-write is preserved.
	pub fn protect(&self, addr: VirtAddr, size: usize, perm: VmFlags) -> EResult<()> {
		let start = addr.page_align_down();
		let end = VirtAddr(math::align_up(addr.0 + size, PAGE_SIZE));
		let mut inner = self.inner.lock();
		let hit: alloc::vec::Vec<VirtAddr> = inner
			.vmas
			.values()
			.filter(|v| v.intersects(start, end))
			.map(|v| v.begin)
			.collect();
		if hit.is_empty() {
			return Err(errno!(ENOMEM));
		}
		for begin in hit {
			let vma = inner.vmas.remove(&begin).unwrap();
			let ch_start = vma.begin.0.max(start.0);
			let ch_end = vma.end().0.min(end.0);
			let off = (ch_start - vma.begin.0) / PAGE_SIZE;
			let n = (ch_end - ch_start) / PAGE_SIZE;
			let (before, after) = vma.split(off, n);
			let mut mid = VmArea {
				begin: VirtAddr(ch_start),
				npages: n,
				pages: vma.pages[off..off + n].to_vec(),
				..vma.clone()
			};
			if let VmaBacking::File {
				inode,
				pgoff,
			} = &vma.backing
			{
				mid.backing = VmaBacking::File {
					inode: inode.clone(),
					pgoff: pgoff + off,
				};
			}
			let removed = (mid.flags - (perm | VmFlags::USER)).to_pte();
			mid.flags = perm | VmFlags::USER;
			if !removed.is_empty() {
				paging::set_flags_range(
					self.root,
					mid.begin,
					n,
					PteFlags::empty(),
					removed,
				);
			}
			// Sweep intermediate tables the changed range may have left
			// empty
			paging::reclaim_empty_tables(self.root, mid.begin, n);
			for v in [before, Some(mid), after].into_iter().flatten() {
				inner.vmas.insert(v.begin, v);
			}
		}
		Ok(())
	}

	/// Resolves a page fault at `addr`.
	///
	/// Returns `true` if the access may be retried, `false` if the fault is
	/// a genuine violation (the caller turns that into SIGSEGV or `EFAULT`).
	pub fn handle_fault(&self, addr: VirtAddr, write: bool) -> EResult<bool> {
		let page = addr.page_align_down();
		let mut inner = self.inner.lock();
		let root = self.root;
		let Some(vma) = inner.vma_for_mut(page) else {
			return Ok(false);
		};
		if write && !vma.flags.contains(VmFlags::WRITE) {
			return Ok(false);
		}
		if !write && !vma.flags.contains(VmFlags::READ) {
			return Ok(false);
		}
		let idx = vma.page_index(page);
		match paging::get_entry(root, page) {
			// Write to a present read-only page of a private area: COW
			Some(e) if write && !e.flags().contains(PteFlags::WRITE) => {
				if vma.fork_mode != ForkMode::Private {
					return Ok(false);
				}
				let old = e.pfn();
				if phys::frame_mapped_count(old) == 1 {
					// Sole owner: restore write access
					paging::update_entry(root, page, &mut |e| {
						e.set_flags(e.flags() | PteFlags::WRITE);
					});
					return Ok(true);
				}
				let fresh = phys::alloc_frames(1)?;
				unsafe {
					fresh.page_mut().copy_from_slice(&*old.page_mut());
				}
				phys::ref_frames(fresh, 1);
				let flags = vma.flags.to_pte();
				paging::update_entry(root, page, &mut |e| {
					*e = paging::Entry::leaf(fresh, flags);
				});
				phys::unref_frames(old, 1);
				vma.pages[idx] = PageBucket::Cow;
				Ok(true)
			}
			Some(_) => Ok(false),
			// Demand paging
			None => {
				match &vma.backing {
					VmaBacking::Anon => {
						let frame = phys::alloc_frame_zeroed_mapped()?;
						paging::map_one_raw(
							root,
							page,
							frame,
							vma.flags.to_pte(),
						)?;
						vma.pages[idx] = PageBucket::Regular;
					}
					VmaBacking::File {
						inode,
						pgoff,
					} => {
						let frame = page_cache::get_page_for_read(inode, pgoff + idx)?;
						phys::ref_frames(frame, 1);
						// Private file pages start read-only and go
						// through COW on write
						let mut flags = vma.flags.to_pte();
						if vma.fork_mode == ForkMode::Private {
							flags -= PteFlags::WRITE;
						}
						paging::map_one_raw(root, page, frame, flags)?;
						vma.pages[idx] = PageBucket::PageCache;
					}
				}
				Ok(true)
			}
		}
	}

	/// Clones the address space for `fork`.
	///
	/// `PRIVATE` areas are cloned copy-on-write: the page-table structure is
	/// mirrored, both sides lose write access and every frame gains a
	/// reference. `SHARED` areas alias the frames with identical protection.
	pub fn fork(&self) -> EResult<MemSpace> {
		let inner = self.inner.lock();
		let new = MemSpace::new()?;
		let mut new_inner = new.inner.lock();
		for vma in inner.vmas.values() {
			let cow = vma.fork_mode == ForkMode::Private;
			paging::copy_range(self.root, new.root, vma.begin, vma.npages, cow)?;
			new_inner.vmas.insert(vma.begin, vma.clone());
		}
		drop(new_inner);
		Ok(new)
	}

	/// Drops every mapping, as `execve` requires.
	pub fn clear(&self) {
		let mut inner = self.inner.lock();
		let vmas = core::mem::take(&mut inner.vmas);
		for vma in vmas.values() {
			paging::destroy_range(self.root, vma.begin, vma.npages, true);
		}
	}

	/// The area stats for the area containing `addr`.
	pub fn vma_stats_at(&self, addr: VirtAddr) -> Option<VmaStats> {
		self.inner.lock().vma_for(addr).map(|v| v.stats())
	}

	/// The number of areas.
	pub fn vma_count(&self) -> usize {
		self.inner.lock().vmas.len()
	}

	/// Translates `addr`, faulting the page in if needed.
	pub fn get_phys(&self, addr: VirtAddr) -> EResult<PhysAddr> {
		for _ in 0..FAULT_RETRIES {
			if let Some(e) = paging::get_entry(self.root, addr.page_align_down()) {
				return Ok(PhysAddr(e.pfn().phys().0 + addr.0 % PAGE_SIZE));
			}
			if !self.handle_fault(addr, false)? {
				break;
			}
		}
		Err(errno!(EFAULT))
	}

	/// Copies bytes out of the space, driving the fault handler on misses.
	pub fn read_bytes(&self, addr: VirtAddr, buf: &mut [u8]) -> EResult<()> {
		let mut cur = addr;
		let mut done = 0;
		while done < buf.len() {
			let page = cur.page_align_down();
			let off = cur.0 % PAGE_SIZE;
			let chunk = (buf.len() - done).min(PAGE_SIZE - off);
			let pfn = self.resolve(page, false)?;
			let page_mem = unsafe { pfn.page_mut() };
			buf[done..done + chunk].copy_from_slice(&page_mem[off..off + chunk]);
			cur = cur + chunk;
			done += chunk;
		}
		Ok(())
	}

	/// Copies bytes into the space, taking write faults like stores would.
	pub fn write_bytes(&self, addr: VirtAddr, buf: &[u8]) -> EResult<()> {
		let mut cur = addr;
		let mut done = 0;
		while done < buf.len() {
			let page = cur.page_align_down();
			let off = cur.0 % PAGE_SIZE;
			let chunk = (buf.len() - done).min(PAGE_SIZE - off);
			let pfn = self.resolve(page, true)?;
			let page_mem = unsafe { pfn.page_mut() };
			page_mem[off..off + chunk].copy_from_slice(&buf[done..done + chunk]);
			cur = cur + chunk;
			done += chunk;
		}
		Ok(())
	}

	/// Resolves the frame behind `page`, retrying through the fault handler.
	fn resolve(&self, page: VirtAddr, write: bool) -> EResult<Pfn> {
		for _ in 0..FAULT_RETRIES {
			if let Some(e) = paging::get_entry(self.root, page) {
				if !write || e.flags().contains(PteFlags::WRITE) {
					return Ok(e.pfn());
				}
			}
			if !self.handle_fault(page, write)? {
				return Err(errno!(EFAULT));
			}
		}
		Err(errno!(EFAULT))
	}

	/// Reads one plain value.
	pub fn read_obj<T: AnyRepr>(&self, addr: VirtAddr) -> EResult<T> {
		let mut val = MaybeUninit::<T>::uninit();
		let buf = unsafe {
			core::slice::from_raw_parts_mut(val.as_mut_ptr() as *mut u8, size_of::<T>())
		};
		self.read_bytes(addr, buf)?;
		Ok(unsafe { val.assume_init() })
	}

	/// Writes one plain value.
	pub fn write_obj<T: AnyRepr>(&self, addr: VirtAddr, val: &T) -> EResult<()> {
		self.write_bytes(addr, utils::bytes::as_bytes(val))
	}

	/// Reads a NUL-terminated string, bounded by `max`.
	pub fn read_cstring(&self, addr: VirtAddr, max: usize) -> EResult<alloc::string::String> {
		let mut out = alloc::vec::Vec::new();
		let mut cur = addr;
		while out.len() < max {
			let b: u8 = self.read_obj(cur)?;
			if b == 0 {
				return alloc::string::String::from_utf8(out)
					.map_err(|_| errno!(EINVAL));
			}
			out.push(b);
			cur = cur + 1;
		}
		Err(errno!(ENAMETOOLONG))
	}
}

impl Drop for MemSpace {
	fn drop(&mut self) {
		if self.kernel {
			return;
		}
		let inner = self.inner.lock();
		for vma in inner.vmas.values() {
			paging::destroy_range(self.root, vma.begin, vma.npages, true);
		}
		// Tables outside any area (stale after partial unmaps) go last
		paging::destroy_tree(self.root);
		phys::free_frames(self.root, 1);
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::selftest;

	fn rw() -> VmFlags {
		VmFlags::READ | VmFlags::WRITE
	}

	#[test]
	fn mmap_placement_and_roundtrip() {
		selftest::ensure_booted();
		let mm = MemSpace::new().unwrap();
		let a = mm
			.map_anonymous(VirtAddr(0), MmapFlags::PRIVATE, rw(), 3, VmaContent::Mmap)
			.unwrap();
		assert_eq!(a, ADDR_USER_MMAP);
		// Touch all three pages
		mm.write_bytes(a, &[1, 2, 3]).unwrap();
		mm.write_obj(a + PAGE_SIZE, &0xdeadbeef_u32).unwrap();
		mm.write_bytes(a + 2 * PAGE_SIZE, &[9]).unwrap();
		let val: u32 = mm.read_obj(a + PAGE_SIZE).unwrap();
		assert_eq!(val, 0xdeadbeef);
		// Every frame is private to the mapping
		let pfns: alloc::vec::Vec<_> = (0..3)
			.map(|i| mm.get_phys(a + i * PAGE_SIZE).unwrap().pfn())
			.collect();
		for pfn in &pfns {
			assert_eq!(phys::frame_mapped_count(*pfn), 1);
		}
		// The exact unmap drops them all back to the buddy
		mm.unmap(a, 3 * PAGE_SIZE).unwrap();
		assert_eq!(mm.vma_count(), 0);
		let mut b = [0u8; 1];
		assert!(mm.read_bytes(a, &mut b).is_err());
	}

	#[test]
	fn exact_placement_conflicts() {
		selftest::ensure_booted();
		let mm = MemSpace::new().unwrap();
		let hint = VirtAddr(0x50_0000_0000);
		let a = mm
			.map_anonymous(hint, MmapFlags::PRIVATE | MmapFlags::EXACT, rw(), 2, VmaContent::Mmap)
			.unwrap();
		assert_eq!(a, hint);
		// Same range again must fail
		assert!(mm
			.map_anonymous(hint, MmapFlags::PRIVATE | MmapFlags::EXACT, rw(), 1, VmaContent::Mmap)
			.is_err());
		// Non-exact hint inside the taken range slides upward
		let b = mm
			.map_anonymous(hint, MmapFlags::PRIVATE, rw(), 1, VmaContent::Mmap)
			.unwrap();
		assert_eq!(b, hint + 2 * PAGE_SIZE);
		mm.unmap(hint, 3 * PAGE_SIZE).unwrap();
	}

	#[test]
	fn munmap_splits_vma() {
		selftest::ensure_booted();
		let mm = MemSpace::new().unwrap();
		let a = mm
			.map_anonymous(VirtAddr(0), MmapFlags::PRIVATE, rw(), 4, VmaContent::Mmap)
			.unwrap();
		for i in 0..4 {
			mm.write_bytes(a + i * PAGE_SIZE, &[i as u8]).unwrap();
		}
		// Punch a hole over pages 1..3
		mm.unmap(a + PAGE_SIZE, 2 * PAGE_SIZE).unwrap();
		assert_eq!(mm.vma_count(), 2);
		let mut b = [0u8; 1];
		mm.read_bytes(a, &mut b).unwrap();
		assert_eq!(b[0], 0);
		mm.read_bytes(a + 3 * PAGE_SIZE, &mut b).unwrap();
		assert_eq!(b[0], 3);
		assert!(mm.read_bytes(a + PAGE_SIZE, &mut b).is_err());
		mm.unmap(a, 4 * PAGE_SIZE).unwrap();
	}

	#[test]
	fn cow_after_fork() {
		selftest::ensure_booted();
		let parent = MemSpace::new().unwrap();
		let a = parent
			.map_anonymous(VirtAddr(0), MmapFlags::PRIVATE, rw(), 1, VmaContent::Mmap)
			.unwrap();
		parent.write_bytes(a, &[0x41]).unwrap();
		let parent_pfn = PhysAddr(parent.get_phys(a).unwrap().0).pfn();
		assert_eq!(phys::frame_mapped_count(parent_pfn), 1);

		let child = parent.fork().unwrap();
		assert_eq!(phys::frame_mapped_count(parent_pfn), 2);

		// Child's write copies; the parent keeps its byte
		child.write_bytes(a, &[0x42]).unwrap();
		let mut b = [0u8; 1];
		parent.read_bytes(a, &mut b).unwrap();
		assert_eq!(b[0], 0x41);
		child.read_bytes(a, &mut b).unwrap();
		assert_eq!(b[0], 0x42);
		// Two distinct frames now; the child accounts one COW page
		let child_pfn = PhysAddr(child.get_phys(a).unwrap().0).pfn();
		assert_ne!(parent_pfn, child_pfn);
		assert_eq!(phys::frame_mapped_count(parent_pfn), 1);
		assert_eq!(child.vma_stats_at(a).unwrap().cow, 1);
		assert_eq!(child.vma_stats_at(a).unwrap().regular, 0);

		// The parent is sole owner again: its next write restores access
		// in place, no copy
		parent.write_bytes(a, &[0x43]).unwrap();
		assert_eq!(
			PhysAddr(parent.get_phys(a).unwrap().0).pfn(),
			parent_pfn
		);
		assert_eq!(parent.vma_stats_at(a).unwrap().regular, 1);
	}

	#[test]
	fn shared_fork_aliases() {
		selftest::ensure_booted();
		let parent = MemSpace::new().unwrap();
		let a = parent
			.map_anonymous(VirtAddr(0), MmapFlags::SHARED, rw(), 1, VmaContent::Mmap)
			.unwrap();
		parent.write_bytes(a, &[7]).unwrap();
		let child = parent.fork().unwrap();
		child.write_bytes(a, &[8]).unwrap();
		let mut b = [0u8; 1];
		parent.read_bytes(a, &mut b).unwrap();
		assert_eq!(b[0], 8);
	}

	#[test]
	fn demand_paged_private_file() {
		selftest::ensure_booted();
		use crate::{file::vfs, io::OpenFlags};
		use utils::collections::path::Path;
		let root = vfs::root_dentry();
		// A 3-page read-only file from the initrd whose cache fills on
		// demand
		let io = vfs::open(
			&root,
			Path::new("/initrd/data/three_pages"),
			OpenFlags::READ,
			0,
		)
		.unwrap();
		let inode = io.mapped_inode(false).unwrap();
		let mm = MemSpace::new().unwrap();
		let a = mm
			.map_file(
				VirtAddr(0),
				MmapFlags::PRIVATE,
				rw(),
				3,
				inode.clone(),
				0,
				VmaContent::Mmap,
			)
			.unwrap();
		// Touch pages 0 and 2, skipping page 1
		let mut b = [0u8; 1];
		mm.read_bytes(a, &mut b).unwrap();
		assert_eq!(b[0], b'a');
		mm.read_bytes(a + 2 * PAGE_SIZE, &mut b).unwrap();
		assert_eq!(b[0], b'c');
		assert!(inode.cache.peek(0).is_some());
		assert!(inode.cache.peek(1).is_none());
		assert!(inode.cache.peek(2).is_some());
		// Writing page 0 copies it out of the cache; the cache frame loses
		// the mapping's reference
		let cache_pfn = inode.cache.peek(0).unwrap();
		assert_eq!(phys::frame_mapped_count(cache_pfn), 2);
		mm.write_bytes(a, &[b'X']).unwrap();
		assert_eq!(phys::frame_mapped_count(cache_pfn), 1);
		assert_eq!(mm.vma_stats_at(a).unwrap().cow, 1);
		assert_eq!(mm.vma_stats_at(a).unwrap().pagecache, 1);
		// The file itself is untouched
		let mut fb = [0u8; 1];
		io.pread(&mut fb, 0).unwrap();
		assert_eq!(fb[0], b'a');
	}

	#[test]
	fn shared_file_mapping_is_coherent() {
		selftest::ensure_booted();
		use crate::{file::vfs, io::OpenFlags};
		use utils::collections::path::Path;
		let root = vfs::root_dentry();
		let io = vfs::open(
			&root,
			Path::new("/shared-file"),
			OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE,
			0o644,
		)
		.unwrap();
		io.write(&alloc::vec![0u8; PAGE_SIZE]).unwrap();
		let inode = io.mapped_inode(true).unwrap();
		// Two address spaces share the mapping
		let mm_a = MemSpace::new().unwrap();
		let mm_b = MemSpace::new().unwrap();
		let a = mm_a
			.map_file(VirtAddr(0), MmapFlags::SHARED, rw(), 1, inode.clone(), 0, VmaContent::Mmap)
			.unwrap();
		let b = mm_b
			.map_file(VirtAddr(0), MmapFlags::SHARED, rw(), 1, inode.clone(), 0, VmaContent::Mmap)
			.unwrap();
		// A's store is visible to B without further syscalls
		mm_a.write_bytes(a, b"shared!").unwrap();
		let mut buf = [0u8; 7];
		mm_b.read_bytes(b, &mut buf).unwrap();
		assert_eq!(&buf, b"shared!");
		// And to plain file reads through the cache
		let mut fbuf = [0u8; 7];
		io.pread(&mut fbuf, 0).unwrap();
		assert_eq!(&fbuf, b"shared!");
		drop(mm_a);
		drop(mm_b);
		drop(io);
		vfs::unlink(&root, Path::new("/shared-file")).unwrap();
	}

	#[test]
	fn protect_downgrades() {
		selftest::ensure_booted();
		let mm = MemSpace::new().unwrap();
		let a = mm
			.map_anonymous(VirtAddr(0), MmapFlags::PRIVATE, rw(), 1, VmaContent::Mmap)
			.unwrap();
		mm.write_bytes(a, &[1]).unwrap();
		mm.protect(a, PAGE_SIZE, VmFlags::READ).unwrap();
		// Reads still work, writes now fault unresolvably
		let mut b = [0u8; 1];
		mm.read_bytes(a, &mut b).unwrap();
		assert!(mm.write_bytes(a, &[2]).is_err());
		mm.unmap(a, PAGE_SIZE).unwrap();
	}
}

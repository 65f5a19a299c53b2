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

//! Memory management.
//!
//! All of RAM is linearly mapped at the direct-map base, making
//! PFN ↔ virtual-address conversion O(1) arithmetic. The direct map is
//! established before any refcounted allocation is served.

pub mod paging;
pub mod phys;
pub mod ring_buffer;
pub mod slab;
pub mod stats;
pub mod user;

use crate::{boot::BootInfo, sync::OnceInit};
use core::{
	fmt,
	ops::{Add, Sub},
	sync::atomic::{AtomicUsize, Ordering::Relaxed},
};
use utils::limits::PAGE_SIZE;

/// A page worth of bytes.
pub type Page = [u8; PAGE_SIZE];

/// Lowest valid userspace address. The zero page is never mapped.
pub const USER_BASE: VirtAddr = VirtAddr(PAGE_SIZE);
/// End of userspace (exclusive), for a 4-level, 48-bit layout.
pub const USER_END: VirtAddr = VirtAddr(0x7fff_ffff_f000);
/// Search base for address-space allocations without a usable hint.
pub const ADDR_USER_MMAP: VirtAddr = VirtAddr(0x40_0000_0000);
/// Base address the ELF interpreter is loaded at.
pub const ADDR_INTERPRETER: VirtAddr = VirtAddr(0x6000_0000_0000);
/// Top of the main thread's stack.
pub const ADDR_USER_STACK_TOP: VirtAddr = VirtAddr(0x7fff_ff00_0000);
/// Load bias applied to `ET_DYN` executables.
pub const ADDR_PIE_BASE: VirtAddr = VirtAddr(0x5555_0000_0000);

/// A physical frame number: an index into the frame array.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Pfn(pub usize);

/// A physical address.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PhysAddr(pub usize);

/// A virtual address.
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct VirtAddr(pub usize);

impl Pfn {
	/// The physical address of the frame's first byte.
	#[inline]
	pub fn phys(self) -> PhysAddr {
		PhysAddr(self.0 * PAGE_SIZE)
	}

	/// The direct-map pointer to the frame's first byte.
	#[inline]
	pub fn ptr(self) -> *mut u8 {
		phys_to_virt(self.phys())
	}

	/// Returns the frame's content through the direct map.
	///
	/// # Safety
	///
	/// The frame must be owned by the caller, with no concurrent access.
	#[allow(clippy::mut_from_ref)]
	pub unsafe fn page_mut<'a>(self) -> &'a mut Page {
		&mut *(self.ptr() as *mut Page)
	}
}

impl Add<usize> for Pfn {
	type Output = Pfn;

	fn add(self, rhs: usize) -> Pfn {
		Pfn(self.0 + rhs)
	}
}

impl PhysAddr {
	/// The frame containing this address.
	#[inline]
	pub fn pfn(self) -> Pfn {
		Pfn(self.0 / PAGE_SIZE)
	}
}

impl VirtAddr {
	/// Tells whether the address is aligned to `align`.
	#[inline]
	pub fn is_aligned_to(self, align: usize) -> bool {
		self.0 % align == 0
	}

	/// Rounds the address down to a page boundary.
	#[inline]
	pub fn page_align_down(self) -> Self {
		Self(utils::math::align_down(self.0, PAGE_SIZE))
	}

	/// Tells whether the address is null.
	#[inline]
	pub fn is_null(self) -> bool {
		self.0 == 0
	}
}

impl Add<usize> for VirtAddr {
	type Output = VirtAddr;

	fn add(self, rhs: usize) -> VirtAddr {
		VirtAddr(self.0 + rhs)
	}
}

impl Sub<VirtAddr> for VirtAddr {
	type Output = usize;

	fn sub(self, rhs: VirtAddr) -> usize {
		self.0 - rhs.0
	}
}

impl fmt::Debug for VirtAddr {
	fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(fmt, "{:#x}", self.0)
	}
}

/// The virtual base of the direct map.
static DIRECT_MAP_BASE: AtomicUsize = AtomicUsize::new(0);

/// Converts a physical address to its direct-map virtual address.
#[inline]
pub fn phys_to_virt(addr: PhysAddr) -> *mut u8 {
	let base = DIRECT_MAP_BASE.load(Relaxed);
	debug_assert!(base != 0, "direct map not established");
	(base + addr.0) as *mut u8
}

/// Converts a direct-map pointer back to its physical address.
#[inline]
pub fn virt_to_phys(ptr: *const u8) -> PhysAddr {
	let base = DIRECT_MAP_BASE.load(Relaxed);
	debug_assert!(base != 0, "direct map not established");
	PhysAddr(ptr as usize - base)
}

/// The shared kernel page directory, established at init.
static KERNEL_ROOT: OnceInit<Pfn> = OnceInit::new();

/// Returns the PFN of the kernel's top-level page table.
pub fn kernel_root() -> Pfn {
	*KERNEL_ROOT.get()
}

/// Initializes memory management: direct map, then PMM, then the kernel page
/// directory.
///
/// This is the `MM` init phase; it must run before any other subsystem.
pub fn init(boot: &BootInfo<'_>) {
	DIRECT_MAP_BASE.store(boot.direct_map_base, Relaxed);
	phys::init(boot);
	let root = phys::alloc_frames(1).expect("cannot allocate kernel page directory");
	unsafe {
		root.page_mut().fill(0);
	}
	KERNEL_ROOT.init(root);
}

/// Fills the given frame with zeros.
pub fn zero_frame(pfn: Pfn) {
	unsafe {
		pfn.page_mut().fill(0);
	}
}

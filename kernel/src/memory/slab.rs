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

//! The slab allocator.
//!
//! Typed object caches sit on top of the page allocator. A fixed set of
//! power-of-two size classes from 8 to 1024 bytes serves `kmalloc`; named
//! caches give subsystems typed allocation with the same mechanics.
//!
//! Each slab page starts with a header naming its owning cache, so `kfree`
//! recovers the cache from the pointer alone. Larger requests fall through to
//! whole pages behind a one-page header recording the allocation's size.

use super::phys;
use crate::sync::{Mutex, OnceInit};
use alloc::{sync::Arc, vec::Vec};
use core::{alloc::GlobalAlloc, ptr, ptr::NonNull};
use utils::{limits::PAGE_SIZE, math};

/// The size classes served by `kmalloc`.
const CLASS_SIZES: [usize; 8] = [8, 16, 32, 64, 128, 256, 512, 1024];

/// Header at the start of every slab page.
#[repr(C)]
struct SlabPageHeader {
	/// The cache owning this page.
	cache: *const KmemCache,
}

/// Header page in front of a large allocation.
#[repr(C)]
struct LargeHeader {
	/// Total pages of the allocation, header included.
	pages: usize,
	/// The requested size in bytes.
	size: usize,
}

/// A free object, threaded through the cache's freelist.
struct FreeObj {
	next: Option<NonNull<FreeObj>>,
}

/// Mutable state of a cache.
struct CacheInner {
	/// Head of the freelist.
	free: Option<NonNull<FreeObj>>,
	/// Number of pages acquired from the page allocator.
	nr_pages: usize,
	/// Number of objects currently handed out.
	nr_used: usize,
}

unsafe impl Send for CacheInner {}

/// A typed object cache.
pub struct KmemCache {
	/// The cache's name, for diagnostics.
	name: &'static str,
	/// Size of one object in bytes.
	obj_size: usize,
	inner: Mutex<CacheInner>,
}

impl KmemCache {
	/// Creates a cache of objects of the given size.
	fn new(name: &'static str, obj_size: usize) -> Self {
		let obj_size = obj_size.max(size_of::<FreeObj>());
		Self {
			name,
			obj_size,
			inner: Mutex::new(CacheInner {
				free: None,
				nr_pages: 0,
				nr_used: 0,
			}),
		}
	}

	/// The cache's name.
	pub fn name(&self) -> &'static str {
		self.name
	}

	/// The size of one object.
	pub fn obj_size(&self) -> usize {
		self.obj_size
	}

	/// Acquires a page and chops it into free objects.
	fn grow(&self, inner: &mut CacheInner) -> Option<()> {
		let pfn = phys::alloc_frames(1).ok()?;
		let page = pfn.ptr();
		// Owning-cache header, then objects
		unsafe {
			(page as *mut SlabPageHeader).write(SlabPageHeader {
				cache: self,
			});
			let first_off = math::align_up(size_of::<SlabPageHeader>(), self.obj_size);
			let count = (PAGE_SIZE - first_off) / self.obj_size;
			for i in 0..count {
				let obj = page.add(first_off + i * self.obj_size) as *mut FreeObj;
				(*obj).next = inner.free;
				inner.free = Some(NonNull::new_unchecked(obj));
			}
		}
		inner.nr_pages += 1;
		Some(())
	}

	/// Allocates one object. The content is uninitialized.
	pub fn alloc(&self) -> Option<NonNull<u8>> {
		let mut inner = self.inner.lock();
		if inner.free.is_none() {
			self.grow(&mut inner)?;
		}
		let obj = inner.free?;
		inner.free = unsafe { obj.as_ref().next };
		inner.nr_used += 1;
		Some(obj.cast())
	}

	/// Returns an object to the cache.
	///
	/// # Safety
	///
	/// `ptr` must have been returned by [`Self::alloc`] on this cache and not
	/// freed since.
	pub unsafe fn free(&self, ptr: NonNull<u8>) {
		let mut inner = self.inner.lock();
		let obj = ptr.cast::<FreeObj>();
		(*obj.as_ptr()).next = inner.free;
		inner.free = Some(obj);
		inner.nr_used -= 1;
	}

	/// The number of objects currently handed out.
	pub fn used_count(&self) -> usize {
		self.inner.lock().nr_used
	}
}

/// The `kmalloc` size-class caches.
static CLASSES: OnceInit<[Arc<KmemCache>; CLASS_SIZES.len()]> = OnceInit::new();
/// Every cache in the system, for diagnostics.
static REGISTRY: Mutex<Vec<Arc<KmemCache>>> = Mutex::new(Vec::new());

/// Initializes the slab allocator. This is the `SLAB` init phase; the PMM
/// must be up.
pub fn init() {
	let classes = CLASS_SIZES.map(|size| {
		let name = match size {
			8 => "kmalloc-8",
			16 => "kmalloc-16",
			32 => "kmalloc-32",
			64 => "kmalloc-64",
			128 => "kmalloc-128",
			256 => "kmalloc-256",
			512 => "kmalloc-512",
			_ => "kmalloc-1024",
		};
		Arc::new(KmemCache::new(name, size))
	});
	REGISTRY.lock().extend(classes.iter().cloned());
	CLASSES.init(classes);
}

/// Creates a named cache for objects of the given size.
pub fn kmemcache_create(name: &'static str, obj_size: usize) -> Arc<KmemCache> {
	let cache = Arc::new(KmemCache::new(name, obj_size));
	REGISTRY.lock().push(cache.clone());
	cache
}

/// Returns every registered cache.
pub fn caches() -> Vec<Arc<KmemCache>> {
	REGISTRY.lock().clone()
}

/// Allocates `size` bytes from the matching size class, falling through to
/// whole pages above the largest class.
pub fn kmalloc(size: usize) -> Option<NonNull<u8>> {
	if size == 0 {
		return None;
	}
	if size > *CLASS_SIZES.last().unwrap() {
		return kmalloc_large(size);
	}
	let class = CLASSES
		.get()
		.iter()
		.find(|c| c.obj_size() >= size)
		.unwrap();
	class.alloc()
}

fn kmalloc_large(size: usize) -> Option<NonNull<u8>> {
	let pages = 1 + size.div_ceil(PAGE_SIZE);
	let pfn = phys::alloc_frames(pages).ok()?;
	let base = pfn.ptr();
	unsafe {
		(base as *mut LargeHeader).write(LargeHeader {
			pages,
			size,
		});
		NonNull::new(base.add(PAGE_SIZE))
	}
}

/// Frees a block returned by [`kmalloc`].
///
/// # Safety
///
/// `ptr` must come from [`kmalloc`] and must not have been freed since.
pub unsafe fn kfree(ptr: NonNull<u8>) {
	let addr = ptr.as_ptr() as usize;
	if addr % PAGE_SIZE == 0 {
		// Large allocation: inspect the header page
		let hdr = (addr - PAGE_SIZE) as *mut LargeHeader;
		let pages = (*hdr).pages;
		let pfn = super::virt_to_phys(hdr as *const u8).pfn();
		phys::free_frames(pfn, pages);
		return;
	}
	// Slab object: the owning cache is named by the page header
	let page = math::align_down(addr, PAGE_SIZE) as *const SlabPageHeader;
	let cache = &*(*page).cache;
	cache.free(ptr);
}

/// A [`GlobalAlloc`] over the slab layer, for bare-metal builds where the
/// kernel heap is the Rust allocator.
pub struct KernelAllocator;

unsafe impl GlobalAlloc for KernelAllocator {
	unsafe fn alloc(&self, layout: core::alloc::Layout) -> *mut u8 {
		let size = layout.size().max(layout.align());
		kmalloc(size)
			.map(NonNull::as_ptr)
			.unwrap_or(ptr::null_mut())
	}

	unsafe fn dealloc(&self, ptr: *mut u8, _layout: core::alloc::Layout) {
		if let Some(ptr) = NonNull::new(ptr) {
			kfree(ptr);
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::selftest;

	#[test]
	fn class_roundtrip() {
		selftest::ensure_booted();
		let cache = kmemcache_create("selftest-64", 64);
		let a = cache.alloc().unwrap();
		let b = cache.alloc().unwrap();
		assert_ne!(a, b);
		assert_eq!(cache.used_count(), 2);
		unsafe {
			cache.free(a);
			cache.free(b);
		}
		assert_eq!(cache.used_count(), 0);
		// The freelist serves recycled objects
		let c = cache.alloc().unwrap();
		assert!(c == a || c == b);
		unsafe { cache.free(c) };
	}

	#[test]
	fn kmalloc_classes_and_large() {
		selftest::ensure_booted();
		let small = kmalloc(24).unwrap();
		let large = kmalloc(3 * PAGE_SIZE).unwrap();
		assert_eq!(large.as_ptr() as usize % PAGE_SIZE, 0);
		unsafe {
			small.as_ptr().write_bytes(0xab, 24);
			large.as_ptr().write_bytes(0xcd, 3 * PAGE_SIZE);
			kfree(small);
			kfree(large);
		}
	}

	#[test]
	fn distinct_objects_fill_page() {
		selftest::ensure_booted();
		let cache = kmemcache_create("selftest-128", 128);
		let objs: alloc::vec::Vec<_> = (0..40).map(|_| cache.alloc().unwrap()).collect();
		let mut addrs: alloc::vec::Vec<_> =
			objs.iter().map(|p| p.as_ptr() as usize).collect();
		addrs.sort();
		addrs.dedup();
		assert_eq!(addrs.len(), 40);
		for o in objs {
			unsafe { cache.free(o) };
		}
	}
}

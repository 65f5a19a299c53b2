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

//! The hosted test harness.
//!
//! Boots the kernel exactly once per test process, over a leaked RAM buffer
//! and a synthetic boot handoff, and provides helpers to run test bodies
//! inside kernel threads with a process context.

use crate::{
	boot::{BootInfo, MemoryRegion, MemoryRegionKind},
	elf::{Elf64Ehdr, Elf64Phdr, ET_EXEC, PF_R, PF_W, PF_X, PT_LOAD},
	memory::VirtAddr,
	platform::{self, hosted::Hosted},
	process::{
		mem_space::MemSpace,
		scheduler,
		thread::{Thread, ThreadMode},
		Process,
	},
};
use alloc::{boxed::Box, sync::Arc, vec, vec::Vec};
use std::sync::{mpsc, Once};
use utils::{bytes::as_bytes, cpio::builder::CPIOBuilder, limits::PAGE_SIZE};

/// RAM handed to the kernel, in pages.
const RAM_PAGES: usize = 16384;
/// Pages of the first usable region; a reserved hole follows it.
const FIRST_REGION_PAGES: usize = 8192;
/// Pages of the synthetic hole in the memory map.
const HOLE_PAGES: usize = 256;

/// Builds a minimal valid ELF executable for process 1.
///
/// One RWX `PT_LOAD` at 0x400000 with a bss tail, entry at its start.
pub fn minimal_elf() -> Vec<u8> {
	let ehdr = Elf64Ehdr {
		e_ident: [
			0x7f, b'E', b'L', b'F', 2, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0,
		],
		e_type: ET_EXEC,
		e_machine: crate::elf::EM_X86_64,
		e_version: 1,
		e_entry: 0x400000,
		e_phoff: 64,
		e_shoff: 0,
		e_flags: 0,
		e_ehsize: 64,
		e_phentsize: size_of::<Elf64Phdr>() as u16,
		e_phnum: 1,
		e_shentsize: 0,
		e_shnum: 0,
		e_shstrndx: 0,
	};
	let phdr = Elf64Phdr {
		p_type: PT_LOAD,
		p_flags: PF_R | PF_W | PF_X,
		p_offset: 0x1000,
		p_vaddr: 0x400000,
		p_paddr: 0,
		p_filesz: 0x100,
		p_memsz: 0x300,
		p_align: PAGE_SIZE as u64,
	};
	let mut image = vec![0u8; 0x1100];
	image[..64].copy_from_slice(as_bytes(&ehdr));
	image[64..64 + size_of::<Elf64Phdr>()].copy_from_slice(as_bytes(&phdr));
	// Recognizable text bytes
	for (i, b) in image[0x1000..0x1100].iter_mut().enumerate() {
		*b = i as u8;
	}
	image
}

/// Boots the kernel once for the whole test process.
pub fn ensure_booted() {
	static BOOT: Once = Once::new();
	BOOT.call_once(|| {
		// The platform
		let plat: &'static Hosted = Box::leak(Box::new(Hosted::new()));
		platform::init(plat);
		// RAM: one page-aligned leaked buffer backing every frame
		let words = RAM_PAGES * PAGE_SIZE / 8;
		let ram = Box::leak(vec![0u64; words].into_boxed_slice());
		let base = ram.as_ptr() as usize;
		assert_eq!(base % 8, 0);
		// The memory map carries a synthetic hole, exercising the
		// gap-stays-reserved rule
		let memory_map: &'static [MemoryRegion] = Box::leak(Box::new([
			MemoryRegion {
				base: 0,
				pages: FIRST_REGION_PAGES,
				kind: MemoryRegionKind::Usable,
			},
			MemoryRegion {
				base: (FIRST_REGION_PAGES + HOLE_PAGES) * PAGE_SIZE,
				pages: RAM_PAGES - FIRST_REGION_PAGES - HOLE_PAGES,
				kind: MemoryRegionKind::Usable,
			},
		]));
		// The initrd
		let mut three_pages = Vec::new();
		for i in 0..3u8 {
			three_pages.extend(core::iter::repeat_n(b'a' + i, PAGE_SIZE));
		}
		let mut cpio = CPIOBuilder::new();
		cpio.dir("etc")
			.file("etc/motd", b"welcome to mos\n")
			.dir("sbin")
			.file("sbin/init", &minimal_elf())
			.dir("data")
			.file("data/three_pages", &three_pages);
		let initrd: &'static [u8] = Box::leak(cpio.build().into_boxed_slice());
		let info = BootInfo {
			memory_map,
			direct_map_base: base,
			cmdline: "init=/initrd/sbin/init debug.selftest=0 scheduler=naive",
			initrd: Some(initrd),
		};
		crate::boot::kernel_init(&info).expect("kernel boot failed");
	});
}

/// A test body running in its own process.
pub struct TestJoin<T> {
	/// The process.
	pub proc: Arc<Process>,
	/// The thread running the body.
	pub thread: Arc<Thread>,
	rx: mpsc::Receiver<T>,
}

impl<T> TestJoin<T> {
	/// Waits for the body to finish and returns its result.
	pub fn join(self) -> T {
		self.rx
			.recv_timeout(std::time::Duration::from_secs(30))
			.expect("test thread timed out")
	}
}

/// Spawns a fresh process whose main thread runs `f`.
///
/// The thread is user-mode as far as the signal rules are concerned, while
/// its body runs kernel-side — the hosted stand-in for a userspace program.
pub fn spawn_process<T, F>(name: &str, f: F) -> TestJoin<T>
where
	T: Send + 'static,
	F: FnOnce() -> T + Send + 'static,
{
	ensure_booted();
	let mm = Arc::new(MemSpace::new().expect("cannot create test address space"));
	let proc = Process::new(name, mm);
	spawn_thread_in(&proc, name, f)
}

/// Spawns an extra thread running `f` inside an existing process.
pub fn spawn_thread_in<T, F>(proc: &Arc<Process>, name: &str, f: F) -> TestJoin<T>
where
	T: Send + 'static,
	F: FnOnce() -> T + Send + 'static,
{
	let (tx, rx) = mpsc::channel();
	let thread = Thread::new(ThreadMode::User, name);
	proc.attach_thread(&thread);
	scheduler::add_thread(&thread);
	platform::platform().spawn_thread(
		thread.clone(),
		Box::new(move || {
			let _ = tx.send(f());
		}),
	);
	TestJoin {
		proc: proc.clone(),
		thread,
		rx,
	}
}

/// Touches an address so a test can force a mapping to materialize.
pub fn touch(mm: &MemSpace, addr: VirtAddr) {
	mm.write_bytes(addr, &[0]).expect("touch failed");
}

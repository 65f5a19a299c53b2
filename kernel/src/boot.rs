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

//! Kernel initialization.
//!
//! The boot protocol hands the kernel a single structure describing the
//! machine. Subsystems then initialize in a fixed order:
//! `MM → SLAB → VFS → SYSFS → KTHREAD`, after which process 1 is created
//! from the initrd.

use crate::{
	cmdline, file, ipc, memory,
	process::{self, exec},
	sync::OnceInit,
};
use utils::errno::EResult;

/// The type of a boot memory region.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MemoryRegionKind {
	/// Free RAM.
	Usable,
	/// Firmware- or device-owned memory.
	Reserved,
}

/// One region of the boot memory map.
#[derive(Clone, Copy, Debug)]
pub struct MemoryRegion {
	/// Physical base address, page-aligned.
	pub base: usize,
	/// Size in pages.
	pub pages: usize,
	/// The region's type.
	pub kind: MemoryRegionKind,
}

/// The boot handoff structure.
#[derive(Clone, Debug)]
pub struct BootInfo<'a> {
	/// The physical memory map.
	pub memory_map: &'a [MemoryRegion],
	/// Virtual base of the direct map established by the boot code.
	pub direct_map_base: usize,
	/// The kernel command line.
	pub cmdline: &'a str,
	/// The initrd module, if any.
	pub initrd: Option<&'a [u8]>,
}

/// The initrd, stashed at boot for the VFS init phase.
pub static INITRD: OnceInit<Option<&'static [u8]>> = OnceInit::new();

/// Runs the kernel's ordered init phases.
///
/// The platform must have been installed beforehand. Returns once process 1
/// has been created.
pub fn kernel_init(boot: &BootInfo<'static>) -> EResult<()> {
	pr_info!("{} {}", crate::NAME, crate::VERSION);
	cmdline::parse(boot.cmdline);
	INITRD.init(boot.initrd);
	// MM
	memory::init(boot);
	// SLAB
	memory::slab::init();
	// VFS
	file::init()?;
	ipc::init();
	// SYSFS
	file::fs::sysfs::init()?;
	// KTHREAD
	process::init()?;
	// Process 1
	exec::spawn_init()?;
	pr_info!("boot complete");
	Ok(())
}

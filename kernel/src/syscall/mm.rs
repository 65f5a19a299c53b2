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

//! Memory system calls.

use crate::{
	file::fd::Fd,
	memory::{paging::VmFlags, VirtAddr},
	process::{
		mem_space::{MmapFlags, VmaContent},
		Process,
	},
};
use macros::syscall;
use utils::{errno, errno::EResult, limits::PAGE_SIZE};

/// Readable, in the user permission encoding.
const MEM_PERM_READ: u64 = 1;
/// Writable.
const MEM_PERM_WRITE: u64 = 2;
/// Executable.
const MEM_PERM_EXEC: u64 = 4;

/// Fail if the hint is not available.
const MMAP_EXACT: u64 = 1;
/// Private mapping.
const MMAP_PRIVATE: u64 = 2;
/// Shared mapping.
const MMAP_SHARED: u64 = 4;

/// Decodes user permission bits.
fn decode_perm(perm: u64) -> VmFlags {
	let mut flags = VmFlags::empty();
	if perm & MEM_PERM_READ != 0 {
		flags |= VmFlags::READ;
	}
	if perm & MEM_PERM_WRITE != 0 {
		flags |= VmFlags::WRITE;
	}
	if perm & MEM_PERM_EXEC != 0 {
		flags |= VmFlags::EXEC;
	}
	flags
}

/// Decodes user mapping flags.
fn decode_flags(flags: u64) -> MmapFlags {
	let mut out = MmapFlags::empty();
	if flags & MMAP_EXACT != 0 {
		out |= MmapFlags::EXACT;
	}
	if flags & MMAP_PRIVATE != 0 {
		out |= MmapFlags::PRIVATE;
	}
	if flags & MMAP_SHARED != 0 {
		out |= MmapFlags::SHARED;
	}
	out
}

#[syscall]
pub fn mmap_anonymous(hint: VirtAddr, size: usize, perm: u64, flags: u64) -> EResult<usize> {
	if size == 0 {
		return Err(errno!(EINVAL));
	}
	let npages = size.div_ceil(PAGE_SIZE);
	let addr = Process::current().mm().map_anonymous(
		hint,
		decode_flags(flags),
		decode_perm(perm),
		npages,
		VmaContent::Mmap,
	)?;
	Ok(addr.0)
}

#[syscall]
pub fn mmap_file(
	hint: VirtAddr,
	size: usize,
	perm: u64,
	flags: u64,
	fd: Fd,
	offset: u64,
) -> EResult<usize> {
	if size == 0 || offset as usize % PAGE_SIZE != 0 {
		return Err(errno!(EINVAL));
	}
	let npages = size.div_ceil(PAGE_SIZE);
	let mmap_flags = decode_flags(flags);
	let vm_flags = decode_perm(perm);
	let io = Process::current().fds.lock().get(fd)?;
	let shared_write = mmap_flags.contains(MmapFlags::SHARED) && vm_flags.contains(VmFlags::WRITE);
	let inode = io.mapped_inode(shared_write)?;
	let addr = Process::current().mm().map_file(
		hint,
		mmap_flags,
		vm_flags,
		npages,
		inode,
		offset as usize / PAGE_SIZE,
		VmaContent::Mmap,
	)?;
	Ok(addr.0)
}

#[syscall]
pub fn munmap(addr: VirtAddr, size: usize) -> EResult<usize> {
	Process::current().mm().unmap(addr, size)?;
	Ok(0)
}

#[syscall]
pub fn vm_protect(addr: VirtAddr, size: usize, perm: u64) -> EResult<usize> {
	Process::current()
		.mm()
		.protect(addr, size, decode_perm(perm))?;
	Ok(0)
}

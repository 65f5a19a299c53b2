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

//! ELF64 structures, as far as the loader needs them.

use utils::{bytes::AnyRepr, errno, errno::EResult};

/// The ELF magic number.
pub const MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
/// 64-bit class.
pub const CLASS_64: u8 = 2;
/// Little-endian data.
pub const DATA_LSB: u8 = 1;
/// Executable file.
pub const ET_EXEC: u16 = 2;
/// Position-independent executable.
pub const ET_DYN: u16 = 3;
/// x86_64.
pub const EM_X86_64: u16 = 62;
/// riscv.
pub const EM_RISCV: u16 = 243;
/// Loadable segment.
pub const PT_LOAD: u32 = 1;
/// Interpreter path segment.
pub const PT_INTERP: u32 = 3;
/// Segment is executable.
pub const PF_X: u32 = 1;
/// Segment is writable.
pub const PF_W: u32 = 2;
/// Segment is readable.
pub const PF_R: u32 = 4;

/// Auxiliary vector tags.
pub mod auxv {
	/// End of vector.
	pub const AT_NULL: u64 = 0;
	/// Program headers address.
	pub const AT_PHDR: u64 = 3;
	/// Size of one program header.
	pub const AT_PHENT: u64 = 4;
	/// Number of program headers.
	pub const AT_PHNUM: u64 = 5;
	/// Page size.
	pub const AT_PAGESZ: u64 = 6;
	/// Interpreter base address.
	pub const AT_BASE: u64 = 7;
	/// Program entry point.
	pub const AT_ENTRY: u64 = 9;
	/// Real user ID.
	pub const AT_UID: u64 = 11;
	/// Effective user ID.
	pub const AT_EUID: u64 = 12;
	/// Real group ID.
	pub const AT_GID: u64 = 13;
	/// Effective group ID.
	pub const AT_EGID: u64 = 14;
	/// Path of the executed file.
	pub const AT_EXECFN: u64 = 31;
}

/// The ELF64 file header.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct Elf64Ehdr {
	/// Identification bytes.
	pub e_ident: [u8; 16],
	/// File type.
	pub e_type: u16,
	/// Target machine.
	pub e_machine: u16,
	/// File version.
	pub e_version: u32,
	/// Entry point.
	pub e_entry: u64,
	/// Offset of the program header table.
	pub e_phoff: u64,
	/// Offset of the section header table.
	pub e_shoff: u64,
	/// Processor flags.
	pub e_flags: u32,
	/// Size of this header.
	pub e_ehsize: u16,
	/// Size of one program header.
	pub e_phentsize: u16,
	/// Number of program headers.
	pub e_phnum: u16,
	/// Size of one section header.
	pub e_shentsize: u16,
	/// Number of section headers.
	pub e_shnum: u16,
	/// Index of the section name table.
	pub e_shstrndx: u16,
}

unsafe impl AnyRepr for Elf64Ehdr {}

/// An ELF64 program header.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct Elf64Phdr {
	/// Segment type.
	pub p_type: u32,
	/// Segment flags.
	pub p_flags: u32,
	/// Offset of the segment in the file.
	pub p_offset: u64,
	/// Virtual address of the segment.
	pub p_vaddr: u64,
	/// Physical address, unused.
	pub p_paddr: u64,
	/// Size of the segment in the file.
	pub p_filesz: u64,
	/// Size of the segment in memory.
	pub p_memsz: u64,
	/// Alignment.
	pub p_align: u64,
}

unsafe impl AnyRepr for Elf64Phdr {}

impl Elf64Ehdr {
	/// Verifies magic, class, endianness and machine.
	pub fn validate(&self) -> EResult<()> {
		if self.e_ident[..4] != MAGIC {
			return Err(errno!(EINVAL));
		}
		if self.e_ident[4] != CLASS_64 || self.e_ident[5] != DATA_LSB {
			return Err(errno!(EINVAL));
		}
		if self.e_type != ET_EXEC && self.e_type != ET_DYN {
			return Err(errno!(EINVAL));
		}
		if self.e_machine != EM_X86_64 && self.e_machine != EM_RISCV {
			return Err(errno!(EINVAL));
		}
		if self.e_phentsize as usize != size_of::<Elf64Phdr>() {
			return Err(errno!(EINVAL));
		}
		Ok(())
	}
}

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

//! The virtual filesystem.

pub mod dentry;
pub mod fd;
pub mod fs;
pub mod inode;
pub mod mount;
pub mod page_cache;
pub mod pipe;
pub mod vfs;

use utils::errno::EResult;

/// The `VFS` init phase.
pub fn init() -> EResult<()> {
	vfs::init()
}

#[cfg(test)]
mod test {
	use super::{inode::FileType, vfs};
	use crate::{
		io::{OpenFlags, SeekWhence},
		selftest,
	};
	use alloc::vec;
	use utils::collections::path::Path;

	#[test]
	fn file_io_roundtrip() {
		selftest::ensure_booted();
		let root = vfs::root_dentry();
		vfs::mkdir(&root, Path::new("/io-test"), 0o755).unwrap();
		let io = vfs::open(
			&root,
			Path::new("/io-test/data"),
			OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE,
			0o644,
		)
		.unwrap();
		assert_eq!(io.write(b"hello, world").unwrap(), 12);
		// Reading continues at the cursor: rewind first
		assert_eq!(io.seek(0, SeekWhence::Set).unwrap(), 0);
		let mut buf = [0u8; 32];
		assert_eq!(io.read(&mut buf).unwrap(), 12);
		assert_eq!(&buf[..12], b"hello, world");
		// Reads past end of file yield 0
		assert_eq!(io.read(&mut buf).unwrap(), 0);
		// End-relative seeks clamp at the size
		assert_eq!(io.seek(100, SeekWhence::End).unwrap(), 12);
		assert_eq!(io.seek(-4, SeekWhence::End).unwrap(), 8);
		assert_eq!(io.read(&mut buf).unwrap(), 4);
		assert_eq!(&buf[..4], b"orld");
		drop(io);
		vfs::unlink(&root, Path::new("/io-test/data")).unwrap();
		vfs::rmdir(&root, Path::new("/io-test")).unwrap();
	}

	#[test]
	fn sparse_writes_span_pages() {
		selftest::ensure_booted();
		let root = vfs::root_dentry();
		let io = vfs::open(
			&root,
			Path::new("/sparse-file"),
			OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE,
			0o644,
		)
		.unwrap();
		// Write crossing a page boundary
		io.seek(4090, SeekWhence::Set).unwrap();
		io.write(b"0123456789").unwrap();
		io.seek(4090, SeekWhence::Set).unwrap();
		let mut buf = [0u8; 10];
		assert_eq!(io.read(&mut buf).unwrap(), 10);
		assert_eq!(&buf, b"0123456789");
		// The hole reads back as zeros
		io.seek(0, SeekWhence::Set).unwrap();
		let mut hole = [0xffu8; 16];
		io.read(&mut hole).unwrap();
		assert_eq!(hole, [0u8; 16]);
		drop(io);
		vfs::unlink(&root, Path::new("/sparse-file")).unwrap();
	}

	#[test]
	fn open_excl_and_truncate() {
		selftest::ensure_booted();
		let root = vfs::root_dentry();
		let io = vfs::open(
			&root,
			Path::new("/excl-file"),
			OpenFlags::WRITE | OpenFlags::CREATE,
			0o644,
		)
		.unwrap();
		io.write(b"content").unwrap();
		drop(io);
		// EXCL on an existing file fails
		assert!(vfs::open(
			&root,
			Path::new("/excl-file"),
			OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::EXCL,
			0o644,
		)
		.is_err());
		// TRUNC drops the content
		let io = vfs::open(
			&root,
			Path::new("/excl-file"),
			OpenFlags::READ | OpenFlags::WRITE | OpenFlags::TRUNC,
			0,
		)
		.unwrap();
		assert_eq!(io.stat().unwrap().size, 0);
		drop(io);
		vfs::unlink(&root, Path::new("/excl-file")).unwrap();
	}

	#[test]
	fn dir_listing_snapshot() {
		selftest::ensure_booted();
		let root = vfs::root_dentry();
		vfs::mkdir(&root, Path::new("/list-test"), 0o755).unwrap();
		for name in ["alpha", "beta", "gamma"] {
			let mut p = alloc::string::String::from("/list-test/");
			p.push_str(name);
			vfs::create(&root, Path::new(&p), FileType::Regular, 0o644).unwrap();
		}
		let io = vfs::open(
			&root,
			Path::new("/list-test"),
			OpenFlags::READ | OpenFlags::DIRECTORY,
			0,
		)
		.unwrap();
		let mut buf = vec![0u8; 4096];
		let n = io.list_dir(&mut buf).unwrap();
		assert!(n > 0);
		// Decode the packed records
		let mut names = vec![];
		let mut off = 0;
		while off < n {
			let reclen =
				u16::from_ne_bytes([buf[off + 8], buf[off + 9]]) as usize;
			let name =
				core::str::from_utf8(&buf[off + 11..off + reclen - 1]).unwrap();
			names.push(alloc::string::String::from(name));
			off += reclen;
		}
		assert_eq!(names, ["alpha", "beta", "gamma"]);
		// The snapshot is exhausted
		assert_eq!(io.list_dir(&mut buf).unwrap(), 0);
		drop(io);
		for name in ["alpha", "beta", "gamma"] {
			let mut p = alloc::string::String::from("/list-test/");
			p.push_str(name);
			vfs::unlink(&root, Path::new(&p)).unwrap();
		}
		vfs::rmdir(&root, Path::new("/list-test")).unwrap();
	}

	#[test]
	fn initrd_is_mounted() {
		selftest::ensure_booted();
		let root = vfs::root_dentry();
		// The hosted boot ships a known initrd
		let stat = vfs::stat(&root, Path::new("/initrd/etc/motd"), true).unwrap();
		assert_eq!(stat.typ, FileType::Regular);
		let io = vfs::open(&root, Path::new("/initrd/etc/motd"), OpenFlags::READ, 0).unwrap();
		let mut buf = [0u8; 64];
		let n = io.read(&mut buf).unwrap();
		assert_eq!(&buf[..n], b"welcome to mos\n");
		// The initrd is read-only
		assert!(vfs::create(&root, Path::new("/initrd/x"), FileType::Regular, 0o644).is_err());
	}
}

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

//! Anonymous page-cache-backed files.
//!
//! A memfd is a file with no name in any filesystem: its content lives
//! purely in its inode's page cache, so it can be written, read, sought and
//! mapped like any regular file, and shared by passing its descriptor.

use crate::{
	file::inode::{CacheOps, FileType, Inode, InodeOps, Stat},
	io::Io,
	memory::{phys, Pfn},
};
use alloc::{boxed::Box, sync::Arc, sync::Weak};
use core::sync::atomic::{AtomicU64, Ordering::Relaxed};
use utils::errno::EResult;

/// Inode numbers for anonymous files, outside any superblock.
static NEXT_INO: AtomicU64 = AtomicU64::new(1);

struct MemfdOps;

impl InodeOps for MemfdOps {
	fn truncate(&self, inode: &Inode, size: u64) -> EResult<()> {
		inode.stat.lock().size = size;
		Ok(())
	}
}

struct MemfdCache;

impl CacheOps for MemfdCache {
	fn fill_cache(&self, _inode: &Inode, _pgoff: usize) -> EResult<Pfn> {
		Ok(phys::alloc_frame_zeroed_mapped()?)
	}
}

/// Creates an anonymous file with the given display name.
pub fn create(name: &str) -> EResult<Arc<Io>> {
	let ino = NEXT_INO.fetch_add(1, Relaxed);
	let inode = Inode::new_cached(
		Stat::new(ino, FileType::Regular, 0o600),
		Weak::new(),
		Box::new(MemfdOps),
		Box::new(MemfdCache),
	);
	Ok(Io::new_memfd(inode, name))
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::{io::SeekWhence, selftest};

	#[test]
	fn memfd_io() {
		selftest::ensure_booted();
		let io = create("selftest-memfd").unwrap();
		assert_eq!(io.get_name(), "selftest-memfd");
		io.write(b"anonymous").unwrap();
		io.seek(0, SeekWhence::Set).unwrap();
		let mut buf = [0u8; 16];
		assert_eq!(io.read(&mut buf).unwrap(), 9);
		assert_eq!(&buf[..9], b"anonymous");
	}
}

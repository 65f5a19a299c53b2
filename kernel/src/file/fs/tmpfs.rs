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

//! tmpfs, the writable in-memory filesystem used as root.
//!
//! Directory content lives in the inode (a name → inode map); regular file
//! content lives entirely in the page cache, zero-filled on first touch.

use crate::{
	file::{
		fs::{Filesystem, SuperBlock},
		inode::{CacheOps, DirEntry, FileType, Inode, InodeOps, Stat},
	},
	memory::{phys, Pfn},
	sync::Mutex,
};
use alloc::{
	boxed::Box,
	collections::BTreeMap,
	string::{String, ToString},
	sync::Arc,
};
use utils::{errno, errno::EResult};

/// The tmpfs filesystem type.
pub struct TmpFs;

impl Filesystem for TmpFs {
	fn name(&self) -> &'static str {
		"tmpfs"
	}

	fn mount(&self, _device: Option<&str>) -> EResult<Arc<SuperBlock>> {
		let sb = SuperBlock::new(self.name());
		let root_inode = new_dir(&sb, 0o755);
		let root = crate::file::dentry::Dentry::new_root(Some(root_inode));
		*root.sb.lock() = Arc::downgrade(&sb);
		sb.root.init(root);
		Ok(sb)
	}
}

/// Creates a tmpfs directory inode.
fn new_dir(sb: &Arc<SuperBlock>, mode: u16) -> Arc<Inode> {
	let mut stat = Stat::new(sb.alloc_ino(), FileType::Directory, mode);
	stat.nlinks = 2;
	Inode::new(
		stat,
		Arc::downgrade(sb),
		Box::new(DirOps {
			children: Mutex::new(BTreeMap::new()),
		}),
	)
}

/// Creates a tmpfs regular file inode.
fn new_file(sb: &Arc<SuperBlock>, mode: u16) -> Arc<Inode> {
	Inode::new_cached(
		Stat::new(sb.alloc_ino(), FileType::Regular, mode),
		Arc::downgrade(sb),
		Box::new(RegOps),
		Box::new(FileCache),
	)
}

/// Creates a tmpfs symlink inode.
fn new_symlink(sb: &Arc<SuperBlock>, target: &str) -> Arc<Inode> {
	let mut stat = Stat::new(sb.alloc_ino(), FileType::Symlink, 0o777);
	stat.size = target.len() as u64;
	Inode::new(
		stat,
		Arc::downgrade(sb),
		Box::new(SymlinkOps {
			target: target.to_string(),
		}),
	)
}

/// Directory operations; the directory's entries live here.
struct DirOps {
	children: Mutex<BTreeMap<String, Arc<Inode>>>,
}

impl InodeOps for DirOps {
	fn lookup(&self, _dir: &Inode, name: &str) -> EResult<Option<Arc<Inode>>> {
		Ok(self.children.lock().get(name).cloned())
	}

	fn create(&self, dir: &Inode, name: &str, typ: FileType, mode: u16) -> EResult<Arc<Inode>> {
		let sb = dir.sb.upgrade().ok_or(errno!(ENODEV))?;
		let mut children = self.children.lock();
		if children.contains_key(name) {
			return Err(errno!(EEXIST));
		}
		let inode = match typ {
			FileType::Regular => new_file(&sb, mode),
			FileType::Directory => new_dir(&sb, mode),
			_ => return Err(errno!(ENOTSUP)),
		};
		children.insert(name.to_string(), inode.clone());
		Ok(inode)
	}

	fn unlink(&self, _dir: &Inode, name: &str) -> EResult<()> {
		let mut children = self.children.lock();
		let target = children.get(name).ok_or(errno!(ENOENT))?;
		if target.file_type() == FileType::Directory {
			let mut count = 0;
			target.ops.iterate_dir(target, &mut |_| count += 1)?;
			if count > 0 {
				return Err(errno!(ENOTEMPTY));
			}
		}
		let inode = children.remove(name).unwrap();
		inode.stat.lock().nlinks -= 1;
		Ok(())
	}

	fn symlink(&self, dir: &Inode, name: &str, target: &str) -> EResult<Arc<Inode>> {
		let sb = dir.sb.upgrade().ok_or(errno!(ENODEV))?;
		let mut children = self.children.lock();
		if children.contains_key(name) {
			return Err(errno!(EEXIST));
		}
		let inode = new_symlink(&sb, target);
		children.insert(name.to_string(), inode.clone());
		Ok(inode)
	}

	fn iterate_dir(&self, _inode: &Inode, f: &mut dyn FnMut(DirEntry)) -> EResult<()> {
		for (name, inode) in self.children.lock().iter() {
			f(DirEntry {
				ino: inode.ino(),
				typ: inode.file_type(),
				name: name.clone(),
			});
		}
		Ok(())
	}
}

/// Regular file operations.
struct RegOps;

impl InodeOps for RegOps {
	fn truncate(&self, inode: &Inode, size: u64) -> EResult<()> {
		inode.stat.lock().size = size;
		Ok(())
	}
}

/// Symlink operations.
struct SymlinkOps {
	target: String,
}

impl InodeOps for SymlinkOps {
	fn readlink(&self, _inode: &Inode) -> EResult<String> {
		Ok(self.target.clone())
	}
}

/// Zero-fill page cache: tmpfs file content IS the cache.
struct FileCache;

impl CacheOps for FileCache {
	fn fill_cache(&self, _inode: &Inode, _pgoff: usize) -> EResult<Pfn> {
		Ok(phys::alloc_frame_zeroed_mapped()?)
	}
}

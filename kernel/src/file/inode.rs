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

//! Inodes.
//!
//! An inode carries a file's stat data and three op tables: directory and
//! naming operations ([`InodeOps`]), the page-cache hooks ([`CacheOps`]) and,
//! for nodes that bypass the page cache entirely (sysfs attributes, device
//! nodes), direct IO ([`FileOps`]).

use super::page_cache::PageCache;
use crate::{memory::Pfn, sync::Mutex};
use alloc::{boxed::Box, string::String, sync::Arc, sync::Weak};
use utils::{errno, errno::EResult};

/// An inode number.
pub type Ino = u64;

/// The type of a file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileType {
	/// Regular file.
	Regular,
	/// Directory.
	Directory,
	/// Symbolic link.
	Symlink,
	/// Named pipe.
	Fifo,
	/// Character device.
	CharDevice,
}

/// Stat data of a file.
#[derive(Clone, Debug)]
pub struct Stat {
	/// Inode number.
	pub ino: Ino,
	/// File type.
	pub typ: FileType,
	/// Permission bits.
	pub mode: u16,
	/// Size in bytes.
	pub size: u64,
	/// Number of hard links.
	pub nlinks: u32,
}

impl Stat {
	/// Stat data for a fresh file of the given type.
	pub fn new(ino: Ino, typ: FileType, mode: u16) -> Self {
		Self {
			ino,
			typ,
			mode,
			size: 0,
			nlinks: 1,
		}
	}
}

/// One entry yielded when iterating a directory.
#[derive(Clone, Debug)]
pub struct DirEntry {
	/// The entry's inode number.
	pub ino: Ino,
	/// The entry's type.
	pub typ: FileType,
	/// The entry's name.
	pub name: String,
}

/// Directory and naming operations of an inode.
pub trait InodeOps: Send + Sync {
	/// Looks a name up in the directory, returning the child's inode if the
	/// filesystem knows it.
	///
	/// Returning `Ok(None)` makes the entry a negative one in the dentry
	/// cache.
	fn lookup(&self, _dir: &Inode, _name: &str) -> EResult<Option<Arc<Inode>>> {
		Err(errno!(ENOTDIR))
	}

	/// Creates a file in the directory.
	fn create(&self, _dir: &Inode, _name: &str, _typ: FileType, _mode: u16) -> EResult<Arc<Inode>> {
		Err(errno!(ENOTSUP))
	}

	/// Removes the named link from the directory.
	fn unlink(&self, _dir: &Inode, _name: &str) -> EResult<()> {
		Err(errno!(ENOTSUP))
	}

	/// Creates a symbolic link in the directory.
	fn symlink(&self, _dir: &Inode, _name: &str, _target: &str) -> EResult<Arc<Inode>> {
		Err(errno!(ENOTSUP))
	}

	/// Reads a symbolic link's target.
	fn readlink(&self, _inode: &Inode) -> EResult<String> {
		Err(errno!(EINVAL))
	}

	/// Calls `f` for every entry of the directory.
	fn iterate_dir(&self, _inode: &Inode, _f: &mut dyn FnMut(DirEntry)) -> EResult<()> {
		Err(errno!(ENOTDIR))
	}

	/// Resizes a regular file.
	fn truncate(&self, _inode: &Inode, _size: u64) -> EResult<()> {
		Err(errno!(ENOTSUP))
	}
}

/// Page-cache hooks of an inode.
pub trait CacheOps: Send + Sync {
	/// Produces the frame for the given page offset on a cache miss.
	///
	/// The returned frame carries the cache's own reference.
	fn fill_cache(&self, inode: &Inode, pgoff: usize) -> EResult<Pfn>;

	/// Called before a write through the cache lands in a page.
	fn page_write_begin(&self, inode: &Inode, pgoff: usize) -> EResult<Pfn> {
		self.fill_cache(inode, pgoff)
	}

	/// Called after a write through the cache, with the file's new size.
	fn page_write_end(&self, _inode: &Inode, _new_size: u64) {}
}

/// Direct IO operations, for nodes outside the page cache.
pub trait FileOps: Send + Sync {
	/// Reads from the node.
	fn read(&self, inode: &Inode, off: u64, buf: &mut [u8]) -> EResult<usize>;

	/// Writes to the node.
	fn write(&self, _inode: &Inode, _off: u64, _buf: &[u8]) -> EResult<usize> {
		Err(errno!(ENOTSUP))
	}
}

/// An inode.
pub struct Inode {
	/// Stat data, under its own lock.
	pub stat: Mutex<Stat>,
	/// The owning superblock.
	pub sb: Weak<super::fs::SuperBlock>,
	/// Directory and naming operations.
	pub ops: Box<dyn InodeOps>,
	/// Page-cache hooks, for inodes whose content lives in the cache.
	pub cache_ops: Option<Box<dyn CacheOps>>,
	/// Direct IO, bypassing the cache.
	pub file_ops: Option<Box<dyn FileOps>>,
	/// The page cache: a map from page offset to frame.
	pub cache: PageCache,
}

impl Inode {
	/// Creates an inode.
	pub fn new(
		stat: Stat,
		sb: Weak<super::fs::SuperBlock>,
		ops: Box<dyn InodeOps>,
	) -> Arc<Self> {
		Arc::new(Self {
			stat: Mutex::new(stat),
			sb,
			ops,
			cache_ops: None,
			file_ops: None,
			cache: PageCache::new(),
		})
	}

	/// Creates an inode whose content lives in the page cache.
	pub fn new_cached(
		stat: Stat,
		sb: Weak<super::fs::SuperBlock>,
		ops: Box<dyn InodeOps>,
		cache_ops: Box<dyn CacheOps>,
	) -> Arc<Self> {
		Arc::new(Self {
			stat: Mutex::new(stat),
			sb,
			ops,
			cache_ops: Some(cache_ops),
			file_ops: None,
			cache: PageCache::new(),
		})
	}

	/// Creates an inode with direct IO.
	pub fn new_direct(
		stat: Stat,
		sb: Weak<super::fs::SuperBlock>,
		ops: Box<dyn InodeOps>,
		file_ops: Box<dyn FileOps>,
	) -> Arc<Self> {
		Arc::new(Self {
			stat: Mutex::new(stat),
			sb,
			ops,
			cache_ops: None,
			file_ops: Some(file_ops),
			cache: PageCache::new(),
		})
	}

	/// The inode's number.
	pub fn ino(&self) -> Ino {
		self.stat.lock().ino
	}

	/// The inode's type.
	pub fn file_type(&self) -> FileType {
		self.stat.lock().typ
	}

	/// The file's size in bytes.
	pub fn size(&self) -> u64 {
		self.stat.lock().size
	}
}

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

//! cpiofs, the read-only filesystem serving the initrd.
//!
//! The archive is parsed once at mount into an inode tree; file content
//! stays in the initrd blob and is copied into page-cache frames on demand.

use crate::{
	boot,
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
use utils::{cpio::CPIOParser, errno, errno::EResult, limits::PAGE_SIZE};

/// The cpiofs filesystem type.
pub struct CpioFs;

impl Filesystem for CpioFs {
	fn name(&self) -> &'static str {
		"cpiofs"
	}

	fn mount(&self, _device: Option<&str>) -> EResult<Arc<SuperBlock>> {
		let blob = boot::INITRD.get().ok_or(errno!(ENODEV))?;
		let sb = SuperBlock::new(self.name());
		// Parse the archive into an intermediate tree first
		let mut root = Node::new_dir();
		for entry in CPIOParser::new(blob) {
			let is_dir = entry.mode & 0o170000 == 0o040000;
			let mut cur = &mut root;
			let mut components = entry.name.split('/').filter(|c| !c.is_empty()).peekable();
			while let Some(comp) = components.next() {
				let last = components.peek().is_none();
				let node = cur
					.children
					.entry(comp.to_string())
					.or_insert_with(|| {
						if last && !is_dir {
							Node::new_file(entry.data)
						} else {
							Node::new_dir()
						}
					});
				cur = node;
			}
		}
		let root_inode = build(&sb, &root);
		let root = crate::file::dentry::Dentry::new_root(Some(root_inode));
		*root.sb.lock() = Arc::downgrade(&sb);
		sb.root.init(root);
		pr_info!("cpiofs: mounted initrd ({} bytes)", blob.len());
		Ok(sb)
	}
}

/// Intermediate node while parsing the archive.
struct Node {
	dir: bool,
	data: &'static [u8],
	children: BTreeMap<String, Node>,
}

impl Node {
	fn new_dir() -> Self {
		Self {
			dir: true,
			data: &[],
			children: BTreeMap::new(),
		}
	}

	fn new_file(data: &'static [u8]) -> Self {
		Self {
			dir: false,
			data,
			children: BTreeMap::new(),
		}
	}
}

/// Converts an intermediate node into an inode, bottom-up.
fn build(sb: &Arc<SuperBlock>, node: &Node) -> Arc<Inode> {
	if !node.dir {
		return new_file(sb, node.data);
	}
	let mut children = BTreeMap::new();
	for (name, child) in &node.children {
		children.insert(name.clone(), build(sb, child));
	}
	let mut stat = Stat::new(sb.alloc_ino(), FileType::Directory, 0o555);
	stat.nlinks = 2;
	Inode::new(
		stat,
		Arc::downgrade(sb),
		Box::new(DirOps {
			children: Mutex::new(children),
		}),
	)
}

fn new_file(sb: &Arc<SuperBlock>, data: &'static [u8]) -> Arc<Inode> {
	let mut stat = Stat::new(sb.alloc_ino(), FileType::Regular, 0o444);
	stat.size = data.len() as u64;
	Inode::new_cached(
		stat,
		Arc::downgrade(sb),
		Box::new(RegOps),
		Box::new(BlobCache {
			data,
		}),
	)
}

/// Directory operations over the parsed tree.
struct DirOps {
	children: Mutex<BTreeMap<String, Arc<Inode>>>,
}

impl InodeOps for DirOps {
	fn lookup(&self, _dir: &Inode, name: &str) -> EResult<Option<Arc<Inode>>> {
		Ok(self.children.lock().get(name).cloned())
	}

	fn create(&self, _dir: &Inode, _name: &str, _typ: FileType, _mode: u16) -> EResult<Arc<Inode>> {
		Err(errno!(EROFS))
	}

	fn unlink(&self, _dir: &Inode, _name: &str) -> EResult<()> {
		Err(errno!(EROFS))
	}

	fn symlink(&self, _dir: &Inode, _name: &str, _target: &str) -> EResult<Arc<Inode>> {
		Err(errno!(EROFS))
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

/// Regular file operations: everything interesting is in the cache.
struct RegOps;

impl InodeOps for RegOps {}

/// Page cache fills copy out of the initrd blob.
struct BlobCache {
	data: &'static [u8],
}

impl CacheOps for BlobCache {
	fn fill_cache(&self, _inode: &Inode, pgoff: usize) -> EResult<Pfn> {
		let pfn = phys::alloc_frame_zeroed_mapped()?;
		let start = pgoff * PAGE_SIZE;
		if start < self.data.len() {
			let chunk = (self.data.len() - start).min(PAGE_SIZE);
			let page = unsafe { pfn.page_mut() };
			page[..chunk].copy_from_slice(&self.data[start..start + chunk]);
		}
		Ok(pfn)
	}

	fn page_write_begin(&self, _inode: &Inode, _pgoff: usize) -> EResult<Pfn> {
		Err(errno!(EROFS))
	}
}

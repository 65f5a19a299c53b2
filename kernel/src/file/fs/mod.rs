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

//! Filesystem types and registry.

pub mod cpiofs;
pub mod sysfs;
pub mod tmpfs;

use super::dentry::Dentry;
use crate::sync::{Mutex, OnceInit};
use alloc::{string::String, sync::Arc, vec::Vec};
use utils::{errno, errno::EResult};

/// A filesystem instance: owns a root dentry.
pub struct SuperBlock {
	/// The filesystem type's name.
	pub fs_name: &'static str,
	/// The instance's root dentry (empty name).
	pub root: OnceInit<Arc<Dentry>>,
	/// Inode number allocator for in-memory filesystems.
	pub next_ino: Mutex<u64>,
}

impl SuperBlock {
	/// Creates a superblock for the given filesystem type.
	pub fn new(fs_name: &'static str) -> Arc<Self> {
		Arc::new(Self {
			fs_name,
			root: OnceInit::new(),
			next_ino: Mutex::new(1),
		})
	}

	/// Allocates an inode number.
	pub fn alloc_ino(&self) -> u64 {
		let mut next = self.next_ino.lock();
		let ino = *next;
		*next += 1;
		ino
	}

	/// The instance's root dentry.
	pub fn root_dentry(&self) -> Arc<Dentry> {
		self.root.get().clone()
	}
}

/// A filesystem type.
pub trait Filesystem: Send + Sync {
	/// The type's name, as used by `vfs_mount`.
	fn name(&self) -> &'static str;

	/// Creates an instance over the given device.
	fn mount(&self, device: Option<&str>) -> EResult<Arc<SuperBlock>>;
}

/// Registered filesystem types.
static FILESYSTEMS: Mutex<Vec<Arc<dyn Filesystem>>> = Mutex::new(Vec::new());

/// Registers a filesystem type.
pub fn register(fs: Arc<dyn Filesystem>) {
	pr_info!("vfs: registered filesystem '{}'", fs.name());
	FILESYSTEMS.lock().push(fs);
}

/// Returns the filesystem type with the given name.
pub fn get(name: &str) -> EResult<Arc<dyn Filesystem>> {
	FILESYSTEMS
		.lock()
		.iter()
		.find(|fs| fs.name() == name)
		.cloned()
		.ok_or(errno!(ENODEV))
}

/// The names of every registered filesystem, for `/sys/vfs/filesystems`.
pub fn names() -> Vec<String> {
	use alloc::string::ToString;
	FILESYSTEMS
		.lock()
		.iter()
		.map(|fs| fs.name().to_string())
		.collect()
}

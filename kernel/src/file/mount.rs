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

//! The mount table.
//!
//! A mount binds a filesystem instance's root onto an anchor dentry. Path
//! resolution crosses the boundary in both directions: downward from the
//! anchor to the mounted root, upward from the root back to the anchor.

use super::{
	dentry::{self, Dentry},
	fs::SuperBlock,
};
use crate::sync::Mutex;
use alloc::{string::String, sync::Arc, vec::Vec};
use utils::{errno, errno::EResult};

/// One mounted filesystem.
#[derive(Clone)]
pub struct Mount {
	/// The dentry the filesystem is mounted on.
	pub anchor: Arc<Dentry>,
	/// The mounted root.
	pub root: Arc<Dentry>,
	/// The instance.
	pub sb: Arc<SuperBlock>,
	/// The path the mount was created at, for diagnostics.
	pub path: String,
}

/// The mount table.
static MOUNTS: Mutex<Vec<Mount>> = Mutex::new(Vec::new());

/// Binds `sb`'s root onto `anchor`.
pub fn add(anchor: Arc<Dentry>, sb: Arc<SuperBlock>, path: String) -> EResult<()> {
	if anchor.is_mountpoint() {
		return Err(errno!(EBUSY));
	}
	let root = sb.root_dentry();
	anchor.set_mountpoint(true);
	// The mounted root is pinned in lockstep with its anchor
	dentry::dentry_ref(&root);
	MOUNTS.lock().push(Mount {
		anchor,
		root,
		sb,
		path,
	});
	Ok(())
}

/// The root mounted on `anchor`, if any.
pub fn root_of(anchor: &Arc<Dentry>) -> Option<Arc<Dentry>> {
	MOUNTS
		.lock()
		.iter()
		.find(|m| Arc::ptr_eq(&m.anchor, anchor))
		.map(|m| m.root.clone())
}

/// The anchor a mounted root hides, if any.
pub fn anchor_of(root: &Arc<Dentry>) -> Option<Arc<Dentry>> {
	MOUNTS
		.lock()
		.iter()
		.find(|m| Arc::ptr_eq(&m.root, root))
		.map(|m| m.anchor.clone())
}

/// Unbinds the filesystem mounted on `anchor`.
pub fn remove(anchor: &Arc<Dentry>) -> EResult<()> {
	let mut mounts = MOUNTS.lock();
	let i = mounts
		.iter()
		.position(|m| Arc::ptr_eq(&m.anchor, anchor))
		.ok_or(errno!(EINVAL))?;
	let m = mounts.remove(i);
	drop(mounts);
	m.anchor.set_mountpoint(false);
	dentry::dentry_unref(&m.root);
	Ok(())
}

/// A snapshot of the mount table, for `/sys/vfs/mount`.
pub fn list() -> Vec<(String, &'static str)> {
	MOUNTS
		.lock()
		.iter()
		.map(|m| (m.path.clone(), m.sb.fs_name))
		.collect()
}

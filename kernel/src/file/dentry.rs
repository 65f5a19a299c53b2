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

//! The dentry cache.
//!
//! A dentry is a node of the name tree. It may carry no inode, in which case
//! it caches a negative lookup. The tree owns children; the parent pointer
//! is a non-owning back edge. Reclamation is refcount-driven: when a
//! dentry's refcount reaches zero, it has no inode and no children, it is
//! unlinked from its parent and destroyed, and the unref recurses upward.
//!
//! A mountpoint dentry keeps its name; the root it hides has an empty name
//! and is reached through the mount table.

use super::inode::Inode;
use crate::sync::Mutex;
use alloc::{
	collections::BTreeMap,
	string::{String, ToString},
	sync::{Arc, Weak},
};
use core::sync::atomic::{
	AtomicBool, AtomicUsize,
	Ordering::{Relaxed, SeqCst},
};

/// Dentry cache counters, shown in `/sys/vfs/dentry_stats`.
#[derive(Debug, Default)]
pub struct DentryStats {
	/// Number of live dentries.
	pub alive: AtomicUsize,
	/// Number of live negative dentries.
	pub negative: AtomicUsize,
	/// Number of dentries reclaimed since boot.
	pub reclaimed: AtomicUsize,
}

/// The global dentry statistics.
pub static STATS: DentryStats = DentryStats {
	alive: AtomicUsize::new(0),
	negative: AtomicUsize::new(0),
	reclaimed: AtomicUsize::new(0),
};

/// A node of the name tree.
pub struct Dentry {
	/// The component name. Empty for a filesystem root.
	name: String,
	/// Non-owning pointer to the parent.
	parent: Mutex<Weak<Dentry>>,
	/// The children, owned by this node.
	children: Mutex<BTreeMap<String, Arc<Dentry>>>,
	/// The attached inode; `None` caches a negative lookup.
	inode: Mutex<Option<Arc<Inode>>>,
	/// The owning superblock.
	pub sb: Mutex<Weak<super::fs::SuperBlock>>,
	/// Number of user-visible handles pinning this dentry.
	refcount: AtomicUsize,
	/// Tells whether a filesystem is mounted on this dentry.
	is_mountpoint: AtomicBool,
}

impl Dentry {
	/// Creates a detached root dentry (empty name, no parent).
	pub fn new_root(inode: Option<Arc<Inode>>) -> Arc<Self> {
		STATS.alive.fetch_add(1, Relaxed);
		Arc::new(Self {
			name: String::new(),
			parent: Mutex::new(Weak::new()),
			children: Mutex::new(BTreeMap::new()),
			inode: Mutex::new(inode),
			sb: Mutex::new(Weak::new()),
			refcount: AtomicUsize::new(1),
			is_mountpoint: AtomicBool::new(false),
		})
	}

	/// Creates a child of `parent` with the given name, attaching it to the
	/// tree.
	pub fn new_child(parent: &Arc<Dentry>, name: &str, inode: Option<Arc<Inode>>) -> Arc<Self> {
		STATS.alive.fetch_add(1, Relaxed);
		if inode.is_none() {
			STATS.negative.fetch_add(1, Relaxed);
		}
		let child = Arc::new(Self {
			name: name.to_string(),
			parent: Mutex::new(Arc::downgrade(parent)),
			children: Mutex::new(BTreeMap::new()),
			inode: Mutex::new(inode),
			sb: Mutex::new(parent.sb.lock().clone()),
			refcount: AtomicUsize::new(0),
			is_mountpoint: AtomicBool::new(false),
		});
		parent
			.children
			.lock()
			.insert(name.to_string(), child.clone());
		child
	}

	/// The component name. Empty for a filesystem root.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Tells whether this dentry is a filesystem root.
	pub fn is_fs_root(&self) -> bool {
		self.name.is_empty()
	}

	/// The parent dentry, within the same filesystem.
	pub fn parent(&self) -> Option<Arc<Dentry>> {
		self.parent.lock().upgrade()
	}

	/// The attached inode, if any.
	pub fn inode(&self) -> Option<Arc<Inode>> {
		self.inode.lock().clone()
	}

	/// Attaches an inode, turning a negative entry positive.
	pub fn attach(&self, inode: Arc<Inode>) {
		let mut slot = self.inode.lock();
		if slot.is_none() {
			STATS.negative.fetch_sub(1, Relaxed);
		}
		*slot = Some(inode);
	}

	/// Detaches the inode, making the entry negative.
	pub fn detach(&self) {
		let mut slot = self.inode.lock();
		if slot.take().is_some() {
			STATS.negative.fetch_add(1, Relaxed);
		}
	}

	/// Looks up a child in the cache.
	pub fn cached_child(&self, name: &str) -> Option<Arc<Dentry>> {
		self.children.lock().get(name).cloned()
	}

	/// The number of cached children.
	pub fn children_count(&self) -> usize {
		self.children.lock().len()
	}

	/// Calls `f` on each cached child.
	pub fn for_each_child(&self, f: &mut dyn FnMut(&Arc<Dentry>)) {
		for child in self.children.lock().values() {
			f(child);
		}
	}

	/// Current refcount, for diagnostics.
	pub fn refcount(&self) -> usize {
		self.refcount.load(SeqCst)
	}

	/// Tells whether a filesystem is mounted here.
	pub fn is_mountpoint(&self) -> bool {
		self.is_mountpoint.load(SeqCst)
	}

	/// Flags the dentry as a mountpoint.
	pub fn set_mountpoint(&self, val: bool) {
		self.is_mountpoint.store(val, SeqCst);
	}
}

impl core::fmt::Debug for Dentry {
	fn fmt(&self, fmt: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		write!(
			fmt,
			"Dentry('{}', refs={}, neg={})",
			self.name,
			self.refcount(),
			self.inode.lock().is_none()
		)
	}
}

impl Drop for Dentry {
	fn drop(&mut self) {
		STATS.alive.fetch_sub(1, Relaxed);
		if self.inode.lock().is_none() {
			STATS.negative.fetch_sub(1, Relaxed);
		}
	}
}

/// Takes a reference on the dentry.
pub fn dentry_ref(d: &Arc<Dentry>) {
	d.refcount.fetch_add(1, SeqCst);
}

/// Drops a reference on the dentry.
///
/// When the count reaches zero on a negative, childless entry, the entry is
/// unlinked from its parent and destroyed, and the parent loses the
/// reference the child's existence held — recursively.
pub fn dentry_unref(d: &Arc<Dentry>) {
	let prev = d.refcount.fetch_sub(1, SeqCst);
	assert!(prev > 0, "dentry refcount underflow");
	if prev != 1 {
		return;
	}
	try_reclaim(d);
}

/// Destroys the dentry if nothing justifies keeping it cached anymore.
///
/// Used after `unlink` detaches the inode.
pub fn reclaim_if_unused(d: &Arc<Dentry>) {
	try_reclaim(d);
}

/// Destroys the dentry if nothing justifies keeping it cached.
fn try_reclaim(d: &Arc<Dentry>) {
	if d.refcount() > 0 || d.inode().is_some() || d.children_count() > 0 {
		return;
	}
	let Some(parent) = d.parent() else {
		return;
	};
	let removed = parent.children.lock().remove(&d.name).is_some();
	if removed {
		STATS.reclaimed.fetch_add(1, Relaxed);
		// The parent may have become reclaimable in turn
		try_reclaim(&parent);
	}
}

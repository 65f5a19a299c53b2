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

//! Path resolution and the VFS operations built on it.
//!
//! Resolution walks the dentry cache, calling into the filesystem's `lookup`
//! on misses, crossing mount boundaries in both directions and following
//! symbolic links within a bounded budget. Durable handles (open files,
//! working directories, mounts) pin their dentry chain with explicit
//! references; a walk in flight is kept alive by its transient `Arc`s.

use super::{dentry, fs, mount};
pub use super::dentry::Dentry;
use crate::sync::OnceInit;
use alloc::{
	string::{String, ToString},
	sync::Arc,
	vec::Vec,
};
use bitflags::bitflags;
use utils::{
	collections::path::{Path, PathBuf},
	errno,
	errno::EResult,
	limits::SYMLOOP_MAX,
};

pub use super::inode::{FileType, Inode, Stat};

bitflags! {
	/// Flags controlling one path resolution.
	#[derive(Clone, Copy, Debug, Eq, PartialEq)]
	pub struct ResolveFlags: u32 {
		/// Follow the final component if it is a symbolic link.
		const FOLLOW = 1 << 0;
		/// The final component must be a directory.
		const EXPECT_DIR = 1 << 1;
		/// The final component must not be a directory.
		const EXPECT_FILE = 1 << 2;
		/// A negative final component is acceptable (creation pending).
		const CREATE = 1 << 3;
		/// The final component must not exist.
		const MUST_NOT_EXIST = 1 << 4;
	}
}

/// The dentry configured as the filesystem root.
static ROOT: OnceInit<Arc<Dentry>> = OnceInit::new();

/// Installs the root filesystem's root dentry. Called once during the VFS
/// init phase.
pub fn init_root(root: Arc<Dentry>) {
	ROOT.init(root);
}

/// The filesystem root.
pub fn root_dentry() -> Arc<Dentry> {
	ROOT.get().clone()
}

/// Follows mounts downward: a mountpoint resolves to the root mounted on
/// it.
fn down_mount(mut d: Arc<Dentry>) -> Arc<Dentry> {
	while d.is_mountpoint() {
		match mount::root_of(&d) {
			Some(root) => d = root,
			None => break,
		}
	}
	d
}

/// One step up the tree, crossing a mount boundary upward when leaving a
/// mounted root.
fn chain_step(d: &Arc<Dentry>) -> Option<Arc<Dentry>> {
	if d.is_fs_root() {
		mount::anchor_of(d)
	} else {
		d.parent()
	}
}

/// The parent used for `..`, stopping at the resolution root.
fn parent_of(d: &Arc<Dentry>, root: &Arc<Dentry>) -> Arc<Dentry> {
	if Arc::ptr_eq(d, root) {
		return d.clone();
	}
	// Leaving a mounted root lands on its anchor's parent
	let base = if d.is_fs_root() {
		match mount::anchor_of(d) {
			Some(anchor) => anchor,
			None => return d.clone(),
		}
	} else {
		d.clone()
	};
	base.parent().unwrap_or(base)
}

/// Pins the chain from `d` up to (but not through) `root`.
pub fn dentry_ref_up_to(d: &Arc<Dentry>, root: &Arc<Dentry>) {
	let mut cur = d.clone();
	loop {
		if Arc::ptr_eq(&cur, root) {
			break;
		}
		dentry::dentry_ref(&cur);
		match chain_step(&cur) {
			Some(next) => cur = next,
			None => break,
		}
	}
}

/// Releases the chain pinned by [`dentry_ref_up_to`].
pub fn dentry_unref_up_to(d: &Arc<Dentry>, root: &Arc<Dentry>) {
	let mut cur = d.clone();
	loop {
		if Arc::ptr_eq(&cur, root) {
			break;
		}
		let next = chain_step(&cur);
		dentry::dentry_unref(&cur);
		match next {
			Some(next) => cur = next,
			None => break,
		}
	}
}

/// Resolves `path` from `base`.
pub fn resolve(base: &Arc<Dentry>, path: &Path, flags: ResolveFlags) -> EResult<Arc<Dentry>> {
	resolve_at(base, path, flags, 0)
}

fn resolve_at(
	base: &Arc<Dentry>,
	path: &Path,
	flags: ResolveFlags,
	depth: usize,
) -> EResult<Arc<Dentry>> {
	if depth > SYMLOOP_MAX {
		return Err(errno!(ELOOP));
	}
	let root = root_dentry();
	let mut cur = if path.is_absolute() {
		down_mount(root.clone())
	} else {
		base.clone()
	};
	let comps: Vec<&str> = path.components().collect();
	for (i, comp) in comps.iter().enumerate() {
		let last = i == comps.len() - 1;
		let dir_inode = cur.inode().ok_or(errno!(ENOENT))?;
		if dir_inode.file_type() != FileType::Directory {
			return Err(errno!(ENOTDIR));
		}
		if *comp == ".." {
			cur = down_mount(parent_of(&cur, &root));
			continue;
		}
		// Dentry cache first, then the filesystem
		let child = match cur.cached_child(comp) {
			Some(c) => c,
			None => {
				let inode = dir_inode.ops.lookup(&dir_inode, comp)?;
				Dentry::new_child(&cur, comp, inode)
			}
		};
		let Some(child_inode) = child.inode() else {
			// Negative entry
			if last && flags.contains(ResolveFlags::CREATE) {
				return Ok(child);
			}
			return Err(errno!(ENOENT));
		};
		let child = down_mount(child);
		// Symbolic links resolve against the child's parent
		if child_inode.file_type() == FileType::Symlink
			&& (!last || flags.contains(ResolveFlags::FOLLOW))
		{
			let target = child_inode.ops.readlink(&child_inode)?;
			cur = resolve_at(&cur, Path::new(&target), ResolveFlags::FOLLOW, depth + 1)?;
			continue;
		}
		cur = child;
	}
	// Final-component expectations
	if flags.contains(ResolveFlags::MUST_NOT_EXIST) {
		return Err(errno!(EEXIST));
	}
	if let Some(inode) = cur.inode() {
		let typ = inode.file_type();
		if flags.contains(ResolveFlags::EXPECT_DIR) && typ != FileType::Directory {
			return Err(errno!(ENOTDIR));
		}
		if flags.contains(ResolveFlags::EXPECT_FILE) && typ == FileType::Directory {
			return Err(errno!(EISDIR));
		}
	}
	Ok(cur)
}

/// Opens the file at `path`, returning an IO object holding the dentry
/// chain pinned.
pub fn open(
	base: &Arc<Dentry>,
	path: &Path,
	flags: crate::io::OpenFlags,
	mode: u16,
) -> EResult<Arc<crate::io::Io>> {
	use crate::io::OpenFlags;
	let mut rflags = ResolveFlags::empty();
	if !flags.contains(OpenFlags::NOFOLLOW) {
		rflags |= ResolveFlags::FOLLOW;
	}
	if flags.contains(OpenFlags::DIRECTORY) {
		rflags |= ResolveFlags::EXPECT_DIR;
	}
	if flags.contains(OpenFlags::CREATE) {
		rflags |= ResolveFlags::CREATE;
	}
	let d = resolve(base, path, rflags)?;
	if d.inode().is_none() {
		// Negative entry: CREATE was requested
		let parent = d.parent().ok_or(errno!(ENOENT))?;
		let dir_inode = parent.inode().ok_or(errno!(ENOENT))?;
		let inode = dir_inode.ops.create(&dir_inode, d.name(), FileType::Regular, mode)?;
		d.attach(inode);
	} else if flags.contains(OpenFlags::CREATE | OpenFlags::EXCL) {
		return Err(errno!(EEXIST));
	}
	let inode = d.inode().unwrap();
	if flags.contains(OpenFlags::TRUNC)
		&& flags.contains(OpenFlags::WRITE)
		&& inode.file_type() == FileType::Regular
	{
		inode.ops.truncate(&inode, 0)?;
		inode.cache.clear();
	}
	dentry_ref_up_to(&d, &root_dentry());
	Ok(crate::io::Io::new_file(d, inode, flags))
}

/// Resolves the parent directory of `path`, returning it with the final
/// component's name.
pub fn resolve_parent(base: &Arc<Dentry>, path: &Path) -> EResult<(Arc<Dentry>, String)> {
	let name = path.file_name().ok_or(errno!(EINVAL))?;
	if name == ".." {
		return Err(errno!(EINVAL));
	}
	let parent = resolve(
		base,
		path.parent(),
		ResolveFlags::FOLLOW | ResolveFlags::EXPECT_DIR,
	)?;
	Ok((parent, name.to_string()))
}

/// Creates a regular file or directory at `path`.
pub fn create(
	base: &Arc<Dentry>,
	path: &Path,
	typ: FileType,
	mode: u16,
) -> EResult<Arc<Dentry>> {
	let (parent, name) = resolve_parent(base, path)?;
	let dir_inode = parent.inode().ok_or(errno!(ENOENT))?;
	let inode = dir_inode.ops.create(&dir_inode, &name, typ, mode)?;
	// Attach to the cache, reusing a negative entry if one is there
	let dentry = match parent.cached_child(&name) {
		Some(d) => {
			d.attach(inode);
			d
		}
		None => Dentry::new_child(&parent, &name, Some(inode)),
	};
	Ok(dentry)
}

/// Creates a directory.
pub fn mkdir(base: &Arc<Dentry>, path: &Path, mode: u16) -> EResult<Arc<Dentry>> {
	create(base, path, FileType::Directory, mode)
}

/// Removes a non-directory link.
pub fn unlink(base: &Arc<Dentry>, path: &Path) -> EResult<()> {
	let d = resolve(base, path, ResolveFlags::empty())?;
	let inode = d.inode().ok_or(errno!(ENOENT))?;
	if inode.file_type() == FileType::Directory {
		return Err(errno!(EISDIR));
	}
	unlink_common(&d)
}

/// Removes an empty directory.
pub fn rmdir(base: &Arc<Dentry>, path: &Path) -> EResult<()> {
	let d = resolve(base, path, ResolveFlags::EXPECT_DIR)?;
	if d.is_mountpoint() || d.is_fs_root() {
		return Err(errno!(EBUSY));
	}
	unlink_common(&d)
}

fn unlink_common(d: &Arc<Dentry>) -> EResult<()> {
	// Open handles keep their inode reference; only the name goes away now
	let parent = d.parent().ok_or(errno!(EBUSY))?;
	let dir_inode = parent.inode().ok_or(errno!(ENOENT))?;
	dir_inode.ops.unlink(&dir_inode, d.name())?;
	d.detach();
	dentry::reclaim_if_unused(d);
	Ok(())
}

/// Creates a symbolic link at `linkpath` pointing to `target`.
pub fn symlink(base: &Arc<Dentry>, target: &str, linkpath: &Path) -> EResult<()> {
	let (parent, name) = resolve_parent(base, linkpath)?;
	let dir_inode = parent.inode().ok_or(errno!(ENOENT))?;
	let inode = dir_inode.ops.symlink(&dir_inode, &name, target)?;
	match parent.cached_child(&name) {
		Some(d) => d.attach(inode),
		None => {
			Dentry::new_child(&parent, &name, Some(inode));
		}
	}
	Ok(())
}

/// Reads a symbolic link's target.
pub fn readlink(base: &Arc<Dentry>, path: &Path) -> EResult<String> {
	let d = resolve(base, path, ResolveFlags::empty())?;
	let inode = d.inode().ok_or(errno!(ENOENT))?;
	if inode.file_type() != FileType::Symlink {
		return Err(errno!(EINVAL));
	}
	inode.ops.readlink(&inode)
}

/// Returns the stat data of the file at `path`.
pub fn stat(base: &Arc<Dentry>, path: &Path, follow: bool) -> EResult<Stat> {
	let flags = if follow {
		ResolveFlags::FOLLOW
	} else {
		ResolveFlags::empty()
	};
	let d = resolve(base, path, flags)?;
	let inode = d.inode().ok_or(errno!(ENOENT))?;
	let stat = inode.stat.lock().clone();
	Ok(stat)
}

/// Mounts a filesystem of type `fstype` at `target`.
pub fn mount(
	base: &Arc<Dentry>,
	device: Option<&str>,
	target: &Path,
	fstype: &str,
) -> EResult<()> {
	let fs = fs::get(fstype)?;
	let anchor = resolve(
		base,
		target,
		ResolveFlags::FOLLOW | ResolveFlags::EXPECT_DIR,
	)?;
	let sb = fs.mount(device)?;
	mount::add(anchor, sb, target.as_str().to_string())
}

/// Unmounts the filesystem mounted at `target`.
pub fn unmount(base: &Arc<Dentry>, target: &Path) -> EResult<()> {
	let resolved = resolve(base, target, ResolveFlags::FOLLOW)?;
	// The path resolves to the mounted root; find its anchor
	let anchor = mount::anchor_of(&resolved).ok_or(errno!(EINVAL))?;
	mount::remove(&anchor)
}

/// Builds the absolute path of the given dentry.
pub fn path_of(d: &Arc<Dentry>) -> PathBuf {
	let mut names = Vec::new();
	let mut cur = d.clone();
	loop {
		if !cur.name().is_empty() {
			names.push(cur.name().to_string());
		}
		match chain_step(&cur) {
			Some(next) => cur = next,
			None => break,
		}
	}
	let mut path = PathBuf::root();
	for name in names.iter().rev() {
		path.push(name);
	}
	path
}

/// The `VFS` init phase: registers the built-in filesystems, mounts the
/// tmpfs root and the initrd.
pub fn init() -> EResult<()> {
	fs::register(Arc::new(fs::tmpfs::TmpFs));
	fs::register(Arc::new(fs::cpiofs::CpioFs));
	// The root filesystem
	let tmpfs = fs::get("tmpfs")?;
	let root_sb = tmpfs.mount(None)?;
	init_root(root_sb.root_dentry());
	let root = root_dentry();
	// The initrd, when the bootloader provided one
	if crate::boot::INITRD.get().is_some() {
		mkdir(&root, Path::new("/initrd"), 0o755)?;
		mount(&root, None, Path::new("/initrd"), "cpiofs")?;
	}
	Ok(())
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::selftest;
	use utils::errno;

	#[test]
	fn create_resolve_unlink() {
		selftest::ensure_booted();
		let root = root_dentry();
		mkdir(&root, Path::new("/vfs-test"), 0o755).unwrap();
		let f = create(&root, Path::new("/vfs-test/a"), FileType::Regular, 0o644).unwrap();
		assert_eq!(f.name(), "a");
		let resolved = resolve(&root, Path::new("/vfs-test/a"), ResolveFlags::FOLLOW).unwrap();
		assert!(Arc::ptr_eq(&f, &resolved));
		// Relative resolution with dot-dot
		let dir = resolve(&root, Path::new("/vfs-test"), ResolveFlags::EXPECT_DIR).unwrap();
		let back = resolve(&dir, Path::new("../vfs-test/a"), ResolveFlags::empty()).unwrap();
		assert!(Arc::ptr_eq(&f, &back));
		unlink(&root, Path::new("/vfs-test/a")).unwrap();
		assert!(resolve(&root, Path::new("/vfs-test/a"), ResolveFlags::empty()).is_err());
		rmdir(&root, Path::new("/vfs-test")).unwrap();
	}

	#[test]
	fn symlink_follow_and_nofollow() {
		selftest::ensure_booted();
		let root = root_dentry();
		mkdir(&root, Path::new("/ln-test"), 0o755).unwrap();
		create(&root, Path::new("/ln-test/file"), FileType::Regular, 0o644).unwrap();
		symlink(&root, "/ln-test/file", Path::new("/ln-test/link")).unwrap();
		// Following lands on the file
		let d = resolve(&root, Path::new("/ln-test/link"), ResolveFlags::FOLLOW).unwrap();
		assert_eq!(d.name(), "file");
		// Not following keeps the link itself
		let l = resolve(&root, Path::new("/ln-test/link"), ResolveFlags::empty()).unwrap();
		assert_eq!(l.inode().unwrap().file_type(), FileType::Symlink);
		assert_eq!(readlink(&root, Path::new("/ln-test/link")).unwrap(), "/ln-test/file");
		// A link loop hits the budget
		symlink(&root, "/ln-test/loop", Path::new("/ln-test/loop")).unwrap();
		let err = resolve(&root, Path::new("/ln-test/loop"), ResolveFlags::FOLLOW)
			.unwrap_err();
		assert_eq!(err, errno!(ELOOP));
	}

	#[test]
	fn negative_dentries_reclaim() {
		selftest::ensure_booted();
		let root = root_dentry();
		mkdir(&root, Path::new("/neg-test"), 0o755).unwrap();
		let dir = resolve(&root, Path::new("/neg-test"), ResolveFlags::EXPECT_DIR).unwrap();
		// A miss caches a negative entry
		assert!(resolve(&root, Path::new("/neg-test/ghost"), ResolveFlags::empty()).is_err());
		let ghost = dir.cached_child("ghost").unwrap();
		assert!(ghost.inode().is_none());
		// Creating over the negative entry turns it positive
		create(&root, Path::new("/neg-test/ghost"), FileType::Regular, 0o644).unwrap();
		assert!(dir.cached_child("ghost").unwrap().inode().is_some());
		unlink(&root, Path::new("/neg-test/ghost")).unwrap();
		rmdir(&root, Path::new("/neg-test")).unwrap();
	}

	#[test]
	fn getcwd_roundtrip() {
		selftest::ensure_booted();
		let root = root_dentry();
		mkdir(&root, Path::new("/cwd-test"), 0o755).unwrap();
		mkdir(&root, Path::new("/cwd-test/deep"), 0o755).unwrap();
		let d = resolve(&root, Path::new("/cwd-test/deep"), ResolveFlags::EXPECT_DIR).unwrap();
		let path = path_of(&d);
		assert_eq!(path.as_str(), "/cwd-test/deep");
		// The rendered path resolves back to the same dentry
		let again = resolve(&root, Path::new(path.as_str()), ResolveFlags::EXPECT_DIR).unwrap();
		assert!(Arc::ptr_eq(&d, &again));
	}
}

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

//! sysfs, the in-memory diagnostics tree mounted at `/sys`.
//!
//! Attributes render their content on every read, so the numbers are always
//! live. Writable attributes (the debug toggles) change the live setting.

use crate::{
	cmdline, debug,
	file::{
		dentry::{Dentry, STATS as DENTRY_STATS},
		fs::{Filesystem, SuperBlock},
		inode::{DirEntry, FileOps, FileType, Inode, InodeOps, Stat},
		mount,
	},
	ipc,
	memory::stats,
};
use alloc::{
	boxed::Box,
	collections::BTreeMap,
	format,
	string::{String, ToString},
	sync::Arc,
	vec::Vec,
};
use core::{fmt::Write, sync::atomic::Ordering::Relaxed};
use utils::{errno, errno::EResult};

/// Renders an attribute's content.
type ReadFn = Box<dyn Fn() -> String + Send + Sync>;
/// Applies a write to an attribute.
type WriteFn = Box<dyn Fn(&str) -> EResult<()> + Send + Sync>;

/// A directory node with a fixed set of children.
struct DirOps {
	children: BTreeMap<String, Arc<Inode>>,
}

impl InodeOps for DirOps {
	fn lookup(&self, _dir: &Inode, name: &str) -> EResult<Option<Arc<Inode>>> {
		Ok(self.children.get(name).cloned())
	}

	fn iterate_dir(&self, _inode: &Inode, f: &mut dyn FnMut(DirEntry)) -> EResult<()> {
		for (name, inode) in &self.children {
			f(DirEntry {
				ino: inode.ino(),
				typ: inode.file_type(),
				name: name.clone(),
			});
		}
		Ok(())
	}
}

/// An attribute node.
struct AttrOps;

impl InodeOps for AttrOps {}

/// Direct IO over an attribute's render/apply functions.
struct AttrFile {
	read: ReadFn,
	write: Option<WriteFn>,
}

impl FileOps for AttrFile {
	fn read(&self, _inode: &Inode, off: u64, buf: &mut [u8]) -> EResult<usize> {
		let content = (self.read)();
		let bytes = content.as_bytes();
		let off = off as usize;
		if off >= bytes.len() {
			return Ok(0);
		}
		let n = (bytes.len() - off).min(buf.len());
		buf[..n].copy_from_slice(&bytes[off..off + n]);
		Ok(n)
	}

	fn write(&self, _inode: &Inode, _off: u64, buf: &[u8]) -> EResult<usize> {
		let Some(write) = &self.write else {
			return Err(errno!(EACCES));
		};
		let text = core::str::from_utf8(buf).map_err(|_| errno!(EINVAL))?;
		write(text.trim())?;
		Ok(buf.len())
	}
}

/// Builder for the static part of the tree.
struct TreeBuilder {
	sb: Arc<SuperBlock>,
}

impl TreeBuilder {
	fn attr(&self, read: ReadFn, write: Option<WriteFn>) -> Arc<Inode> {
		let mode = if write.is_some() { 0o644 } else { 0o444 };
		Inode::new_direct(
			Stat::new(self.sb.alloc_ino(), FileType::Regular, mode),
			Arc::downgrade(&self.sb),
			Box::new(AttrOps),
			Box::new(AttrFile {
				read,
				write,
			}),
		)
	}

	fn dir(&self, children: BTreeMap<String, Arc<Inode>>) -> Arc<Inode> {
		let mut stat = Stat::new(self.sb.alloc_ino(), FileType::Directory, 0o555);
		stat.nlinks = 2;
		Inode::new(
			stat,
			Arc::downgrade(&self.sb),
			Box::new(DirOps {
				children,
			}),
		)
	}
}

/// Renders a list of lines.
fn lines(items: Vec<String>) -> String {
	let mut out = String::new();
	for item in items {
		let _ = writeln!(out, "{item}");
	}
	out
}

/// The sysfs filesystem type.
pub struct SysFs;

impl Filesystem for SysFs {
	fn name(&self) -> &'static str {
		"sysfs"
	}

	fn mount(&self, _device: Option<&str>) -> EResult<Arc<SuperBlock>> {
		let sb = SuperBlock::new(self.name());
		let b = TreeBuilder {
			sb: sb.clone(),
		};
		// /sys/kernel
		let mut kernel = BTreeMap::new();
		kernel.insert(
			"version".to_string(),
			b.attr(Box::new(|| format!("{}\n", crate::VERSION)), None),
		);
		kernel.insert(
			"arch".to_string(),
			b.attr(Box::new(|| "hosted\n".to_string()), None),
		);
		kernel.insert(
			"init_path".to_string(),
			b.attr(Box::new(|| format!("{}\n", cmdline::init_path())), None),
		);
		kernel.insert(
			"init_argv".to_string(),
			b.attr(
				Box::new(|| format!("{}\n", cmdline::init_args().unwrap_or_default())),
				None,
			),
		);
		kernel.insert(
			"initrd".to_string(),
			b.attr(
				Box::new(|| {
					let len = crate::boot::INITRD
						.try_get()
						.and_then(|i| i.map(|b| b.len()))
						.unwrap_or(0);
					format!("{len}\n")
				}),
				None,
			),
		);
		// /sys/vfs
		let mut vfs_dir = BTreeMap::new();
		vfs_dir.insert(
			"filesystems".to_string(),
			b.attr(Box::new(|| lines(crate::file::fs::names())), None),
		);
		vfs_dir.insert(
			"mount".to_string(),
			b.attr(
				Box::new(|| {
					lines(
						mount::list()
							.into_iter()
							.map(|(path, fs)| format!("{path} {fs}"))
							.collect(),
					)
				}),
				None,
			),
		);
		vfs_dir.insert(
			"dentry_stats".to_string(),
			b.attr(
				Box::new(|| {
					format!(
						"alive {}\nnegative {}\nreclaimed {}\n",
						DENTRY_STATS.alive.load(Relaxed),
						DENTRY_STATS.negative.load(Relaxed),
						DENTRY_STATS.reclaimed.load(Relaxed),
					)
				}),
				None,
			),
		);
		// /sys/mmstat
		let mut mmstat = BTreeMap::new();
		mmstat.insert(
			"stat".to_string(),
			b.attr(Box::new(stats::render), None),
		);
		// /sys/debug: one read-write toggle per known module
		let mut debug_dir = BTreeMap::new();
		for (module, _) in debug::list() {
			let name = module.clone();
			let read_name = module.clone();
			debug_dir.insert(
				module,
				b.attr(
					Box::new(move || {
						format!("{}\n", debug::enabled(&read_name) as u8)
					}),
					Some(Box::new(move |val| {
						debug::set_enabled(&name, val != "0");
						Ok(())
					})),
				),
			);
		}
		// /sys/ipc
		let mut ipc_dir = BTreeMap::new();
		ipc_dir.insert(
			"servers".to_string(),
			b.attr(Box::new(|| lines(ipc::server_names())), None),
		);
		ipc_dir.insert(
			"name_waitlist".to_string(),
			b.attr(Box::new(|| lines(ipc::waited_names())), None),
		);
		// Assemble
		let mut top = BTreeMap::new();
		top.insert("kernel".to_string(), b.dir(kernel));
		top.insert("vfs".to_string(), b.dir(vfs_dir));
		top.insert("mmstat".to_string(), b.dir(mmstat));
		top.insert("debug".to_string(), b.dir(debug_dir));
		top.insert("ipc".to_string(), b.dir(ipc_dir));
		let root_inode = b.dir(top);
		let root = Dentry::new_root(Some(root_inode));
		*root.sb.lock() = Arc::downgrade(&sb);
		sb.root.init(root);
		Ok(sb)
	}
}

/// The `SYSFS` init phase: registers and mounts the tree at `/sys`.
pub fn init() -> EResult<()> {
	use utils::collections::path::Path;
	crate::file::fs::register(Arc::new(SysFs));
	let root = crate::file::vfs::root_dentry();
	crate::file::vfs::mkdir(&root, Path::new("/sys"), 0o555)?;
	crate::file::vfs::mount(&root, None, Path::new("/sys"), "sysfs")?;
	Ok(())
}

#[cfg(test)]
mod test {
	use crate::{
		debug,
		file::vfs,
		io::OpenFlags,
		selftest,
	};
	use utils::collections::path::Path;

	#[test]
	fn attributes_render() {
		selftest::ensure_booted();
		let root = vfs::root_dentry();
		let io = vfs::open(&root, Path::new("/sys/mmstat/stat"), OpenFlags::READ, 0).unwrap();
		let mut buf = [0u8; 256];
		let n = io.read(&mut buf).unwrap();
		let text = core::str::from_utf8(&buf[..n]).unwrap();
		assert!(text.contains("MemTotal:"));
		let io = vfs::open(
			&root,
			Path::new("/sys/vfs/filesystems"),
			OpenFlags::READ,
			0,
		)
		.unwrap();
		let n = io.read(&mut buf).unwrap();
		let text = core::str::from_utf8(&buf[..n]).unwrap();
		assert!(text.contains("tmpfs"));
		assert!(text.contains("sysfs"));
	}

	#[test]
	fn debug_toggle_is_live() {
		selftest::ensure_booted();
		// The hosted boot passes debug.selftest=0 so the node exists
		let root = vfs::root_dentry();
		let io = vfs::open(
			&root,
			Path::new("/sys/debug/selftest"),
			OpenFlags::READ | OpenFlags::WRITE,
			0,
		)
		.unwrap();
		assert!(!debug::enabled("selftest"));
		io.write(b"1").unwrap();
		assert!(debug::enabled("selftest"));
		io.write(b"0").unwrap();
		assert!(!debug::enabled("selftest"));
	}
}

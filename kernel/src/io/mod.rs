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

//! The IO object: the uniform interface file descriptors point at.
//!
//! An IO object is a tagged union over {file, directory, pipe end, IPC
//! listener, IPC channel, console, null} with a capability flag set. The
//! last reference dropping triggers the kind-specific close.

use crate::{
	file::{
		dentry::Dentry,
		inode::{DirEntry, FileType, Inode, Stat},
		page_cache,
		pipe::{Pipe, PipeEnd},
		vfs,
	},
	ipc::{IpcDescriptor, IpcServer},
	sync::Mutex,
};
use alloc::{
	string::{String, ToString},
	sync::Arc,
	vec::Vec,
};
use bitflags::bitflags;
use utils::{errno, errno::EResult, limits::PIPE_DEFAULT_PAGES};

bitflags! {
	/// Capabilities of an IO object.
	#[derive(Clone, Copy, Debug, Eq, PartialEq)]
	pub struct IoFlags: u32 {
		/// `read` works.
		const READABLE = 1 << 0;
		/// `write` works.
		const WRITABLE = 1 << 1;
		/// `seek` works.
		const SEEKABLE = 1 << 2;
		/// `mmap` works.
		const MMAPABLE = 1 << 3;
	}
}

bitflags! {
	/// Flags of an open file.
	#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
	pub struct OpenFlags: u32 {
		/// Open for reading.
		const READ = 1 << 0;
		/// Open for writing.
		const WRITE = 1 << 1;
		/// Create the file if it does not exist.
		const CREATE = 1 << 2;
		/// With `CREATE`, fail if the file exists.
		const EXCL = 1 << 3;
		/// Truncate to zero length on open.
		const TRUNC = 1 << 4;
		/// Writes go to the end of the file.
		const APPEND = 1 << 5;
		/// The path must be a directory.
		const DIRECTORY = 1 << 6;
		/// Do not follow a final symlink.
		const NOFOLLOW = 1 << 7;
		/// Close the descriptor on `execve`.
		const CLOEXEC = 1 << 8;
	}
}

/// `seek` reference points.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SeekWhence {
	/// From the start of the file.
	Set,
	/// From the current position.
	Cur,
	/// From the end of the file.
	End,
}

impl SeekWhence {
	/// Decodes the syscall encoding.
	pub fn from_raw(raw: usize) -> EResult<Self> {
		match raw {
			0 => Ok(Self::Set),
			1 => Ok(Self::Cur),
			2 => Ok(Self::End),
			_ => Err(errno!(EINVAL)),
		}
	}
}

/// The kind of an IO object.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IoKind {
	/// Regular file.
	File,
	/// Directory handle.
	Dir,
	/// One end of a pipe.
	Pipe,
	/// IPC listener or channel.
	Ipc,
	/// The kernel console.
	Console,
	/// The bit bucket.
	Null,
}

/// An open file or directory.
pub struct OpenFile {
	/// The path's dentry. `None` for anonymous files (memfd).
	pub dentry: Option<Arc<Dentry>>,
	/// The file's inode, pinned independently of the dentry.
	pub inode: Arc<Inode>,
	/// The open flags.
	pub flags: OpenFlags,
	/// Display name for anonymous files.
	name: String,
	/// Current position.
	pos: Mutex<u64>,
	/// Directory snapshot, built on first read.
	snapshot: Mutex<Option<Vec<DirEntry>>>,
}

/// An IPC object: either a listening server or one side of a channel.
pub enum IpcIo {
	/// A listening server; `accept` works.
	Listener(Arc<IpcServer>),
	/// The client side of an accepted connection.
	ClientChannel(Arc<IpcDescriptor>),
	/// The server side of an accepted connection.
	ServerChannel(Arc<IpcDescriptor>),
}

/// The tagged union behind an IO object.
enum IoImpl {
	File(OpenFile),
	Pipe(PipeEnd),
	Ipc(IpcIo),
	Console,
	Null,
}

/// A uniform IO object.
pub struct Io {
	/// The object's kind.
	pub kind: IoKind,
	/// The object's capabilities.
	pub flags: IoFlags,
	imp: IoImpl,
}

impl Io {
	/// Wraps an open file or directory.
	pub fn new_file(dentry: Arc<Dentry>, inode: Arc<Inode>, flags: OpenFlags) -> Arc<Self> {
		let is_dir = inode.file_type() == FileType::Directory;
		let mut caps = IoFlags::SEEKABLE;
		if flags.contains(OpenFlags::READ) {
			caps |= IoFlags::READABLE;
		}
		if flags.contains(OpenFlags::WRITE) && !is_dir {
			caps |= IoFlags::WRITABLE;
		}
		if !is_dir {
			caps |= IoFlags::MMAPABLE;
		}
		let name = dentry.name().to_string();
		Arc::new(Self {
			kind: if is_dir { IoKind::Dir } else { IoKind::File },
			flags: caps,
			imp: IoImpl::File(OpenFile {
				dentry: Some(dentry),
				inode,
				flags,
				name,
				pos: Mutex::new(0),
				snapshot: Mutex::new(None),
			}),
		})
	}

	/// Wraps an anonymous page-cache-backed file.
	pub fn new_memfd(inode: Arc<Inode>, name: &str) -> Arc<Self> {
		Arc::new(Self {
			kind: IoKind::File,
			flags: IoFlags::READABLE | IoFlags::WRITABLE | IoFlags::SEEKABLE | IoFlags::MMAPABLE,
			imp: IoImpl::File(OpenFile {
				dentry: None,
				inode,
				flags: OpenFlags::READ | OpenFlags::WRITE,
				name: name.to_string(),
				pos: Mutex::new(0),
				snapshot: Mutex::new(None),
			}),
		})
	}

	/// Creates a connected pipe pair `(reader, writer)`.
	pub fn new_pipe_pair() -> EResult<(Arc<Self>, Arc<Self>)> {
		let pipe = Pipe::new(PIPE_DEFAULT_PAGES)?;
		let reader = Arc::new(Self {
			kind: IoKind::Pipe,
			flags: IoFlags::READABLE,
			imp: IoImpl::Pipe(PipeEnd {
				pipe: pipe.clone(),
				writer: false,
			}),
		});
		let writer = Arc::new(Self {
			kind: IoKind::Pipe,
			flags: IoFlags::WRITABLE,
			imp: IoImpl::Pipe(PipeEnd {
				pipe,
				writer: true,
			}),
		});
		Ok((reader, writer))
	}

	/// Wraps a listening IPC server.
	pub fn new_ipc_listener(server: Arc<IpcServer>) -> Arc<Self> {
		Arc::new(Self {
			kind: IoKind::Ipc,
			flags: IoFlags::empty(),
			imp: IoImpl::Ipc(IpcIo::Listener(server)),
		})
	}

	/// Wraps one side of an accepted IPC connection.
	pub fn new_ipc_channel(desc: Arc<IpcDescriptor>, server_side: bool) -> Arc<Self> {
		let side = if server_side {
			IpcIo::ServerChannel(desc)
		} else {
			IpcIo::ClientChannel(desc)
		};
		Arc::new(Self {
			kind: IoKind::Ipc,
			flags: IoFlags::READABLE | IoFlags::WRITABLE,
			imp: IoImpl::Ipc(side),
		})
	}

	/// Wraps the kernel console.
	pub fn new_console() -> Arc<Self> {
		Arc::new(Self {
			kind: IoKind::Console,
			flags: IoFlags::READABLE | IoFlags::WRITABLE,
			imp: IoImpl::Console,
		})
	}

	/// Creates a null IO object.
	pub fn new_null() -> Arc<Self> {
		Arc::new(Self {
			kind: IoKind::Null,
			flags: IoFlags::READABLE | IoFlags::WRITABLE,
			imp: IoImpl::Null,
		})
	}

	/// Reads from the object at its current position.
	pub fn read(&self, buf: &mut [u8]) -> EResult<usize> {
		if !self.flags.contains(IoFlags::READABLE) {
			return Err(errno!(EBADF));
		}
		match &self.imp {
			IoImpl::File(f) => {
				if self.kind == IoKind::Dir {
					return Err(errno!(EISDIR));
				}
				let mut pos = f.pos.lock();
				let n = read_file_at(&f.inode, *pos, buf)?;
				*pos += n as u64;
				Ok(n)
			}
			IoImpl::Pipe(end) => end.pipe.read(buf),
			IoImpl::Ipc(ipc) => match ipc {
				IpcIo::Listener(_) => Err(errno!(EINVAL)),
				IpcIo::ClientChannel(desc) => desc.pipes().server_to_client.read(buf),
				IpcIo::ServerChannel(desc) => desc.pipes().client_to_server.read(buf),
			},
			IoImpl::Console | IoImpl::Null => Ok(0),
		}
	}

	/// Reads at an explicit offset, leaving the position alone.
	pub fn pread(&self, buf: &mut [u8], off: u64) -> EResult<usize> {
		if !self.flags.contains(IoFlags::READABLE) {
			return Err(errno!(EBADF));
		}
		match &self.imp {
			IoImpl::File(f) => read_file_at(&f.inode, off, buf),
			_ => Err(errno!(ESPIPE)),
		}
	}

	/// Writes to the object at its current position.
	pub fn write(&self, buf: &[u8]) -> EResult<usize> {
		if !self.flags.contains(IoFlags::WRITABLE) {
			return Err(errno!(EBADF));
		}
		match &self.imp {
			IoImpl::File(f) => {
				let mut pos = f.pos.lock();
				if f.flags.contains(OpenFlags::APPEND) {
					*pos = f.inode.size();
				}
				let n = write_file_at(&f.inode, *pos, buf)?;
				*pos += n as u64;
				Ok(n)
			}
			IoImpl::Pipe(end) => end.pipe.write(buf),
			IoImpl::Ipc(ipc) => match ipc {
				IpcIo::Listener(_) => Err(errno!(EINVAL)),
				IpcIo::ClientChannel(desc) => desc.pipes().client_to_server.write(buf),
				IpcIo::ServerChannel(desc) => desc.pipes().server_to_client.write(buf),
			},
			IoImpl::Console => {
				if let Ok(s) = core::str::from_utf8(buf) {
					crate::platform::platform().console_write(s);
				}
				Ok(buf.len())
			}
			IoImpl::Null => Ok(buf.len()),
		}
	}

	/// Moves the position, clamping `End`-relative seeks at end-of-file.
	pub fn seek(&self, off: i64, whence: SeekWhence) -> EResult<u64> {
		if !self.flags.contains(IoFlags::SEEKABLE) {
			return Err(errno!(ESPIPE));
		}
		match &self.imp {
			IoImpl::File(f) => {
				let mut pos = f.pos.lock();
				let size = f.inode.size();
				let base = match whence {
					SeekWhence::Set => 0,
					SeekWhence::Cur => *pos,
					SeekWhence::End => size,
				};
				let target = base
					.checked_add_signed(off)
					.ok_or(errno!(EINVAL))?;
				let target = if whence == SeekWhence::End {
					target.min(size)
				} else {
					target
				};
				*pos = target;
				Ok(target)
			}
			_ => Err(errno!(ESPIPE)),
		}
	}

	/// The current position.
	pub fn tell(&self) -> EResult<u64> {
		match &self.imp {
			IoImpl::File(f) => Ok(*f.pos.lock()),
			_ => Err(errno!(ESPIPE)),
		}
	}

	/// Stat data of the object.
	pub fn stat(&self) -> EResult<Stat> {
		match &self.imp {
			IoImpl::File(f) => Ok(f.inode.stat.lock().clone()),
			IoImpl::Pipe(_) => Ok(Stat::new(0, FileType::Fifo, 0o600)),
			IoImpl::Ipc(_) => Ok(Stat::new(0, FileType::Fifo, 0o600)),
			IoImpl::Console => Ok(Stat::new(0, FileType::CharDevice, 0o666)),
			IoImpl::Null => Ok(Stat::new(0, FileType::CharDevice, 0o666)),
		}
	}

	/// The inode to install behind an `mmap` of this object.
	///
	/// `shared_write` tells whether a SHARED writable mapping is requested;
	/// it requires the file to be open for writing.
	pub fn mapped_inode(&self, shared_write: bool) -> EResult<Arc<Inode>> {
		if !self.flags.contains(IoFlags::MMAPABLE) {
			return Err(errno!(ENODEV));
		}
		match &self.imp {
			IoImpl::File(f) => {
				if shared_write && !self.flags.contains(IoFlags::WRITABLE) {
					return Err(errno!(EACCES));
				}
				Ok(f.inode.clone())
			}
			_ => Err(errno!(ENODEV)),
		}
	}

	/// The open file behind the object, if it is one.
	pub fn as_file(&self) -> Option<&OpenFile> {
		match &self.imp {
			IoImpl::File(f) => Some(f),
			_ => None,
		}
	}

	/// The IPC object behind the object, if it is one.
	pub fn as_ipc(&self) -> Option<&IpcIo> {
		match &self.imp {
			IoImpl::Ipc(ipc) => Some(ipc),
			_ => None,
		}
	}

	/// A human-readable name for the object.
	pub fn get_name(&self) -> String {
		match &self.imp {
			IoImpl::File(f) => f.name.clone(),
			IoImpl::Pipe(end) => {
				if end.writer {
					"pipe:[w]".to_string()
				} else {
					"pipe:[r]".to_string()
				}
			}
			IoImpl::Ipc(IpcIo::Listener(s)) => s.name.clone(),
			IoImpl::Ipc(IpcIo::ClientChannel(d) | IpcIo::ServerChannel(d)) => {
				d.server_name.clone()
			}
			IoImpl::Console => "console".to_string(),
			IoImpl::Null => "null".to_string(),
		}
	}

	/// Readiness mask, for `io_poll`.
	pub fn poll(&self) -> u32 {
		match &self.imp {
			IoImpl::File(_) => POLLIN | POLLOUT,
			IoImpl::Pipe(end) => {
				let mut mask = 0;
				if !end.writer && end.pipe.buffered() > 0 {
					mask |= POLLIN;
				}
				if end.writer && end.pipe.buffered() < end.pipe.capacity() {
					mask |= POLLOUT;
				}
				mask
			}
			IoImpl::Ipc(_) => POLLIN | POLLOUT,
			IoImpl::Console => POLLOUT,
			IoImpl::Null => POLLIN | POLLOUT,
		}
	}

	/// Flushes file content to its backing store.
	pub fn fsync(&self, _data_only: bool) -> EResult<()> {
		match &self.imp {
			// In-memory filesystems have nothing further to flush
			IoImpl::File(_) => Ok(()),
			_ => Err(errno!(EINVAL)),
		}
	}

	/// Serializes directory entries into `buf` as packed records, resuming
	/// at the handle's cursor.
	///
	/// Each record is `ino: u64, reclen: u16, type: u8, name, NUL`. Returns
	/// the number of bytes produced; 0 means the listing is exhausted.
	pub fn list_dir(&self, buf: &mut [u8]) -> EResult<usize> {
		let IoImpl::File(f) = &self.imp else {
			return Err(errno!(ENOTDIR));
		};
		if self.kind != IoKind::Dir {
			return Err(errno!(ENOTDIR));
		}
		let mut snapshot = f.snapshot.lock();
		if snapshot.is_none() {
			// First read: snapshot the directory
			let mut entries = Vec::new();
			f.inode.ops.iterate_dir(&f.inode, &mut |e| entries.push(e))?;
			*snapshot = Some(entries);
		}
		let entries = snapshot.as_ref().unwrap();
		let mut pos = f.pos.lock();
		let mut out = 0;
		while (*pos as usize) < entries.len() {
			let entry = &entries[*pos as usize];
			let reclen = DIRENT_HEADER_LEN + entry.name.len() + 1;
			if out + reclen > buf.len() {
				break;
			}
			buf[out..out + 8].copy_from_slice(&entry.ino.to_ne_bytes());
			buf[out + 8..out + 10].copy_from_slice(&(reclen as u16).to_ne_bytes());
			buf[out + 10] = file_type_code(entry.typ);
			buf[out + 11..out + 11 + entry.name.len()]
				.copy_from_slice(entry.name.as_bytes());
			buf[out + reclen - 1] = 0;
			out += reclen;
			*pos += 1;
		}
		if out == 0 && (*pos as usize) < entries.len() {
			return Err(errno!(EINVAL));
		}
		Ok(out)
	}
}

/// Readiness bit: data available to read.
pub const POLLIN: u32 = 1 << 0;
/// Readiness bit: writable without blocking.
pub const POLLOUT: u32 = 1 << 2;

/// Size of the fixed part of a packed directory record.
pub const DIRENT_HEADER_LEN: usize = 11;

/// The type byte of a packed directory record.
pub fn file_type_code(typ: FileType) -> u8 {
	match typ {
		FileType::Regular => 1,
		FileType::Directory => 2,
		FileType::Symlink => 3,
		FileType::Fifo => 4,
		FileType::CharDevice => 5,
	}
}

/// Reads file content, direct ops first, page cache otherwise.
fn read_file_at(inode: &Arc<Inode>, off: u64, buf: &mut [u8]) -> EResult<usize> {
	if let Some(ops) = &inode.file_ops {
		return ops.read(inode, off, buf);
	}
	page_cache::read(inode, buf, off)
}

/// Writes file content, direct ops first, page cache otherwise.
fn write_file_at(inode: &Arc<Inode>, off: u64, buf: &[u8]) -> EResult<usize> {
	if let Some(ops) = &inode.file_ops {
		return ops.write(inode, off, buf);
	}
	page_cache::write(inode, buf, off)
}

impl Drop for Io {
	fn drop(&mut self) {
		match &self.imp {
			IoImpl::File(f) => {
				// Release the path pin taken at open
				if let Some(dentry) = &f.dentry {
					vfs::dentry_unref_up_to(dentry, &vfs::root_dentry());
				}
			}
			IoImpl::Ipc(IpcIo::Listener(server)) => {
				crate::ipc::server_close(server);
			}
			IoImpl::Ipc(IpcIo::ClientChannel(desc) | IpcIo::ServerChannel(desc)) => {
				if let Some(pipes) = desc_pipes(desc) {
					pipes.client_to_server.close_one_end();
					pipes.server_to_client.close_one_end();
				}
			}
			// Pipe ends close themselves on drop
			_ => {}
		}
	}
}

/// The pipes of a descriptor, if the connection was established.
fn desc_pipes(desc: &Arc<IpcDescriptor>) -> Option<&crate::ipc::ChannelPipes> {
	if desc.is_rejected() {
		return None;
	}
	// Connections torn down before `accept` have no pipes
	desc.try_pipes()
}

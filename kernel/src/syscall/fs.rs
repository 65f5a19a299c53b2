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

//! Filesystem and IO system calls.

use crate::{
	file::{
		fd::{Fd, FdFlags},
		vfs,
	},
	io::{Io, OpenFlags, SeekWhence},
	memory::user::{UserPtr, UserString},
	process::{scheduler, signal, Process},
	syscall::{at, user_slice},
};
use alloc::sync::Arc;
use macros::syscall;
use utils::{
	bytes::AnyRepr,
	collections::path::Path,
	errno,
	errno::EResult,
	limits::IOV_MAX,
};

/// The user-facing stat structure.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct FileStat {
	/// Inode number.
	pub ino: u64,
	/// Size in bytes.
	pub size: u64,
	/// File type code, as in directory records.
	pub typ: u32,
	/// Permission bits.
	pub mode: u32,
	/// Number of hard links.
	pub nlinks: u32,
	/// Padding.
	pub _pad: u32,
}

unsafe impl AnyRepr for FileStat {}

/// A scatter-gather element.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct IoVec {
	/// Base address.
	pub base: u64,
	/// Length in bytes.
	pub len: u64,
}

unsafe impl AnyRepr for IoVec {}

fn fd_get(fd: Fd) -> EResult<Arc<Io>> {
	Process::current().fds.lock().get(fd)
}

#[syscall]
pub fn vfs_openat(dirfd: Fd, path: UserString, flags: u64, mode: u64) -> EResult<usize> {
	let path = path.read()?;
	let base = at::base_dentry(dirfd)?;
	let oflags = OpenFlags::from_bits_truncate(flags as u32);
	let io = vfs::open(&base, Path::new(&path), oflags, mode as u16)?;
	let mut fdflags = FdFlags::empty();
	if oflags.contains(OpenFlags::CLOEXEC) {
		fdflags |= FdFlags::CLOEXEC;
	}
	let fd = Process::current().fds.lock().attach(io, fdflags)?;
	Ok(fd as usize)
}

#[syscall]
pub fn vfs_fstatat(
	fd: Fd,
	path: UserString,
	stat_buf: UserPtr<FileStat>,
	flags: u64,
) -> EResult<usize> {
	/// Do not follow a final symlink.
	const AT_SYMLINK_NOFOLLOW: u64 = 1;
	let stat = if path.is_null() {
		fd_get(fd)?.stat()?
	} else {
		let path = path.read()?;
		let base = at::base_dentry(fd)?;
		vfs::stat(&base, Path::new(&path), flags & AT_SYMLINK_NOFOLLOW == 0)?
	};
	stat_buf.write(&FileStat {
		ino: stat.ino,
		size: stat.size,
		typ: crate::io::file_type_code(stat.typ) as u32,
		mode: stat.mode as u32,
		nlinks: stat.nlinks,
		_pad: 0,
	})?;
	Ok(0)
}

#[syscall]
pub fn vfs_readlinkat(
	dirfd: Fd,
	path: UserString,
	buf: UserPtr<u8>,
	buflen: usize,
) -> EResult<usize> {
	let path = path.read()?;
	let base = at::base_dentry(dirfd)?;
	let target = vfs::readlink(&base, Path::new(&path))?;
	user_slice(buf.addr().0, buflen).write_from(target.as_bytes())
}

#[syscall]
pub fn vfs_unlinkat(dirfd: Fd, path: UserString) -> EResult<usize> {
	let path = path.read()?;
	let base = at::base_dentry(dirfd)?;
	vfs::unlink(&base, Path::new(&path))?;
	Ok(0)
}

#[syscall]
pub fn vfs_mkdir(path: UserString, mode: u64) -> EResult<usize> {
	let path = path.read()?;
	let cwd = Process::current().cwd.lock().clone();
	vfs::mkdir(&cwd, Path::new(&path), mode as u16)?;
	Ok(0)
}

#[syscall]
pub fn vfs_rmdir(path: UserString) -> EResult<usize> {
	let path = path.read()?;
	let cwd = Process::current().cwd.lock().clone();
	vfs::rmdir(&cwd, Path::new(&path))?;
	Ok(0)
}

#[syscall]
pub fn vfs_symlink(target: UserString, linkpath: UserString) -> EResult<usize> {
	let target = target.read()?;
	let linkpath = linkpath.read()?;
	let cwd = Process::current().cwd.lock().clone();
	vfs::symlink(&cwd, &target, Path::new(&linkpath))?;
	Ok(0)
}

#[syscall]
pub fn vfs_chdirat(dirfd: Fd, path: UserString) -> EResult<usize> {
	let path = path.read()?;
	let base = at::base_dentry(dirfd)?;
	let d = vfs::resolve(
		&base,
		Path::new(&path),
		vfs::ResolveFlags::FOLLOW | vfs::ResolveFlags::EXPECT_DIR,
	)?;
	let root = vfs::root_dentry();
	vfs::dentry_ref_up_to(&d, &root);
	let old = core::mem::replace(&mut *Process::current().cwd.lock(), d);
	vfs::dentry_unref_up_to(&old, &root);
	Ok(0)
}

#[syscall]
pub fn vfs_getcwd(buf: UserPtr<u8>, size: usize) -> EResult<usize> {
	let cwd = Process::current().cwd.lock().clone();
	let path = vfs::path_of(&cwd);
	let bytes = path.as_str().as_bytes();
	if bytes.len() + 1 > size {
		return Err(errno!(ERANGE));
	}
	let mm = Process::current().mm();
	mm.write_bytes(buf.addr(), bytes)?;
	mm.write_obj(buf.addr() + bytes.len(), &0u8)?;
	Ok(bytes.len())
}

#[syscall]
pub fn vfs_mount(
	device: UserString,
	mountpoint: UserString,
	fs_type: UserString,
	_options: UserString,
) -> EResult<usize> {
	let device = if device.is_null() {
		None
	} else {
		Some(device.read()?)
	};
	let mountpoint = mountpoint.read()?;
	let fs_type = fs_type.read()?;
	let cwd = Process::current().cwd.lock().clone();
	vfs::mount(&cwd, device.as_deref(), Path::new(&mountpoint), &fs_type)?;
	Ok(0)
}

#[syscall]
pub fn vfs_unmount(path: UserString) -> EResult<usize> {
	let path = path.read()?;
	let cwd = Process::current().cwd.lock().clone();
	vfs::unmount(&cwd, Path::new(&path))?;
	Ok(0)
}

#[syscall]
pub fn vfs_fsync(fd: Fd, data_only: bool) -> EResult<usize> {
	fd_get(fd)?.fsync(data_only)?;
	Ok(0)
}

#[syscall]
pub fn vfs_list_dir(fd: Fd, buffer: UserPtr<u8>, size: usize) -> EResult<usize> {
	let io = fd_get(fd)?;
	let mut buf = alloc::vec![0u8; size.min(65536)];
	let n = io.list_dir(&mut buf)?;
	user_slice(buffer.addr().0, n).write_from(&buf[..n])
}

#[syscall]
pub fn io_read(fd: Fd, buf: UserPtr<u8>, count: usize) -> EResult<usize> {
	let io = fd_get(fd)?;
	let mut kbuf = alloc::vec![0u8; count.min(65536)];
	let n = io.read(&mut kbuf)?;
	user_slice(buf.addr().0, n).write_from(&kbuf[..n])
}

#[syscall]
pub fn io_write(fd: Fd, buf: UserPtr<u8>, count: usize) -> EResult<usize> {
	let io = fd_get(fd)?;
	let kbuf = user_slice(buf.addr().0, count.min(65536)).read_to_vec()?;
	io.write(&kbuf)
}

#[syscall]
pub fn io_pread(fd: Fd, buf: UserPtr<u8>, count: usize, offset: u64) -> EResult<usize> {
	let io = fd_get(fd)?;
	let mut kbuf = alloc::vec![0u8; count.min(65536)];
	let n = io.pread(&mut kbuf, offset)?;
	user_slice(buf.addr().0, n).write_from(&kbuf[..n])
}

#[syscall]
pub fn io_readv(fd: Fd, iov: UserPtr<IoVec>, iovcnt: usize) -> EResult<usize> {
	if iovcnt > IOV_MAX {
		return Err(errno!(EINVAL));
	}
	let io = fd_get(fd)?;
	let mm = Process::current().mm();
	let mut total = 0;
	for i in 0..iovcnt {
		let vec: IoVec = mm.read_obj(iov.addr() + i * size_of::<IoVec>())?;
		let mut kbuf = alloc::vec![0u8; (vec.len as usize).min(65536)];
		let n = io.read(&mut kbuf)?;
		user_slice(vec.base as usize, n).write_from(&kbuf[..n])?;
		total += n;
		if n < vec.len as usize {
			break;
		}
	}
	Ok(total)
}

#[syscall]
pub fn io_seek(fd: Fd, offset: i64, whence: usize) -> EResult<usize> {
	let pos = fd_get(fd)?.seek(offset, SeekWhence::from_raw(whence)?)?;
	Ok(pos as usize)
}

#[syscall]
pub fn io_tell(fd: Fd) -> EResult<usize> {
	Ok(fd_get(fd)?.tell()? as usize)
}

#[syscall]
pub fn io_close(fd: Fd) -> EResult<usize> {
	Process::current().fds.lock().close(fd)?;
	Ok(0)
}

#[syscall]
pub fn io_dup(fd: Fd) -> EResult<usize> {
	let process = Process::current();
	let mut fds = process.fds.lock();
	let entry = fds.entry(fd)?;
	// The duplicate shares the open file but not the descriptor flags
	let new = fds.attach(entry.io, FdFlags::empty())?;
	Ok(new as usize)
}

#[syscall]
pub fn io_dup2(oldfd: Fd, newfd: Fd) -> EResult<usize> {
	let process = Process::current();
	let mut fds = process.fds.lock();
	let entry = fds.entry(oldfd)?;
	if oldfd == newfd {
		return Ok(newfd as usize);
	}
	fds.attach_at(newfd, entry.io, FdFlags::empty())?;
	Ok(newfd as usize)
}

/// One entry of `io_poll`'s array.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct PollFd {
	/// The polled descriptor.
	pub fd: i32,
	/// Requested events.
	pub events: u16,
	/// Returned events.
	pub revents: u16,
}

unsafe impl AnyRepr for PollFd {}

#[syscall]
pub fn io_poll(fds: UserPtr<PollFd>, nfds: usize, timeout: i64) -> EResult<usize> {
	if nfds > 64 {
		return Err(errno!(EINVAL));
	}
	let mm = Process::current().mm();
	let deadline = (timeout >= 0)
		.then(|| crate::platform::platform().now_ms() + timeout as u64);
	loop {
		let mut ready = 0;
		for i in 0..nfds {
			let addr = fds.addr() + i * size_of::<PollFd>();
			let mut pfd: PollFd = mm.read_obj(addr)?;
			let mask = match fd_get(pfd.fd) {
				Ok(io) => io.poll(),
				Err(_) => POLLERR,
			};
			pfd.revents = (mask & (pfd.events as u32 | POLLERR)) as u16;
			if pfd.revents != 0 {
				ready += 1;
			}
			mm.write_obj(addr, &pfd)?;
		}
		if ready > 0 {
			return Ok(ready);
		}
		if let Some(deadline) = deadline {
			if crate::platform::platform().now_ms() >= deadline {
				return Ok(0);
			}
		}
		scheduler::yield_now();
		if signal::has_pending() {
			return Err(errno!(EINTR));
		}
	}
}

/// Readiness: error.
const POLLERR: u32 = 1 << 3;

/// `fd_manipulate` commands.
mod fcntl {
	/// Duplicate the descriptor.
	pub const F_DUPFD: u64 = 0;
	/// Get the descriptor flags.
	pub const F_GETFD: u64 = 1;
	/// Set the descriptor flags.
	pub const F_SETFD: u64 = 2;
}

#[syscall]
pub fn fd_manipulate(fd: Fd, cmd: u64, arg: usize) -> EResult<usize> {
	let process = Process::current();
	let mut fds = process.fds.lock();
	match cmd {
		fcntl::F_DUPFD => {
			let entry = fds.entry(fd)?;
			let new = fds.attach(entry.io, FdFlags::empty())?;
			Ok(new as usize)
		}
		fcntl::F_GETFD => Ok(fds.entry(fd)?.flags.bits() as usize),
		fcntl::F_SETFD => {
			fds.set_flags(fd, FdFlags::from_bits_truncate(arg as u32))?;
			Ok(0)
		}
		_ => Err(errno!(EINVAL)),
	}
}

#[syscall]
pub fn pipe(reader: UserPtr<i32>, writer: UserPtr<i32>, flags: u64) -> EResult<usize> {
	let (r, w) = Io::new_pipe_pair()?;
	let fdflags = if flags & (OpenFlags::CLOEXEC.bits() as u64) != 0 {
		FdFlags::CLOEXEC
	} else {
		FdFlags::empty()
	};
	let proc = Process::current();
	let mut fds = proc.fds.lock();
	let rfd = fds.attach(r, fdflags)?;
	let wfd = match fds.attach(w, fdflags) {
		Ok(fd) => fd,
		Err(e) => {
			let _ = fds.close(rfd);
			return Err(e);
		}
	};
	drop(fds);
	reader.write(&rfd)?;
	writer.write(&wfd)?;
	Ok(0)
}

#[syscall]
pub fn memfd_create(name: UserString, _flags: u64) -> EResult<usize> {
	let name = name.read()?;
	let io = crate::ipc::memfd::create(&name)?;
	let fd = Process::current().fds.lock().attach(io, FdFlags::empty())?;
	Ok(fd as usize)
}

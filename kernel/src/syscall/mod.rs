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

//! System call dispatch.
//!
//! Every syscall receives up to six machine words and returns one signed
//! machine word; negative values are errnos. `-ERESTARTSYS` is internal:
//! the signal layer either restarts the call or turns it into `-EINTR`
//! before userspace sees anything.

mod fs;
mod ipc;
mod mm;
mod process;
mod sync;
mod time;

use crate::{
	memory::{
		user::{UserPtr, UserSlice, UserString},
		VirtAddr,
	},
	platform::UserContext,
	process::signal::Disposition,
};
use utils::{bytes::AnyRepr, errno, errno::EResult};

/// The raw arguments of a system call.
pub type SyscallArgs = [usize; 6];

/// Conversion from a raw syscall argument.
pub trait FromSyscallArg {
	/// Converts the raw machine word.
	fn from_arg(arg: usize) -> Self;
}

impl FromSyscallArg for usize {
	fn from_arg(arg: usize) -> Self {
		arg
	}
}

impl FromSyscallArg for isize {
	fn from_arg(arg: usize) -> Self {
		arg as isize
	}
}

impl FromSyscallArg for i32 {
	fn from_arg(arg: usize) -> Self {
		arg as i32
	}
}

impl FromSyscallArg for u32 {
	fn from_arg(arg: usize) -> Self {
		arg as u32
	}
}

impl FromSyscallArg for u64 {
	fn from_arg(arg: usize) -> Self {
		arg as u64
	}
}

impl FromSyscallArg for i64 {
	fn from_arg(arg: usize) -> Self {
		arg as i64
	}
}

impl FromSyscallArg for bool {
	fn from_arg(arg: usize) -> Self {
		arg != 0
	}
}

impl FromSyscallArg for VirtAddr {
	fn from_arg(arg: usize) -> Self {
		VirtAddr(arg)
	}
}

impl<T: AnyRepr> FromSyscallArg for UserPtr<T> {
	fn from_arg(arg: usize) -> Self {
		UserPtr::from_addr(arg)
	}
}

impl FromSyscallArg for UserString {
	fn from_arg(arg: usize) -> Self {
		UserString::from_addr(arg)
	}
}

/// Builds a [`UserSlice`] from a pointer-and-length argument pair.
pub fn user_slice(addr: usize, len: usize) -> UserSlice {
	UserSlice::new(addr, len)
}

/// `*at` directory-descriptor handling.
pub mod at {
	use crate::{
		file::{fd::Fd, vfs::Dentry},
		process::Process,
	};
	use alloc::sync::Arc;
	use utils::{errno, errno::EResult};

	/// Resolve relative to the working directory.
	pub const AT_FDCWD: Fd = -100;

	/// The dentry paths resolve against for the given directory descriptor.
	pub fn base_dentry(dirfd: Fd) -> EResult<Arc<Dentry>> {
		if dirfd == AT_FDCWD {
			return Ok(Process::current().cwd.lock().clone());
		}
		let io = Process::current().fds.lock().get(dirfd)?;
		let file = io.as_file().ok_or(errno!(ENOTDIR))?;
		file.dentry.clone().ok_or(errno!(ENOTDIR))
	}
}

/// System call numbers.
pub mod nr {
	/// `fork`
	pub const FORK: usize = 1;
	/// `execveat`
	pub const EXECVEAT: usize = 2;
	/// `exit`
	pub const EXIT: usize = 3;
	/// `get_pid`
	pub const GET_PID: usize = 4;
	/// `get_parent_pid`
	pub const GET_PARENT_PID: usize = 5;
	/// `create_thread`
	pub const CREATE_THREAD: usize = 6;
	/// `thread_exit`
	pub const THREAD_EXIT: usize = 7;
	/// `wait_for_thread`
	pub const WAIT_FOR_THREAD: usize = 8;
	/// `wait_for_process`
	pub const WAIT_FOR_PROCESS: usize = 9;
	/// `yield_cpu`
	pub const YIELD_CPU: usize = 10;
	/// `get_tid`
	pub const GET_TID: usize = 11;
	/// `mmap_anonymous`
	pub const MMAP_ANONYMOUS: usize = 20;
	/// `mmap_file`
	pub const MMAP_FILE: usize = 21;
	/// `munmap`
	pub const MUNMAP: usize = 22;
	/// `vm_protect`
	pub const VM_PROTECT: usize = 23;
	/// `signal_register`
	pub const SIGNAL_REGISTER: usize = 30;
	/// `signal_process`
	pub const SIGNAL_PROCESS: usize = 31;
	/// `signal_thread`
	pub const SIGNAL_THREAD: usize = 32;
	/// `signal_return`
	pub const SIGNAL_RETURN: usize = 33;
	/// `signal_mask_op`
	pub const SIGNAL_MASK_OP: usize = 34;
	/// `vfs_openat`
	pub const VFS_OPENAT: usize = 40;
	/// `vfs_fstatat`
	pub const VFS_FSTATAT: usize = 41;
	/// `vfs_readlinkat`
	pub const VFS_READLINKAT: usize = 42;
	/// `vfs_unlinkat`
	pub const VFS_UNLINKAT: usize = 43;
	/// `vfs_mkdir`
	pub const VFS_MKDIR: usize = 44;
	/// `vfs_rmdir`
	pub const VFS_RMDIR: usize = 45;
	/// `vfs_chdirat`
	pub const VFS_CHDIRAT: usize = 46;
	/// `vfs_getcwd`
	pub const VFS_GETCWD: usize = 47;
	/// `vfs_mount`
	pub const VFS_MOUNT: usize = 48;
	/// `vfs_unmount`
	pub const VFS_UNMOUNT: usize = 49;
	/// `vfs_fsync`
	pub const VFS_FSYNC: usize = 50;
	/// `vfs_symlink`
	pub const VFS_SYMLINK: usize = 51;
	/// `vfs_list_dir`
	pub const VFS_LIST_DIR: usize = 52;
	/// `io_read`
	pub const IO_READ: usize = 60;
	/// `io_write`
	pub const IO_WRITE: usize = 61;
	/// `io_pread`
	pub const IO_PREAD: usize = 62;
	/// `io_readv`
	pub const IO_READV: usize = 63;
	/// `io_seek`
	pub const IO_SEEK: usize = 64;
	/// `io_tell`
	pub const IO_TELL: usize = 65;
	/// `io_close`
	pub const IO_CLOSE: usize = 66;
	/// `io_dup`
	pub const IO_DUP: usize = 67;
	/// `io_dup2`
	pub const IO_DUP2: usize = 68;
	/// `io_poll`
	pub const IO_POLL: usize = 69;
	/// `fd_manipulate`
	pub const FD_MANIPULATE: usize = 70;
	/// `pipe`
	pub const PIPE: usize = 71;
	/// `memfd_create`
	pub const MEMFD_CREATE: usize = 72;
	/// `ipc_create`
	pub const IPC_CREATE: usize = 80;
	/// `ipc_accept`
	pub const IPC_ACCEPT: usize = 81;
	/// `ipc_connect`
	pub const IPC_CONNECT: usize = 82;
	/// `futex_wait`
	pub const FUTEX_WAIT: usize = 90;
	/// `futex_wake`
	pub const FUTEX_WAKE: usize = 91;
	/// `clock_gettimeofday`
	pub const CLOCK_GETTIMEOFDAY: usize = 100;
	/// `clock_msleep`
	pub const CLOCK_MSLEEP: usize = 101;
	/// `poweroff`
	pub const POWEROFF: usize = 102;
	/// `kmod_load`
	pub const KMOD_LOAD: usize = 103;
}

/// Dispatches a system call, returning its raw result.
pub fn dispatch(nr: usize, args: &SyscallArgs) -> isize {
	let result: EResult<usize> = match nr {
		nr::FORK => process::fork(args),
		nr::EXECVEAT => process::execveat(args),
		nr::EXIT => process::exit(args),
		nr::GET_PID => process::get_pid(args),
		nr::GET_PARENT_PID => process::get_parent_pid(args),
		nr::CREATE_THREAD => process::create_thread(args),
		nr::THREAD_EXIT => process::thread_exit(args),
		nr::WAIT_FOR_THREAD => process::wait_for_thread(args),
		nr::WAIT_FOR_PROCESS => process::wait_for_process(args),
		nr::YIELD_CPU => process::yield_cpu(args),
		nr::GET_TID => process::get_tid(args),
		nr::MMAP_ANONYMOUS => mm::mmap_anonymous(args),
		nr::MMAP_FILE => mm::mmap_file(args),
		nr::MUNMAP => mm::munmap(args),
		nr::VM_PROTECT => mm::vm_protect(args),
		nr::SIGNAL_REGISTER => process::signal_register(args),
		nr::SIGNAL_PROCESS => process::signal_process(args),
		nr::SIGNAL_THREAD => process::signal_thread(args),
		nr::SIGNAL_MASK_OP => process::signal_mask_op(args),
		nr::VFS_OPENAT => fs::vfs_openat(args),
		nr::VFS_FSTATAT => fs::vfs_fstatat(args),
		nr::VFS_READLINKAT => fs::vfs_readlinkat(args),
		nr::VFS_UNLINKAT => fs::vfs_unlinkat(args),
		nr::VFS_MKDIR => fs::vfs_mkdir(args),
		nr::VFS_RMDIR => fs::vfs_rmdir(args),
		nr::VFS_CHDIRAT => fs::vfs_chdirat(args),
		nr::VFS_GETCWD => fs::vfs_getcwd(args),
		nr::VFS_MOUNT => fs::vfs_mount(args),
		nr::VFS_UNMOUNT => fs::vfs_unmount(args),
		nr::VFS_FSYNC => fs::vfs_fsync(args),
		nr::VFS_SYMLINK => fs::vfs_symlink(args),
		nr::VFS_LIST_DIR => fs::vfs_list_dir(args),
		nr::IO_READ => fs::io_read(args),
		nr::IO_WRITE => fs::io_write(args),
		nr::IO_PREAD => fs::io_pread(args),
		nr::IO_READV => fs::io_readv(args),
		nr::IO_SEEK => fs::io_seek(args),
		nr::IO_TELL => fs::io_tell(args),
		nr::IO_CLOSE => fs::io_close(args),
		nr::IO_DUP => fs::io_dup(args),
		nr::IO_DUP2 => fs::io_dup2(args),
		nr::IO_POLL => fs::io_poll(args),
		nr::FD_MANIPULATE => fs::fd_manipulate(args),
		nr::PIPE => fs::pipe(args),
		nr::MEMFD_CREATE => fs::memfd_create(args),
		nr::IPC_CREATE => ipc::ipc_create(args),
		nr::IPC_ACCEPT => ipc::ipc_accept(args),
		nr::IPC_CONNECT => ipc::ipc_connect(args),
		nr::FUTEX_WAIT => sync::futex_wait(args),
		nr::FUTEX_WAKE => sync::futex_wake(args),
		nr::CLOCK_GETTIMEOFDAY => time::clock_gettimeofday(args),
		nr::CLOCK_MSLEEP => time::clock_msleep(args),
		nr::POWEROFF => time::poweroff(args),
		nr::KMOD_LOAD => time::kmod_load(args),
		// `signal_return` needs the register file; routed via
		// `handle_sigreturn` by the trap code
		nr::SIGNAL_RETURN => Err(errno!(EINVAL)),
		_ => {
			pr_warn!("unknown syscall {nr}");
			Err(errno!(ENOSYS))
		}
	};
	match result {
		Ok(val) => val as isize,
		Err(e) => e.to_retval(),
	}
}

/// The syscall-return half of the trap path.
///
/// Runs the signal layer against the user context: stores the return value,
/// arranges a restart for interrupted restartable calls, and redirects into
/// a handler when a signal is deliverable.
pub fn finish(ctx: &mut UserContext, nr: usize, ret: isize) -> EResult<Disposition> {
	crate::process::signal::prepare_syscall_return(ctx, nr, ret)
}

/// Handles the `signal_return` syscall, which restores the context saved
/// before a signal handler ran.
pub fn handle_sigreturn(ctx: &mut UserContext, sp: VirtAddr) -> EResult<()> {
	*ctx = crate::process::signal::sigreturn(sp)?;
	Ok(())
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::{
		memory::paging::VmFlags,
		process::{
			mem_space::{MmapFlags, VmaContent},
			Process,
		},
		selftest,
	};
	use utils::errno;

	/// Maps a page of scratch user memory and returns its base.
	fn scratch() -> usize {
		Process::current()
			.mm()
			.map_anonymous(
				VirtAddr(0),
				MmapFlags::PRIVATE,
				VmFlags::READ | VmFlags::WRITE,
				4,
				VmaContent::Mmap,
			)
			.unwrap()
			.0
	}

	/// Writes a NUL-terminated string into user memory.
	fn put_str(addr: usize, s: &str) {
		let mm = Process::current().mm();
		mm.write_bytes(VirtAddr(addr), s.as_bytes()).unwrap();
		mm.write_obj(VirtAddr(addr + s.len()), &0u8).unwrap();
	}

	#[test]
	fn unknown_syscall_is_enosys() {
		let run = selftest::spawn_process("sys-enosys", || {
			dispatch(9999, &[0; 6])
		});
		assert_eq!(run.join(), errno!(ENOSYS).to_retval());
	}

	#[test]
	fn pid_calls() {
		let run = selftest::spawn_process("sys-pid", || {
			let pid = dispatch(nr::GET_PID, &[0; 6]);
			let tid = dispatch(nr::GET_TID, &[0; 6]);
			(pid, tid)
		});
		let (pid, tid) = run.join();
		assert!(pid > 2);
		assert!(tid > 0);
	}

	#[test]
	fn dup2_is_observationally_equivalent() {
		let run = selftest::spawn_process("sys-dup2", || {
			let u = scratch();
			put_str(u, "/dup2-file");
			let oflags = (crate::io::OpenFlags::READ
				| crate::io::OpenFlags::WRITE
				| crate::io::OpenFlags::CREATE)
				.bits() as usize;
			let fd = dispatch(nr::VFS_OPENAT, &[at::AT_FDCWD as usize, u, oflags, 0o644, 0, 0]);
			assert!(fd >= 0);
			// Write through the original descriptor
			let buf = u + 256;
			Process::current()
				.mm()
				.write_bytes(VirtAddr(buf), b"abcd")
				.unwrap();
			assert_eq!(dispatch(nr::IO_WRITE, &[fd as usize, buf, 4, 0, 0, 0]), 4);
			// Duplicate onto a chosen slot
			let newfd = dispatch(nr::IO_DUP2, &[fd as usize, 10, 0, 0, 0, 0]);
			assert_eq!(newfd, 10);
			// The duplicate shares the open file: a seek through one is
			// seen by the other
			assert_eq!(dispatch(nr::IO_SEEK, &[10, 0, 0, 0, 0, 0]), 0);
			let rbuf = u + 512;
			assert_eq!(dispatch(nr::IO_READ, &[fd as usize, rbuf, 4, 0, 0, 0]), 4);
			let mut back = [0u8; 4];
			Process::current()
				.mm()
				.read_bytes(VirtAddr(rbuf), &mut back)
				.unwrap();
			assert_eq!(&back, b"abcd");
			// Closing the original does not disturb the duplicate
			assert_eq!(dispatch(nr::IO_CLOSE, &[fd as usize, 0, 0, 0, 0, 0]), 0);
			assert_eq!(dispatch(nr::IO_SEEK, &[10, 0, 0, 0, 0, 0]), 0);
			assert_eq!(dispatch(nr::IO_READ, &[10, rbuf, 4, 0, 0, 0]), 4);
			assert_eq!(dispatch(nr::IO_CLOSE, &[10, 0, 0, 0, 0, 0]), 0);
			// Cleanup
			put_str(u, "/dup2-file");
			assert_eq!(
				dispatch(nr::VFS_UNLINKAT, &[at::AT_FDCWD as usize, u, 0, 0, 0, 0]),
				0
			);
		});
		run.join();
	}

	#[test]
	fn chdir_getcwd_roundtrip() {
		let run = selftest::spawn_process("sys-cwd", || {
			let u = scratch();
			put_str(u, "/cwd-sys");
			assert_eq!(dispatch(nr::VFS_MKDIR, &[u, 0o755, 0, 0, 0, 0]), 0);
			assert_eq!(
				dispatch(nr::VFS_CHDIRAT, &[at::AT_FDCWD as usize, u, 0, 0, 0, 0]),
				0
			);
			let buf = u + 256;
			let n = dispatch(nr::VFS_GETCWD, &[buf, 128, 0, 0, 0, 0]);
			assert!(n > 0);
			let mut cwd = alloc::vec![0u8; n as usize];
			Process::current()
				.mm()
				.read_bytes(VirtAddr(buf), &mut cwd)
				.unwrap();
			assert_eq!(&cwd, b"/cwd-sys");
			// A relative path now resolves inside the new directory
			put_str(u + 64, "sub");
			assert_eq!(dispatch(nr::VFS_MKDIR, &[u + 64, 0o755, 0, 0, 0, 0]), 0);
			put_str(u + 64, "/cwd-sys/sub");
			assert_eq!(
				dispatch(nr::VFS_RMDIR, &[u + 64, 0, 0, 0, 0, 0]),
				0
			);
		});
		run.join();
	}

	#[test]
	fn pipe_syscall_roundtrip() {
		let run = selftest::spawn_process("sys-pipe", || {
			let u = scratch();
			let rptr = u;
			let wptr = u + 8;
			assert_eq!(dispatch(nr::PIPE, &[rptr, wptr, 0, 0, 0, 0]), 0);
			let mm = Process::current().mm();
			let rfd: i32 = mm.read_obj(VirtAddr(rptr)).unwrap();
			let wfd: i32 = mm.read_obj(VirtAddr(wptr)).unwrap();
			let buf = u + 256;
			mm.write_bytes(VirtAddr(buf), b"through the pipe").unwrap();
			assert_eq!(
				dispatch(nr::IO_WRITE, &[wfd as usize, buf, 16, 0, 0, 0]),
				16
			);
			let rbuf = u + 512;
			assert_eq!(
				dispatch(nr::IO_READ, &[rfd as usize, rbuf, 16, 0, 0, 0]),
				16
			);
			let mut back = [0u8; 16];
			mm.read_bytes(VirtAddr(rbuf), &mut back).unwrap();
			assert_eq!(&back, b"through the pipe");
			assert_eq!(dispatch(nr::IO_CLOSE, &[rfd as usize, 0, 0, 0, 0, 0]), 0);
			assert_eq!(dispatch(nr::IO_CLOSE, &[wfd as usize, 0, 0, 0, 0, 0]), 0);
		});
		run.join();
	}

	#[test]
	fn bad_descriptor_is_ebadf() {
		let run = selftest::spawn_process("sys-ebadf", || {
			dispatch(nr::IO_READ, &[77, 0, 0, 0, 0, 0])
		});
		assert_eq!(run.join(), errno!(EBADF).to_retval());
	}

	#[test]
	fn memfd_syscall() {
		let run = selftest::spawn_process("sys-memfd", || {
			let u = scratch();
			put_str(u, "scratchpad");
			let fd = dispatch(nr::MEMFD_CREATE, &[u, 0, 0, 0, 0, 0]);
			assert!(fd >= 0);
			let buf = u + 256;
			Process::current()
				.mm()
				.write_bytes(VirtAddr(buf), b"anon")
				.unwrap();
			assert_eq!(dispatch(nr::IO_WRITE, &[fd as usize, buf, 4, 0, 0, 0]), 4);
			assert_eq!(dispatch(nr::IO_SEEK, &[fd as usize, 0, 0, 0, 0, 0]), 0);
			assert_eq!(dispatch(nr::IO_READ, &[fd as usize, buf, 4, 0, 0, 0]), 4);
			assert_eq!(dispatch(nr::IO_CLOSE, &[fd as usize, 0, 0, 0, 0, 0]), 0);
		});
		run.join();
	}
}

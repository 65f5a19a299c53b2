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

//! Process, thread and signal system calls.

use crate::{
	file::fd::Fd,
	memory::{
		user::{UserPtr, UserString},
		VirtAddr,
	},
	process::{
		exec,
		exec::ExecInfo,
		mem_space::{MmapFlags, VmaContent},
		pid::Pid,
		scheduler, signal,
		signal::{SaFlags, SigAction, SigHandler, Signal},
		thread,
		thread::{StackInfo, Thread, ThreadMode},
		Process,
	},
	syscall::at,
};
use alloc::{string::String, vec::Vec};
use macros::syscall;
use utils::{errno, errno::EResult, limits::PAGE_SIZE};

/// Reads a NUL-terminated array of user string pointers.
fn read_string_array(ptr: UserPtr<u64>, max: usize) -> EResult<Vec<String>> {
	let mut out = Vec::new();
	if ptr.is_null() {
		return Ok(out);
	}
	let mut addr = ptr.addr();
	while out.len() < max {
		let entry: u64 = Process::current().mm().read_obj(addr)?;
		if entry == 0 {
			return Ok(out);
		}
		out.push(UserString::from_addr(entry as usize).read()?);
		addr = addr + size_of::<u64>();
	}
	Err(errno!(EINVAL))
}

#[syscall]
pub fn fork() -> EResult<usize> {
	let current = Thread::current();
	let mut child_ctx = *current.user_ctx.lock();
	// The child observes 0 from the very same syscall
	child_ctx.retval = 0;
	let child = Process::current().fork(child_ctx)?;
	Ok(child.pid as usize)
}

#[syscall]
pub fn execveat(
	dirfd: Fd,
	path: UserString,
	argv: UserPtr<u64>,
	envp: UserPtr<u64>,
	_flags: u64,
) -> EResult<usize> {
	let path = path.read()?;
	let argv = read_string_array(argv, 1024)?;
	let envp = read_string_array(envp, 1024)?;
	let base = at::base_dentry(dirfd)?;
	let io = crate::file::vfs::open(
		&base,
		utils::collections::path::Path::new(&path),
		crate::io::OpenFlags::READ,
		0,
	)?;
	let info = ExecInfo {
		path,
		argv,
		envp,
	};
	exec::execve(&io, &info)?;
	Ok(0)
}

#[syscall]
pub fn exit(code: u32) -> EResult<usize> {
	Process::exit_current(code, None);
	Ok(0)
}

#[syscall]
pub fn get_pid() -> EResult<usize> {
	Ok(Process::current().pid as usize)
}

#[syscall]
pub fn get_parent_pid() -> EResult<usize> {
	let ppid = Process::current().parent().map(|p| p.pid).unwrap_or(0);
	Ok(ppid as usize)
}

#[syscall]
pub fn get_tid() -> EResult<usize> {
	Ok(Thread::current().tid as usize)
}

#[syscall]
pub fn create_thread(
	name: UserString,
	entry: VirtAddr,
	arg: usize,
	stack_size: usize,
	stack: VirtAddr,
) -> EResult<usize> {
	let name = if name.is_null() {
		String::from("thread")
	} else {
		name.read()?
	};
	let proc = Process::current();
	let pages = stack_size.div_ceil(PAGE_SIZE).max(1);
	let (stack_base, sp) = if stack.is_null() {
		let base = proc.mm().map_anonymous(
			VirtAddr(0),
			MmapFlags::PRIVATE,
			crate::memory::paging::VmFlags::READ | crate::memory::paging::VmFlags::WRITE,
			pages,
			VmaContent::Stack,
		)?;
		(base, base.0 + pages * PAGE_SIZE)
	} else {
		(stack, stack.0 + stack_size)
	};
	let thread = Thread::new(ThreadMode::User, &name);
	{
		let mut ctx = thread.user_ctx.lock();
		ctx.pc = entry.0;
		ctx.sp = sp & !15;
		ctx.arg0 = arg;
	}
	*thread.ustack.lock() = StackInfo {
		base: stack_base,
		pages,
	};
	proc.attach_thread(&thread);
	scheduler::add_thread(&thread);
	Ok(thread.tid as usize)
}

#[syscall]
pub fn thread_exit() -> EResult<usize> {
	thread::exit_current();
	Ok(0)
}

#[syscall]
pub fn wait_for_thread(tid: u32) -> EResult<usize> {
	let thread = thread::get(tid).ok_or(errno!(ESRCH))?;
	if thread.process().pid != Process::current().pid {
		return Err(errno!(ESRCH));
	}
	if thread::join(&thread) {
		Ok(0)
	} else {
		Err(errno!(ERESTARTSYS))
	}
}

#[syscall]
pub fn wait_for_process(pid: Pid, exit_code: UserPtr<u32>, flags: u64) -> EResult<usize> {
	/// Return immediately when no child has exited yet.
	const WNOHANG: u64 = 1;
	let selector = if pid == 0 { None } else { Some(pid) };
	let proc = Process::current();
	match proc.wait_for_child(selector, flags & WNOHANG != 0)? {
		Some((child_pid, status)) => {
			if !exit_code.is_null() {
				let encoded = status.code
					| status.signal.map(|s| (s.id() as u32) << 8).unwrap_or(0);
				exit_code.write(&encoded)?;
			}
			Ok(child_pid as usize)
		}
		None => Ok(0),
	}
}

#[syscall]
pub fn yield_cpu() -> EResult<usize> {
	scheduler::yield_now();
	Ok(0)
}

#[syscall]
pub fn signal_register(sig: usize, action: UserPtr<RawSigAction>) -> EResult<usize> {
	let sig = Signal::from_id(sig)?;
	if sig == Signal::SIGKILL {
		return Err(errno!(EINVAL));
	}
	let action = if action.is_null() {
		SigAction::default()
	} else {
		action.read()?.decode()
	};
	Process::current().signal_handlers.lock().set(sig, action);
	Ok(0)
}

/// The user-facing layout of a signal action.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct RawSigAction {
	/// Handler address; 0 is default, 1 is ignore.
	pub handler: u64,
	/// `SA_*` flags.
	pub flags: u32,
	/// Padding.
	pub _pad: u32,
}

unsafe impl utils::bytes::AnyRepr for RawSigAction {}

impl RawSigAction {
	/// Decodes into the kernel representation.
	pub fn decode(self) -> SigAction {
		let handler = match self.handler {
			0 => SigHandler::Default,
			1 => SigHandler::Ignore,
			addr => SigHandler::Handler(VirtAddr(addr as usize)),
		};
		SigAction {
			handler,
			flags: SaFlags::from_bits_truncate(self.flags),
		}
	}
}

#[syscall]
pub fn signal_process(pid: Pid, sig: usize) -> EResult<usize> {
	let sig = Signal::from_id(sig)?;
	let target = Process::get_by_pid(pid).ok_or(errno!(ESRCH))?;
	signal::send_to_process(&target, sig)?;
	Ok(0)
}

#[syscall]
pub fn signal_thread(tid: u32, sig: usize) -> EResult<usize> {
	let sig = Signal::from_id(sig)?;
	let target = thread::get(tid).ok_or(errno!(ESRCH))?;
	signal::send_to_thread(&target, sig)?;
	Ok(0)
}

#[syscall]
pub fn signal_mask_op(how: i32, set: UserPtr<u64>, oldset: UserPtr<u64>) -> EResult<usize> {
	/// Add the set to the mask.
	const SIG_BLOCK: i32 = 0;
	/// Remove the set from the mask.
	const SIG_UNBLOCK: i32 = 1;
	/// Replace the mask.
	const SIG_SETMASK: i32 = 2;
	let thread = Thread::current();
	let mut signals = thread.signals.lock();
	if !oldset.is_null() {
		oldset.write(&signals.mask.0)?;
	}
	if set.is_null() {
		return Ok(0);
	}
	let set = set.read()?;
	match how {
		SIG_BLOCK => signals.mask.0 |= set,
		SIG_UNBLOCK => signals.mask.0 &= !set,
		SIG_SETMASK => signals.mask.0 = set,
		_ => return Err(errno!(EINVAL)),
	}
	Ok(0)
}

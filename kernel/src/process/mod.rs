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

//! Processes.
//!
//! A process owns an address space, a thread list, a file descriptor table,
//! a working directory and a signal handler table. PID 1 (init) and PID 2
//! (kthreadd) are special and never exit; kthreadd shares the kernel address
//! space.

pub mod exec;
pub mod futex;
pub mod kthread;
pub mod mem_space;
pub mod pid;
pub mod scheduler;
pub mod signal;
pub mod thread;
pub mod wait;

use crate::{
	file::{fd::FdTable, vfs},
	process::{
		mem_space::MemSpace,
		pid::Pid,
		signal::{HandlerTable, Signal},
		thread::{Thread, ThreadMode},
		wait::WaitList,
	},
	sync::Mutex,
};
use alloc::{
	string::{String, ToString},
	sync::{Arc, Weak},
	vec::Vec,
};
use core::sync::atomic::{AtomicBool, Ordering::SeqCst};
use utils::{errno, errno::EResult};

/// Exit information of a dead process.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExitStatus {
	/// The code passed to `exit`.
	pub code: u32,
	/// The signal that killed the process, if any.
	pub signal: Option<Signal>,
}

/// A process.
pub struct Process {
	/// The process ID.
	pub pid: Pid,
	/// The process name.
	pub name: Mutex<String>,
	/// The parent process.
	parent: Mutex<Weak<Process>>,
	/// Child processes, reaped by `wait`.
	children: Mutex<Vec<Arc<Process>>>,
	/// The address space.
	mm: Mutex<Arc<MemSpace>>,
	/// The main thread.
	main_thread: Mutex<Option<Arc<Thread>>>,
	/// Every live thread of the process.
	threads: Mutex<Vec<Arc<Thread>>>,
	/// The file descriptor table.
	pub fds: Mutex<FdTable>,
	/// The working directory.
	pub cwd: Mutex<Arc<vfs::Dentry>>,
	/// The signal handler table.
	pub signal_handlers: Mutex<HandlerTable>,
	/// Waitlist the parent blocks on in `wait`.
	pub sigchild_waitlist: WaitList,
	/// Set once the process has exited.
	exited: AtomicBool,
	/// The exit status, once exited.
	exit_status: Mutex<Option<ExitStatus>>,
}

/// Every live process, by PID.
static PROCESSES: Mutex<alloc::collections::BTreeMap<Pid, Arc<Process>>> =
	Mutex::new(alloc::collections::BTreeMap::new());

impl Process {
	/// Creates a process with the given PID and address space, attached as a
	/// child of the current process (if any).
	pub fn new_with_pid(pid: Pid, name: &str, mm: Arc<MemSpace>) -> Arc<Self> {
		let parent = Thread::try_current()
			.map(|t| Arc::downgrade(&t.process()))
			.unwrap_or_default();
		let proc = Arc::new(Self {
			pid,
			name: Mutex::new(name.to_string()),
			parent: Mutex::new(parent),
			children: Mutex::new(Vec::new()),
			mm: Mutex::new(mm),
			main_thread: Mutex::new(None),
			threads: Mutex::new(Vec::new()),
			fds: Mutex::new(FdTable::default()),
			cwd: Mutex::new(vfs::root_dentry()),
			signal_handlers: Mutex::new(HandlerTable::default()),
			sigchild_waitlist: WaitList::new(),
			exited: AtomicBool::new(false),
			exit_status: Mutex::new(None),
		});
		if let Some(parent) = proc.parent.lock().upgrade() {
			parent.children.lock().push(proc.clone());
		}
		PROCESSES.lock().insert(pid, proc.clone());
		proc
	}

	/// Creates a process with a fresh PID.
	pub fn new(name: &str, mm: Arc<MemSpace>) -> Arc<Self> {
		Self::new_with_pid(pid::alloc_pid(), name, mm)
	}

	/// The process owning the current thread.
	pub fn current() -> Arc<Self> {
		Thread::current().process()
	}

	/// Returns the process with the given PID, if alive.
	pub fn get_by_pid(pid: Pid) -> Option<Arc<Self>> {
		PROCESSES.lock().get(&pid).cloned()
	}

	/// The process's address space.
	pub fn mm(&self) -> Arc<MemSpace> {
		self.mm.lock().clone()
	}

	/// Replaces the address space, returning the old one. Used by `execve`.
	pub fn replace_mm(&self, mm: Arc<MemSpace>) -> Arc<MemSpace> {
		core::mem::replace(&mut *self.mm.lock(), mm)
	}

	/// The parent process, if still alive.
	pub fn parent(&self) -> Option<Arc<Process>> {
		self.parent.lock().upgrade()
	}

	/// A snapshot of the process's threads.
	pub fn threads(&self) -> Vec<Arc<Thread>> {
		self.threads.lock().clone()
	}

	/// The main thread.
	pub fn main_thread(&self) -> Option<Arc<Thread>> {
		self.main_thread.lock().clone()
	}

	/// Attaches a thread to the process. The first one becomes the main
	/// thread.
	pub fn attach_thread(self: &Arc<Self>, thread: &Arc<Thread>) {
		thread.attach(self);
		let mut threads = self.threads.lock();
		threads.push(thread.clone());
		let mut main = self.main_thread.lock();
		if main.is_none() {
			*main = Some(thread.clone());
		}
	}

	/// Detaches a dead thread, returning whether it was the last one.
	pub(crate) fn detach_thread(&self, thread: &Arc<Thread>) -> bool {
		let mut threads = self.threads.lock();
		threads.retain(|t| t.tid != thread.tid);
		threads.is_empty()
	}

	/// Tells whether the process has exited.
	pub fn is_exited(&self) -> bool {
		self.exited.load(SeqCst)
	}

	/// The exit status, if the process has exited.
	pub fn exit_status(&self) -> Option<ExitStatus> {
		*self.exit_status.lock()
	}

	/// Flips the process to the exited state and notifies the parent.
	///
	/// Children are re-parented to init; the parent's sigchild waitlist is
	/// woken and it receives `SIGCHLD`.
	pub(crate) fn mark_exited(&self, code: u32, sig: Option<Signal>) {
		if self.exited.swap(true, SeqCst) {
			return;
		}
		*self.exit_status.lock() = Some(ExitStatus {
			code,
			signal: sig,
		});
		// Orphans go to init
		let children = core::mem::take(&mut *self.children.lock());
		if let Some(init) = Process::get_by_pid(pid::INIT_PID) {
			for child in children {
				*child.parent.lock() = Arc::downgrade(&init);
				init.children.lock().push(child);
			}
		}
		if let Some(parent) = self.parent() {
			parent.sigchild_waitlist.wake_all();
			if let Some(main) = parent.main_thread() {
				if main.mode == ThreadMode::User {
					let _ = signal::send_to_thread(&main, Signal::SIGCHLD);
				}
			}
		}
	}

	/// Terminates the current process.
	///
	/// Sibling threads receive `SIGKILL`, file descriptors are closed, and
	/// the current thread dies. In the hosted build the caller returns and
	/// its runner unwinds.
	pub fn exit_current(code: u32, sig: Option<Signal>) {
		let current = Thread::current();
		let proc = current.process();
		assert!(
			proc.pid != pid::INIT_PID && proc.pid != pid::KTHREADD_PID,
			"process {} must never exit",
			proc.pid
		);
		for thread in proc.threads() {
			if thread.tid != current.tid {
				let _ = signal::send_to_thread(&thread, Signal::SIGKILL);
			}
		}
		proc.fds.lock().clear();
		proc.mark_exited(code, sig);
		thread::exit_thread(&current);
	}

	/// Waits for a child to exit and reaps it.
	///
	/// With `pid` set, only that child qualifies. Returns `ERESTARTSYS` when
	/// interrupted by a signal; the signal layer translates or restarts.
	pub fn wait_for_child(
		self: &Arc<Self>,
		pid: Option<Pid>,
		nohang: bool,
	) -> EResult<Option<(Pid, ExitStatus)>> {
		loop {
			{
				let mut children = self.children.lock();
				let pos = children.iter().position(|c| match pid {
					Some(p) => c.pid == p,
					None => true,
				});
				match pos {
					None => return Err(errno!(ESRCH)),
					Some(_) => {}
				}
				// Among matching children, find one that exited
				let done = children.iter().position(|c| {
					c.is_exited()
						&& match pid {
							Some(p) => c.pid == p,
							None => true,
						}
				});
				if let Some(i) = done {
					let child = children.remove(i);
					let status = child.exit_status().unwrap();
					let child_pid = child.pid;
					PROCESSES.lock().remove(&child_pid);
					pid::free_pid(child_pid);
					return Ok(Some((child_pid, status)));
				}
			}
			if nohang {
				return Ok(None);
			}
			scheduler::reschedule_for_waitlist(&self.sigchild_waitlist);
			if signal::has_pending() {
				return Err(errno!(ERESTARTSYS));
			}
		}
	}

	/// Forks the current process.
	///
	/// The child gets a copy-on-write clone of the address space, a copy of
	/// the fd table (sharing the open IOs), the working directory and the
	/// signal handlers. Its main thread starts with the given user context.
	pub fn fork(
		self: &Arc<Self>,
		child_ctx: crate::platform::UserContext,
	) -> EResult<Arc<Process>> {
		let mm = Arc::new(self.mm().fork()?);
		let child = Process::new(&self.name.lock().clone(), mm);
		*child.fds.lock() = self.fds.lock().clone();
		// The child starts in the same directory
		let cwd = self.cwd.lock().clone();
		vfs::dentry_ref_up_to(&cwd, &vfs::root_dentry());
		*child.cwd.lock() = cwd;
		*child.signal_handlers.lock() = self.signal_handlers.lock().clone();
		let thread = Thread::new(ThreadMode::User, &self.name.lock().clone());
		*thread.user_ctx.lock() = child_ctx;
		*thread.ustack.lock() = *Thread::current().ustack.lock();
		child.attach_thread(&thread);
		scheduler::add_thread(&thread);
		Ok(child)
	}
}

impl core::fmt::Debug for Process {
	fn fmt(&self, fmt: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		write!(fmt, "[p{} '{}']", self.pid, self.name.lock())
	}
}

impl Drop for Process {
	fn drop(&mut self) {
		// Release the pin `chdir`/`fork` took on the working directory
		let cwd = self.cwd.lock().clone();
		vfs::dentry_unref_up_to(&cwd, &vfs::root_dentry());
	}
}

/// The kthreadd process.
static KTHREADD: crate::sync::OnceInit<Arc<Process>> = crate::sync::OnceInit::new();

/// Returns the kthreadd process.
pub fn kthreadd() -> Arc<Process> {
	KTHREADD.get().clone()
}

/// The `KTHREAD` init phase: elects the scheduler and creates kthreadd.
///
/// PID 1 is reserved here for init, created right after by the loader.
pub fn init() -> EResult<()> {
	scheduler::init();
	let one = pid::alloc_pid();
	assert_eq!(one, pid::INIT_PID);
	let kthreadd = Process::new("kthreadd", MemSpace::kernel());
	assert_eq!(kthreadd.pid, pid::KTHREADD_PID);
	KTHREADD.init(kthreadd);
	Ok(())
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::selftest;

	#[test]
	fn boot_made_the_special_processes() {
		selftest::ensure_booted();
		// PID 1 is init, loaded from the initrd; PID 2 is kthreadd
		let init = Process::get_by_pid(pid::INIT_PID).unwrap();
		assert_eq!(&*init.name.lock(), "init");
		assert!(init.main_thread().is_some());
		let kthreadd = Process::get_by_pid(pid::KTHREADD_PID).unwrap();
		assert_eq!(&*kthreadd.name.lock(), "kthreadd");
	}

	#[test]
	fn exit_and_wait_reaps_child() {
		let run = selftest::spawn_process("wait-parent", || {
			let parent = Process::current();
			// A child that exits with a recognizable status
			let child = selftest::spawn_process("wait-child", || {
				Process::exit_current(42, None);
			});
			let child_pid = child.proc.pid;
			let child_proc = child.proc.clone();
			assert!(Arc::ptr_eq(
				&child.proc.parent().unwrap(),
				&parent
			));
			child.join();
			let (reaped, status) = parent
				.wait_for_child(Some(child_pid), false)
				.unwrap()
				.unwrap();
			assert_eq!(reaped, child_pid);
			assert_eq!(status.code, 42);
			assert_eq!(status.signal, None);
			// The child is gone from the tables (its pid may have been
			// recycled by a concurrent test)
			if let Some(p) = Process::get_by_pid(child_pid) {
				assert!(!Arc::ptr_eq(&p, &child_proc));
			}
		});
		run.join();
	}

	#[test]
	fn wait_blocks_until_exit() {
		let run = selftest::spawn_process("wait-blocking", || {
			let parent = Process::current();
			let child = selftest::spawn_process("wait-slow-child", || {
				// Let the parent reach its wait first
				crate::platform::platform().sleep_ms(50);
				Process::exit_current(7, None);
			});
			let child_pid = child.proc.pid;
			// Blocks on the sigchild waitlist until the child exits
			let (reaped, status) =
				parent.wait_for_child(None, false).unwrap().unwrap();
			assert_eq!(reaped, child_pid);
			assert_eq!(status.code, 7);
			child.join();
		});
		run.join();
	}

	#[test]
	fn fork_clones_the_process_structure() {
		let run = selftest::spawn_process("fork-parent", || {
			let parent = Process::current();
			// Some state the child must inherit
			let (r, _w) = crate::io::Io::new_pipe_pair().unwrap();
			let fd = parent
				.fds
				.lock()
				.attach(r, crate::file::fd::FdFlags::empty())
				.unwrap();
			let mut ctx = crate::platform::UserContext::default();
			ctx.pc = 0x1234;
			ctx.retval = 0;
			let child = parent.fork(ctx).unwrap();
			// Same open IO behind the same descriptor
			let pio = parent.fds.lock().get(fd).unwrap();
			let cio = child.fds.lock().get(fd).unwrap();
			assert!(Arc::ptr_eq(&pio, &cio));
			// The child's main thread is ready to run with the given context
			let main = child.main_thread().unwrap();
			assert_eq!(main.user_ctx.lock().pc, 0x1234);
			assert_eq!(main.user_ctx.lock().retval, 0);
			// Clean up: reap the child after marking it exited
			child.mark_exited(0, None);
			crate::process::thread::exit_thread(&main);
			let _ = parent.wait_for_child(Some(child.pid), false);
		});
		run.join();
	}
}

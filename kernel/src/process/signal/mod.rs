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

//! Signal handling.
//!
//! Signals queue per-thread and are delivered only at the boundary where the
//! kernel returns to user mode: either the plain return path or the
//! syscall-return path, which additionally decides whether an interrupted
//! syscall restarts or fails with `EINTR`.

use super::{
	scheduler,
	thread::{Thread, ThreadMode},
	Process,
};
use crate::{
	memory::VirtAddr,
	platform::{self, UserContext},
};
use alloc::{collections::VecDeque, sync::Arc};
use bitflags::bitflags;
use core::mem::size_of;
use utils::{
	bytes::{as_bytes, AnyRepr},
	errno,
	errno::EResult,
	limits::SIGNAL_MAX,
};

/// A signal number.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
#[allow(clippy::upper_case_acronyms)]
pub enum Signal {
	/// Terminal interrupt.
	SIGINT = 2,
	/// Illegal instruction.
	SIGILL = 4,
	/// Trace trap.
	SIGTRAP = 5,
	/// Abort.
	SIGABRT = 6,
	/// Unblockable kill.
	SIGKILL = 9,
	/// User-defined signal 1.
	SIGUSR1 = 10,
	/// Invalid memory reference.
	SIGSEGV = 11,
	/// User-defined signal 2.
	SIGUSR2 = 12,
	/// Write to a pipe with no reader.
	SIGPIPE = 13,
	/// Termination request.
	SIGTERM = 15,
	/// Child state change.
	SIGCHLD = 17,
}

/// What the default disposition of a signal does.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DefaultAction {
	/// Terminate the process.
	Terminate,
	/// Terminate the process and dump core.
	CoreDump,
	/// Do nothing.
	Ignore,
}

impl Signal {
	/// Converts a raw signal number.
	pub fn from_id(id: usize) -> EResult<Self> {
		let sig = match id {
			2 => Self::SIGINT,
			4 => Self::SIGILL,
			5 => Self::SIGTRAP,
			6 => Self::SIGABRT,
			9 => Self::SIGKILL,
			10 => Self::SIGUSR1,
			11 => Self::SIGSEGV,
			12 => Self::SIGUSR2,
			13 => Self::SIGPIPE,
			15 => Self::SIGTERM,
			17 => Self::SIGCHLD,
			_ => return Err(errno!(EINVAL)),
		};
		Ok(sig)
	}

	/// The raw signal number.
	#[inline]
	pub fn id(self) -> u8 {
		self as u8
	}

	/// Tells whether the signal kills even when masked or sent to a kernel
	/// thread.
	pub fn is_fatal(self) -> bool {
		matches!(
			self,
			Self::SIGILL | Self::SIGTRAP | Self::SIGABRT | Self::SIGKILL | Self::SIGSEGV
		)
	}

	/// The signal's default disposition.
	pub fn default_action(self) -> DefaultAction {
		match self {
			Self::SIGILL | Self::SIGTRAP | Self::SIGABRT | Self::SIGSEGV => {
				DefaultAction::CoreDump
			}
			Self::SIGCHLD => DefaultAction::Ignore,
			_ => DefaultAction::Terminate,
		}
	}
}

/// A set of signals.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SigSet(pub u64);

impl SigSet {
	/// Adds a signal to the set.
	pub fn add(&mut self, sig: Signal) {
		self.0 |= 1 << (sig.id() - 1);
	}

	/// Removes a signal from the set.
	pub fn del(&mut self, sig: Signal) {
		self.0 &= !(1 << (sig.id() - 1));
	}

	/// Tells whether the set contains the signal.
	pub fn test(&self, sig: Signal) -> bool {
		self.0 & (1 << (sig.id() - 1)) != 0
	}
}

bitflags! {
	/// Flags of a signal action.
	#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
	pub struct SaFlags: u32 {
		/// Restart interruptible syscalls instead of failing with `EINTR`.
		const RESTART = 1 << 0;
		/// Do not mask the signal while its handler runs.
		const NODEFER = 1 << 1;
	}
}

/// The handler of a signal action.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SigHandler {
	/// The default disposition.
	#[default]
	Default,
	/// Drop the signal.
	Ignore,
	/// Jump to a userspace handler.
	Handler(VirtAddr),
}

/// The per-process action registered for one signal.
#[derive(Clone, Copy, Debug, Default)]
pub struct SigAction {
	/// The handler.
	pub handler: SigHandler,
	/// Action flags.
	pub flags: SaFlags,
}

/// The per-process signal handler table, indexed by signal number.
#[derive(Clone, Debug)]
pub struct HandlerTable(pub [SigAction; SIGNAL_MAX + 1]);

impl Default for HandlerTable {
	fn default() -> Self {
		Self([SigAction::default(); SIGNAL_MAX + 1])
	}
}

impl HandlerTable {
	/// The action for the given signal.
	pub fn get(&self, sig: Signal) -> SigAction {
		self.0[sig.id() as usize]
	}

	/// Replaces the action for the given signal.
	pub fn set(&mut self, sig: Signal, action: SigAction) {
		self.0[sig.id() as usize] = action;
	}

	/// Resets every action to the default, as `execve` requires.
	pub fn reset(&mut self) {
		self.0 = [SigAction::default(); SIGNAL_MAX + 1];
	}
}

/// Per-thread signal state.
#[derive(Debug, Default)]
pub struct SignalState {
	/// Queued signals, oldest first, deduplicated.
	pending: VecDeque<Signal>,
	/// Masked signals.
	pub mask: SigSet,
}

/// The record pushed on the user stack below the saved context, consumed by
/// `sigreturn`.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct SigreturnData {
	/// The delivered signal.
	pub signal: u32,
	/// Whether the signal was already masked before delivery.
	pub was_masked: u32,
}

unsafe impl AnyRepr for SigreturnData {}

/// Sends a signal to the given thread.
///
/// Non-fatal signals cannot be sent to kernel-mode threads.
pub fn send_to_thread(target: &Arc<Thread>, sig: Signal) -> EResult<()> {
	if target.mode == ThreadMode::Kernel && !sig.is_fatal() {
		pr_err!("cannot send non-fatal signal {sig:?} to kernel thread {target:?}");
		return Err(errno!(EINVAL));
	}
	{
		let mut signals = target.signals.lock();
		if !signals.pending.contains(&sig) {
			signals.pending.push_back(sig);
		}
	}
	let is_self = Thread::try_current()
		.map(|cur| cur.tid == target.tid)
		.unwrap_or(false);
	if !is_self {
		scheduler::wake_thread_for_signal(target);
	}
	Ok(())
}

/// Sends a signal to the given process, picking a runnable thread first and
/// a blocked one as a fallback.
///
/// Init never receives `SIGKILL`; kthreadd never receives anything.
pub fn send_to_process(target: &Arc<Process>, sig: Signal) -> EResult<()> {
	if target.pid == super::pid::INIT_PID && sig == Signal::SIGKILL {
		pr_err!("cannot send SIGKILL to init");
		return Err(errno!(EINVAL));
	}
	if target.pid == super::pid::KTHREADD_PID {
		pr_err!("cannot send signal to kthreadd");
		return Err(errno!(EINVAL));
	}
	use super::thread::ThreadState::*;
	let threads = target.threads();
	let thread = threads
		.iter()
		.find(|t| matches!(t.state(), Running | Ready | Created))
		.or_else(|| threads.iter().find(|t| t.state() == Blocked))
		.ok_or(errno!(ESRCH))?;
	send_to_thread(thread, sig)
}

/// Tells whether the current thread has a deliverable (non-masked) pending
/// signal.
pub fn has_pending() -> bool {
	let Some(thread) = Thread::try_current() else {
		return false;
	};
	let signals = thread.signals.lock();
	signals
		.pending
		.iter()
		.any(|sig| !signals.mask.test(*sig))
}

/// The result of the signal layer's work at a return-to-user boundary.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Disposition {
	/// Nothing to do; resume userspace where it was.
	None,
	/// The context was redirected into a signal handler.
	Handled(Signal),
	/// The thread (or whole process) must die with the given signal.
	Terminated(Signal),
}

/// Outcome of scanning the pending queue.
enum NextSignal {
	None,
	Deliver(Signal),
	FatalMasked(Signal),
}

/// Pops the first deliverable pending signal.
///
/// A fatal signal that is masked short-circuits: the thread dies.
fn take_next_pending(thread: &Thread) -> NextSignal {
	let mut signals = thread.signals.lock();
	let mask = signals.mask;
	for i in 0..signals.pending.len() {
		let sig = signals.pending[i];
		if mask.test(sig) {
			if sig.is_fatal() {
				pr_err!("{thread:?} received fatal signal {sig:?} while masked, terminating");
				return NextSignal::FatalMasked(sig);
			}
			continue;
		}
		signals.pending.remove(i);
		return NextSignal::Deliver(sig);
	}
	NextSignal::None
}

/// Applies the action registered for `sig` to the user context.
fn apply_action(ctx: &mut UserContext, sig: Signal, action: SigAction) -> EResult<Disposition> {
	let thread = Thread::current();
	let handler = match action.handler {
		SigHandler::Default => {
			// Init only receives signals it asked for
			if thread.process().pid == super::pid::INIT_PID && !sig.is_fatal() {
				return Ok(Disposition::None);
			}
			return match sig.default_action() {
				DefaultAction::Terminate | DefaultAction::CoreDump => {
					Ok(Disposition::Terminated(sig))
				}
				DefaultAction::Ignore => Ok(Disposition::None),
			};
		}
		SigHandler::Ignore => {
			pr_debug!(signal, "{thread:?} ignoring signal {sig:?}");
			return Ok(Disposition::None);
		}
		SigHandler::Handler(addr) => addr,
	};
	// Mask the signal while its handler runs
	let was_masked = {
		let mut signals = thread.signals.lock();
		let was = signals.mask.test(sig);
		if !was && !action.flags.contains(SaFlags::NODEFER) {
			signals.mask.add(sig);
		}
		was
	};
	// Push the saved context and the sigreturn record onto the user stack
	let data = SigreturnData {
		signal: sig.id() as u32,
		was_masked: was_masked as u32,
	};
	let frame_size = size_of::<UserContext>() + size_of::<SigreturnData>();
	let frame_sp = VirtAddr((ctx.sp - frame_size) & !15);
	let mm = thread.process().mm();
	mm.write_bytes(frame_sp, as_bytes(ctx))?;
	mm.write_bytes(frame_sp + size_of::<UserContext>(), as_bytes(&data))?;
	// Redirect into the handler
	ctx.pc = handler.0;
	ctx.sp = frame_sp.0;
	ctx.arg0 = sig.id() as usize;
	pr_debug!(signal, "{thread:?} handling signal {sig:?} at {handler:?}");
	Ok(Disposition::Handled(sig))
}

/// Signal work on the plain return-to-user path.
pub fn prepare_exit_to_user(ctx: &mut UserContext) -> EResult<Disposition> {
	let thread = Thread::current();
	let sig = match take_next_pending(&thread) {
		NextSignal::None => return Ok(Disposition::None),
		NextSignal::FatalMasked(sig) => return Ok(Disposition::Terminated(sig)),
		NextSignal::Deliver(sig) => sig,
	};
	let action = thread.process().signal_handlers.lock().get(sig);
	apply_action(ctx, sig, action)
}

/// Signal work on the syscall-return path.
///
/// Stores the syscall's return value into the context, or arranges for the
/// syscall to re-execute when it was interrupted and the action carries
/// [`SaFlags::RESTART`]. `ERESTARTSYS` never reaches userspace.
pub fn prepare_syscall_return(
	ctx: &mut UserContext,
	syscall_nr: usize,
	ret: isize,
) -> EResult<Disposition> {
	let thread = Thread::current();
	let next = take_next_pending(&thread);
	if let NextSignal::FatalMasked(sig) = next {
		return Ok(Disposition::Terminated(sig));
	}
	if ret == errno!(ERESTARTSYS).to_retval() {
		let NextSignal::Deliver(sig) = next else {
			// Nothing interrupted us after all: restart transparently
			ctx.pc -= platform::info().syscall_insn_len;
			ctx.syscall_nr = syscall_nr;
			return Ok(Disposition::None);
		};
		let action = thread.process().signal_handlers.lock().get(sig);
		if action.flags.contains(SaFlags::RESTART) {
			pr_debug!(
				signal,
				"{thread:?} will restart syscall {syscall_nr} after signal {sig:?}"
			);
			// Rewind so the syscall instruction re-executes on handler return
			ctx.pc -= platform::info().syscall_insn_len;
			ctx.syscall_nr = syscall_nr;
		} else {
			ctx.retval = errno!(EINTR).to_retval() as usize;
		}
		return apply_action(ctx, sig, action);
	}
	ctx.retval = ret as usize;
	let NextSignal::Deliver(sig) = next else {
		return Ok(Disposition::None);
	};
	let action = thread.process().signal_handlers.lock().get(sig);
	apply_action(ctx, sig, action)
}

/// Restores the context saved before a signal handler ran.
///
/// `sp` is the frame pointer passed back by userspace. If the signal was not
/// masked before delivery, it is unmasked again.
pub fn sigreturn(sp: VirtAddr) -> EResult<UserContext> {
	let thread = Thread::current();
	let mm = thread.process().mm();
	let saved: UserContext = mm.read_obj(sp)?;
	let data: SigreturnData = mm.read_obj(sp + size_of::<UserContext>())?;
	let sig = Signal::from_id(data.signal as usize)?;
	if data.was_masked == 0 {
		thread.signals.lock().mask.del(sig);
	}
	pr_debug!(signal, "{thread:?} returned from signal {sig:?}");
	Ok(saved)
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::{
		memory::paging::VmFlags,
		platform::UserContext,
		process::{
			mem_space::{MmapFlags, VmaContent},
			scheduler,
			thread::ThreadState,
			Process,
		},
		selftest,
	};
	use core::sync::atomic::{AtomicUsize, Ordering::SeqCst};
	use utils::errno;

	/// Maps a scratch user stack and returns its top.
	fn map_stack() -> VirtAddr {
		let mm = Process::current().mm();
		let base = mm
			.map_anonymous(
				VirtAddr(0),
				MmapFlags::PRIVATE,
				VmFlags::READ | VmFlags::WRITE,
				16,
				VmaContent::Stack,
			)
			.unwrap();
		base + 16 * 4096
	}

	#[test]
	fn handler_frame_and_sigreturn() {
		let run = selftest::spawn_process("sig-frame", || {
			let sp = map_stack();
			let handler = VirtAddr(0x7000_0000);
			Process::current().signal_handlers.lock().set(
				Signal::SIGUSR2,
				SigAction {
					handler: SigHandler::Handler(handler),
					flags: SaFlags::empty(),
				},
			);
			let thread = Thread::current();
			send_to_thread(&thread, Signal::SIGUSR2).unwrap();
			let mut ctx = UserContext {
				pc: 0x400200,
				sp: sp.0,
				..Default::default()
			};
			let disp = prepare_exit_to_user(&mut ctx).unwrap();
			assert_eq!(disp, Disposition::Handled(Signal::SIGUSR2));
			// Redirected into the handler, signal number in arg0
			assert_eq!(ctx.pc, handler.0);
			assert_eq!(ctx.arg0, Signal::SIGUSR2.id() as usize);
			assert_eq!(ctx.sp % 16, 0);
			// The signal is masked while the handler runs
			assert!(thread.signals.lock().mask.test(Signal::SIGUSR2));
			// Returning restores the saved context and the mask
			let restored = sigreturn(VirtAddr(ctx.sp)).unwrap();
			assert_eq!(restored.pc, 0x400200);
			assert_eq!(restored.sp, sp.0);
			assert!(!thread.signals.lock().mask.test(Signal::SIGUSR2));
		});
		run.join();
	}

	#[test]
	fn masked_nonfatal_stays_pending() {
		let run = selftest::spawn_process("sig-masked", || {
			let thread = Thread::current();
			thread.signals.lock().mask.add(Signal::SIGUSR1);
			send_to_thread(&thread, Signal::SIGUSR1).unwrap();
			let mut ctx = UserContext::default();
			// Masked: nothing is delivered
			assert_eq!(prepare_exit_to_user(&mut ctx).unwrap(), Disposition::None);
			assert!(!has_pending());
			// Unmasking makes it deliverable (default action: terminate)
			thread.signals.lock().mask.del(Signal::SIGUSR1);
			assert!(has_pending());
			assert_eq!(
				prepare_exit_to_user(&mut ctx).unwrap(),
				Disposition::Terminated(Signal::SIGUSR1)
			);
		});
		run.join();
	}

	#[test]
	fn kernel_threads_reject_nonfatal() {
		selftest::ensure_booted();
		let done = std::sync::Arc::new(AtomicUsize::new(0));
		let done2 = done.clone();
		let thread = crate::process::kthread::spawn("sig-ktest", move || {
			while done2.load(SeqCst) == 0 {
				scheduler::yield_now();
			}
		});
		assert_eq!(
			send_to_thread(&thread, Signal::SIGUSR1).unwrap_err(),
			errno!(EINVAL)
		);
		done.store(1, SeqCst);
	}

	#[test]
	fn interrupted_read_restarts_after_handler() {
		let run = selftest::spawn_process("sig-restart", || {
			let sp = map_stack();
			let handler = VirtAddr(0x7100_0000);
			Process::current().signal_handlers.lock().set(
				Signal::SIGUSR1,
				SigAction {
					handler: SigHandler::Handler(handler),
					flags: SaFlags::RESTART,
				},
			);
			let pipe = crate::file::pipe::Pipe::new(1).unwrap();
			let phase = std::sync::Arc::new(AtomicUsize::new(0));
			let reader_pipe = pipe.clone();
			let reader_phase = phase.clone();
			let reader = selftest::spawn_thread_in(
				&Process::current(),
				"sig-reader",
				move || {
					// First attempt: interrupted by SIGUSR1
					let mut buf = [0u8; 5];
					let err = reader_pipe.read(&mut buf).unwrap_err();
					assert_eq!(err, errno!(ERESTARTSYS));
					// The syscall-return boundary decides: restart
					let insn_len = crate::platform::info().syscall_insn_len;
					let mut ctx = UserContext {
						pc: 0x400000 + insn_len,
						sp: sp.0,
						..Default::default()
					};
					let disp = crate::syscall::finish(
						&mut ctx,
						crate::syscall::nr::IO_READ,
						err.to_retval(),
					)
					.unwrap();
					assert_eq!(disp, Disposition::Handled(Signal::SIGUSR1));
					assert_eq!(ctx.pc, 0x7100_0000);
					// The saved frame resumes at the syscall instruction
					let restored = sigreturn(VirtAddr(ctx.sp)).unwrap();
					assert_eq!(restored.pc, 0x400000);
					// Re-execute the read; it now yields the bytes that
					// eventually arrive
					reader_phase.store(1, SeqCst);
					let n = reader_pipe.read(&mut buf).unwrap();
					assert_eq!(&buf[..n], &b"hello"[..n]);
					n
				},
			);
			// Interrupt the first read
			while reader.thread.state() != ThreadState::Blocked {
				scheduler::yield_now();
			}
			send_to_thread(&reader.thread, Signal::SIGUSR1).unwrap();
			// Wait for the restarted read to park again, then feed it
			while phase.load(SeqCst) == 0
				|| reader.thread.state() != ThreadState::Blocked
			{
				scheduler::yield_now();
			}
			pipe.write(b"hello").unwrap();
			let n = reader.join();
			assert!(n > 0);
		});
		run.join();
	}

	#[test]
	fn sigset_basic() {
		let mut set = SigSet::default();
		set.add(Signal::SIGUSR1);
		assert!(set.test(Signal::SIGUSR1));
		assert!(!set.test(Signal::SIGUSR2));
		set.del(Signal::SIGUSR1);
		assert!(!set.test(Signal::SIGUSR1));
	}

	#[test]
	fn fatality_table() {
		assert!(Signal::SIGKILL.is_fatal());
		assert!(Signal::SIGSEGV.is_fatal());
		assert!(!Signal::SIGUSR1.is_fatal());
		assert_eq!(Signal::SIGCHLD.default_action(), DefaultAction::Ignore);
		assert_eq!(Signal::SIGSEGV.default_action(), DefaultAction::CoreDump);
	}
}

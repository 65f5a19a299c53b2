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

//! Pipes.
//!
//! A pipe is a frame-backed ring buffer with a single waitlist shared by its
//! reader and writer, plus a flag recording that the other end went away.
//! Writing to a pipe whose read end is closed raises `SIGPIPE` on the caller
//! and fails with `EPIPE`; reading from a drained pipe whose write end is
//! closed returns end-of-file.

use crate::{
	memory::ring_buffer::RingBuffer,
	process::{
		scheduler, signal,
		signal::Signal,
		thread::Thread,
		wait::WaitList,
	},
	sync::Mutex,
};
use alloc::sync::Arc;
use utils::{errno, errno::EResult};

#[derive(Debug)]
struct PipeInner {
	/// The data buffer.
	ring: RingBuffer,
	/// The other side has been closed.
	other_closed: bool,
}

/// A unidirectional byte channel with one reader and one writer.
#[derive(Debug)]
pub struct Pipe {
	inner: Mutex<PipeInner>,
	/// Readers and writers both sleep here.
	waitlist: WaitList,
}

impl Pipe {
	/// Creates a pipe with a buffer of `pages` pages.
	pub fn new(pages: usize) -> EResult<Arc<Self>> {
		Ok(Arc::new(Self {
			inner: Mutex::new(PipeInner {
				ring: RingBuffer::new(pages)?,
				other_closed: false,
			}),
			waitlist: WaitList::new(),
		}))
	}

	/// The buffer capacity in bytes.
	pub fn capacity(&self) -> usize {
		self.inner.lock().ring.capacity()
	}

	/// The number of buffered bytes.
	pub fn buffered(&self) -> usize {
		self.inner.lock().ring.len()
	}

	/// Writes the whole of `buf`, blocking whenever the buffer fills.
	///
	/// Returns the number of bytes written, which is less than `buf.len()`
	/// only when interrupted by a signal. With nothing written at all, an
	/// interruption surfaces as `ERESTARTSYS` so the syscall layer can
	/// restart; a closed read end surfaces as `SIGPIPE` + `EPIPE`.
	pub fn write(&self, buf: &[u8]) -> EResult<usize> {
		let mut total = 0;
		let mut inner = self.inner.lock();
		loop {
			if inner.other_closed {
				drop(inner);
				let _ = signal::send_to_thread(&Thread::current(), Signal::SIGPIPE);
				return Err(errno!(EPIPE));
			}
			total += inner.ring.write(&buf[total..]);
			if total == buf.len() {
				break;
			}
			// Buffer full: let readers drain, then wait
			drop(inner);
			self.waitlist.wake_all();
			scheduler::reschedule_for_waitlist(&self.waitlist);
			if signal::has_pending() {
				if total == 0 {
					return Err(errno!(ERESTARTSYS));
				}
				return Ok(total);
			}
			inner = self.inner.lock();
		}
		drop(inner);
		self.waitlist.wake_all();
		Ok(total)
	}

	/// Reads up to `buf.len()` bytes, blocking while the buffer is empty.
	///
	/// Once the write end is closed, remaining bytes are drained and then
	/// end-of-file (0) is returned.
	pub fn read(&self, buf: &mut [u8]) -> EResult<usize> {
		if buf.is_empty() {
			return Ok(0);
		}
		let mut inner = self.inner.lock();
		loop {
			let n = inner.ring.read(buf);
			if n > 0 {
				drop(inner);
				self.waitlist.wake_all();
				return Ok(n);
			}
			if inner.other_closed {
				// Drained and closed: end of file
				drop(inner);
				self.waitlist.wake_all();
				return Ok(0);
			}
			// Empty: let writers refill, then wait
			drop(inner);
			self.waitlist.wake_all();
			scheduler::reschedule_for_waitlist(&self.waitlist);
			if signal::has_pending() {
				return Err(errno!(ERESTARTSYS));
			}
			inner = self.inner.lock();
		}
	}

	/// Records that one end has been closed and wakes every sleeper.
	pub fn close_one_end(&self) {
		self.inner.lock().other_closed = true;
		self.waitlist.wake_all();
	}
}

/// One end of a pipe, embedded in an IO object.
pub struct PipeEnd {
	/// The shared pipe.
	pub pipe: Arc<Pipe>,
	/// Tells whether this is the write end.
	pub writer: bool,
}

impl Drop for PipeEnd {
	fn drop(&mut self) {
		self.pipe.close_one_end();
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::{
		process::thread::ThreadState,
		selftest,
	};
	use alloc::vec;
	use utils::limits::{PAGE_SIZE, PIPE_DEFAULT_PAGES};

	#[test]
	fn backpressure_blocks_writer() {
		let run = selftest::spawn_process("pipe-main", || {
			let pipe = Pipe::new(PIPE_DEFAULT_PAGES).unwrap();
			let capacity = pipe.capacity();
			assert_eq!(capacity, 4 * PAGE_SIZE);
			let writer_pipe = pipe.clone();
			let writer = selftest::spawn_thread_in(
				&crate::process::Process::current(),
				"pipe-writer",
				move || {
					// One page more than fits
					let data = vec![0x5au8; 5 * PAGE_SIZE];
					writer_pipe.write(&data)
				},
			);
			// The writer fills the buffer and stalls
			while writer.thread.state() != ThreadState::Blocked {
				crate::process::scheduler::yield_now();
			}
			assert_eq!(pipe.buffered(), capacity);
			// Draining one page lets it finish
			let mut buf = vec![0u8; PAGE_SIZE];
			assert_eq!(pipe.read(&mut buf).unwrap(), PAGE_SIZE);
			assert!(buf.iter().all(|b| *b == 0x5a));
			assert_eq!(writer.join().unwrap(), 5 * PAGE_SIZE);
			// Drain the rest, in order
			let mut total = 0;
			while total < 4 * PAGE_SIZE {
				total += pipe.read(&mut buf).unwrap();
			}
			assert_eq!(total, 4 * PAGE_SIZE);
		});
		run.join();
	}

	#[test]
	fn eof_after_writer_close() {
		let run = selftest::spawn_process("pipe-eof", || {
			let (r, w) = crate::io::Io::new_pipe_pair().unwrap();
			assert_eq!(w.write(b"tail").unwrap(), 4);
			drop(w);
			// Remaining bytes first, then EOF
			let mut buf = [0u8; 16];
			assert_eq!(r.read(&mut buf).unwrap(), 4);
			assert_eq!(&buf[..4], b"tail");
			assert_eq!(r.read(&mut buf).unwrap(), 0);
		});
		run.join();
	}

	#[test]
	fn write_to_closed_pipe_raises_sigpipe() {
		let run = selftest::spawn_process("pipe-epipe", || {
			let (r, w) = crate::io::Io::new_pipe_pair().unwrap();
			drop(r);
			let err = w.write(b"nobody listens").unwrap_err();
			assert_eq!(err, utils::errno!(EPIPE));
			// The writer got SIGPIPE
			let thread = Thread::current();
			let has_sigpipe = {
				let mut ctx = crate::platform::UserContext::default();
				matches!(
					signal::prepare_exit_to_user(&mut ctx).unwrap(),
					signal::Disposition::Terminated(Signal::SIGPIPE)
				)
			};
			assert!(has_sigpipe);
			drop(thread);
		});
		run.join();
	}
}

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

//! Named IPC rendezvous.
//!
//! A server registers under a name and accepts connections; each accepted
//! connection is a descriptor pairing two pipes (client→server and
//! server→client). A client may connect before the server exists: it then
//! parks on a per-name waitlist until a server of that name is created.
//!
//! Closing a server is a rendezvous, not a free: the closed state is a
//! sentinel (`pending_max == 0`, and `buffer_pages == 0` on rejected
//! descriptors) observed by blocked peers; the memory goes away with the
//! last reference.

pub mod memfd;

use crate::{
	file::pipe::Pipe,
	process::{scheduler, signal, wait::WaitList},
	sync::{Mutex, OnceInit},
};
use alloc::{
	collections::{BTreeMap, VecDeque},
	string::{String, ToString},
	sync::Arc,
	vec::Vec,
};
use core::sync::atomic::{AtomicUsize, Ordering::SeqCst};
use utils::{errno, errno::EResult, limits::PAGE_SIZE, math};

/// The two pipes of an established connection.
#[derive(Debug)]
pub struct ChannelPipes {
	/// Client writes, server reads.
	pub client_to_server: Arc<Pipe>,
	/// Server writes, client reads.
	pub server_to_client: Arc<Pipe>,
}

/// One connection on a named server.
#[derive(Debug)]
pub struct IpcDescriptor {
	/// The server's name.
	pub server_name: String,
	/// Pipe buffer size in pages. Zero is the "server closed" sentinel.
	buffer_pages: AtomicUsize,
	/// The client parks here until the server accepts.
	pub client_waitlist: WaitList,
	/// The pipes, set by `accept`.
	pipes: OnceInit<ChannelPipes>,
}

impl IpcDescriptor {
	/// The connection's pipes. Panics before `accept` succeeded.
	pub fn pipes(&self) -> &ChannelPipes {
		self.pipes.get()
	}

	/// The connection's pipes, or `None` before `accept`.
	pub fn try_pipes(&self) -> Option<&ChannelPipes> {
		self.pipes.try_get()
	}

	/// Tells whether the server rejected the connection by closing.
	pub fn is_rejected(&self) -> bool {
		self.buffer_pages.load(SeqCst) == 0
	}
}

#[derive(Debug)]
struct ServerInner {
	/// Connections waiting for `accept`.
	pending: VecDeque<Arc<IpcDescriptor>>,
	/// Maximum pending connections. Zero means the server is closed.
	pending_max: usize,
}

/// A named IPC server.
#[derive(Debug)]
pub struct IpcServer {
	/// The registered name.
	pub name: String,
	inner: Mutex<ServerInner>,
	/// `accept` parks here until a client connects.
	pub server_waitlist: WaitList,
}

/// Every registered server.
static SERVERS: Mutex<Vec<Arc<IpcServer>>> = Mutex::new(Vec::new());
/// Waitlists for clients connecting to names with no server yet.
static NAME_WAITLIST: Mutex<BTreeMap<String, Arc<WaitList>>> = Mutex::new(BTreeMap::new());

/// Initializes the IPC layer.
pub fn init() {
	// Nothing to set up besides the static tables; sysfs attaches later
}

/// Looks a server up by name.
fn get_server(name: &str) -> Option<Arc<IpcServer>> {
	SERVERS.lock().iter().find(|s| s.name == name).cloned()
}

/// The names of every live server, for `/sys/ipc/servers`.
pub fn server_names() -> Vec<String> {
	SERVERS.lock().iter().map(|s| s.name.clone()).collect()
}

/// The names currently waited on, for `/sys/ipc/name_waitlist`.
pub fn waited_names() -> Vec<String> {
	NAME_WAITLIST.lock().keys().cloned().collect()
}

/// Creates a server with the given name.
///
/// Clients already blocked in [`connect`] on that name are woken and
/// re-check.
pub fn server_create(name: &str, max_pending: usize) -> EResult<Arc<IpcServer>> {
	if name.is_empty() || max_pending == 0 {
		return Err(errno!(EINVAL));
	}
	let server = {
		let mut servers = SERVERS.lock();
		if servers.iter().any(|s| s.name == name) {
			return Err(errno!(EEXIST));
		}
		let server = Arc::new(IpcServer {
			name: name.to_string(),
			inner: Mutex::new(ServerInner {
				pending: VecDeque::new(),
				pending_max: max_pending,
			}),
			server_waitlist: WaitList::new(),
		});
		servers.push(server.clone());
		server
	};
	pr_debug!(ipc, "created ipc server '{name}' (max_pending={max_pending})");
	// Anyone who got here first may now retry
	if let Some(waitlist) = NAME_WAITLIST.lock().get(name) {
		waitlist.close();
		waitlist.wake_all();
	}
	Ok(server)
}

/// Connects to the server registered under `name`, blocking until one
/// exists and accepts.
pub fn connect(name: &str, buffer_size: usize) -> EResult<Arc<IpcDescriptor>> {
	if buffer_size == 0 {
		return Err(errno!(EINVAL));
	}
	let buffer_pages = math::align_up(buffer_size, PAGE_SIZE) / PAGE_SIZE;
	let server = loop {
		if let Some(server) = get_server(name) {
			break server;
		}
		// No server yet: park on the name
		let waitlist = NAME_WAITLIST
			.lock()
			.entry(name.to_string())
			.or_insert_with(|| Arc::new(WaitList::new()))
			.clone();
		// A closed list means the server appeared while we looked
		scheduler::reschedule_for_waitlist(&waitlist);
		if signal::has_pending() {
			return Err(errno!(EINTR));
		}
	};
	let desc = Arc::new(IpcDescriptor {
		server_name: name.to_string(),
		buffer_pages: AtomicUsize::new(buffer_pages),
		client_waitlist: WaitList::new(),
		pipes: OnceInit::new(),
	});
	{
		let mut inner = server.inner.lock();
		if inner.pending_max == 0 {
			return Err(errno!(ECONNREFUSED));
		}
		if inner.pending.len() >= inner.pending_max {
			pr_warn!("ipc server '{name}' has reached its pending limit");
			return Err(errno!(ECONNREFUSED));
		}
		inner.pending.push_back(desc.clone());
		// Queue ourselves before the server can possibly accept
		let queued = desc.client_waitlist.append();
		debug_assert!(queued);
		server.server_waitlist.wake(1);
	}
	loop {
		scheduler::block_current();
		if desc.pipes.try_get().is_some() || desc.is_rejected() {
			break;
		}
		if signal::has_pending() {
			// Give up: pull the connection back out of the pending queue
			desc.client_waitlist.remove_me();
			let mut inner = server.inner.lock();
			inner.pending.retain(|d| !Arc::ptr_eq(d, &desc));
			return Err(errno!(EINTR));
		}
		// Spurious wakeup: the entry is still queued, sleep again
	}
	desc.client_waitlist.remove_me();
	if desc.is_rejected() {
		pr_warn!("ipc server '{name}' closed while connecting");
		return Err(errno!(ECONNREFUSED));
	}
	Ok(desc)
}

/// Accepts the next pending connection on the server, blocking until a
/// client arrives.
pub fn accept(server: &Arc<IpcServer>) -> EResult<Arc<IpcDescriptor>> {
	loop {
		let desc = {
			let mut inner = server.inner.lock();
			if inner.pending_max == 0 {
				return Err(errno!(ECONNABORTED));
			}
			inner.pending.pop_front()
		};
		if let Some(desc) = desc {
			let pages = desc.buffer_pages.load(SeqCst);
			debug_assert!(pages > 0);
			desc.pipes.init(ChannelPipes {
				client_to_server: Pipe::new(pages)?,
				server_to_client: Pipe::new(pages)?,
			});
			pr_debug!(
				ipc,
				"accepted a connection on '{}' ({} pages)",
				server.name,
				pages
			);
			desc.client_waitlist.wake_all();
			return Ok(desc);
		}
		// Nothing pending: wait for a client
		scheduler::reschedule_for_waitlist(&server.server_waitlist);
		if signal::has_pending() {
			return Err(errno!(EINTR));
		}
	}
}

/// Closes a server: refuses new connections, rejects pending ones and wakes
/// everyone.
pub fn server_close(server: &Arc<IpcServer>) {
	{
		let mut servers = SERVERS.lock();
		servers.retain(|s| !Arc::ptr_eq(s, server));
	}
	// The name becomes connectable-to again (by a future server)
	if let Some(waitlist) = NAME_WAITLIST.lock().get(&server.name) {
		waitlist.reset();
	}
	let pending = {
		let mut inner = server.inner.lock();
		inner.pending_max = 0;
		core::mem::take(&mut inner.pending)
	};
	for desc in pending {
		desc.buffer_pages.store(0, SeqCst);
		desc.client_waitlist.close();
		desc.client_waitlist.wake_all();
	}
	server.server_waitlist.close();
	server.server_waitlist.wake_all();
	pr_debug!(ipc, "closed ipc server '{}'", server.name);
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::{io::Io, selftest};

	#[test]
	fn rendezvous_connect_before_create() {
		selftest::ensure_booted();
		// The client arrives first and parks on the name
		let client = selftest::spawn_process("ipc-client", || {
			let desc = connect("selftest-foo", 4096)?;
			let io = Io::new_ipc_channel(desc, false);
			io.write(b"ping")?;
			let mut buf = [0u8; 4];
			io.read(&mut buf)?;
			assert_eq!(&buf, b"pong");
			Ok::<(), utils::errno::Errno>(())
		});
		// Wait until the client is visibly parked on the name
		while !waited_names().contains(&alloc::string::String::from("selftest-foo")) {
			std::thread::yield_now();
		}
		let server = selftest::spawn_process("ipc-server", || {
			let server = server_create("selftest-foo", 1)?;
			let desc = accept(&server)?;
			let io = Io::new_ipc_channel(desc, true);
			let mut buf = [0u8; 4];
			io.read(&mut buf)?;
			assert_eq!(&buf, b"ping");
			io.write(b"pong")?;
			server_close(&server);
			Ok::<(), utils::errno::Errno>(())
		});
		server.join().unwrap();
		client.join().unwrap();
	}

	#[test]
	fn connect_to_closed_server_is_refused() {
		selftest::ensure_booted();
		let run = selftest::spawn_process("ipc-refused", || {
			let server = server_create("selftest-closing", 1)?;
			server_close(&server);
			// The name is gone; connecting again parks, so use a fresh
			// server to check the pending-limit rejection instead
			let server = server_create("selftest-closing", 1)?;
			let err = {
				let mut inner = server.inner.lock();
				inner.pending_max = 0;
				drop(inner);
				connect("selftest-closing", 4096).unwrap_err()
			};
			assert_eq!(err, utils::errno!(ECONNREFUSED));
			server_close(&server);
			Ok::<(), utils::errno::Errno>(())
		});
		run.join().unwrap();
	}

	#[test]
	fn create_duplicate_name_fails() {
		selftest::ensure_booted();
		let run = selftest::spawn_process("ipc-dup", || {
			let server = server_create("selftest-dup", 4)?;
			assert_eq!(
				server_create("selftest-dup", 4).unwrap_err(),
				utils::errno!(EEXIST)
			);
			server_close(&server);
			Ok::<(), utils::errno::Errno>(())
		});
		run.join().unwrap();
	}
}

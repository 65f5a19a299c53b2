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

//! IPC system calls.

use crate::{
	file::fd::{Fd, FdFlags},
	io::{Io, IpcIo},
	ipc,
	memory::user::UserString,
	process::Process,
};
use macros::syscall;
use utils::{errno, errno::EResult};

#[syscall]
pub fn ipc_create(name: UserString, max_pending: usize) -> EResult<usize> {
	let name = name.read()?;
	let server = ipc::server_create(&name, max_pending)?;
	let io = Io::new_ipc_listener(server);
	let fd = Process::current().fds.lock().attach(io, FdFlags::empty())?;
	Ok(fd as usize)
}

#[syscall]
pub fn ipc_accept(listen_fd: Fd) -> EResult<usize> {
	let io = Process::current().fds.lock().get(listen_fd)?;
	let Some(IpcIo::Listener(server)) = io.as_ipc() else {
		return Err(errno!(EBADF));
	};
	let desc = ipc::accept(server)?;
	let channel = Io::new_ipc_channel(desc, true);
	let fd = Process::current()
		.fds
		.lock()
		.attach(channel, FdFlags::empty())?;
	Ok(fd as usize)
}

#[syscall]
pub fn ipc_connect(name: UserString, buffer_size: usize) -> EResult<usize> {
	let name = name.read()?;
	let desc = ipc::connect(&name, buffer_size)?;
	let channel = Io::new_ipc_channel(desc, false);
	let fd = Process::current()
		.fds
		.lock()
		.attach(channel, FdFlags::empty())?;
	Ok(fd as usize)
}

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

//! Program loading and `execve`.
//!
//! ELF segments are mapped straight from the file's page cache as private
//! mappings; bss tails are zeroed through the COW machinery. The initial
//! user stack carries, from the top down: the argument and environment
//! strings, the auxiliary vector, the environment pointer array, the
//! argument pointer array and finally `argc`, with a 16-byte aligned stack
//! pointer at entry.

use crate::{
	cmdline,
	elf::{auxv, Elf64Ehdr, Elf64Phdr, ET_DYN, PF_W, PF_X, PT_INTERP, PT_LOAD},
	file::{inode::Inode, page_cache, vfs},
	io::Io,
	memory::{
		paging::VmFlags, VirtAddr, ADDR_INTERPRETER, ADDR_PIE_BASE, ADDR_USER_STACK_TOP,
	},
	platform::UserContext,
	process::{
		mem_space::{MemSpace, MmapFlags, VmaContent},
		pid,
		scheduler, signal,
		thread::{StackInfo, Thread, ThreadMode},
		Process,
	},
};
use alloc::{
	string::{String, ToString},
	sync::Arc,
	vec,
	vec::Vec,
};
use utils::{
	bytes,
	collections::path::Path,
	errno,
	errno::EResult,
	limits::PAGE_SIZE,
	math,
};

/// Number of pages of the main thread's stack.
pub const STACK_PAGES: usize = 32;

/// Arguments and environment of a program being loaded.
#[derive(Clone, Debug, Default)]
pub struct ExecInfo {
	/// The program path, as executed.
	pub path: String,
	/// Program arguments.
	pub argv: Vec<String>,
	/// Program environment.
	pub envp: Vec<String>,
}

/// Where the loader put things, feeding the auxiliary vector.
struct LoadLayout {
	/// Program entry point, biased.
	entry: VirtAddr,
	/// Address of the program headers in the image, if mapped.
	phdr: Option<VirtAddr>,
	/// Number of program headers.
	phnum: usize,
	/// Base the interpreter was loaded at, if any.
	interp_base: Option<VirtAddr>,
}

/// Reads `buf.len()` bytes at `off`, failing on a short file.
fn read_exact(inode: &Arc<Inode>, off: u64, buf: &mut [u8]) -> EResult<()> {
	let n = page_cache::read(inode, buf, off)?;
	if n != buf.len() {
		return Err(errno!(EINVAL));
	}
	Ok(())
}

/// Maps one `PT_LOAD` segment from the file.
fn map_segment(mm: &MemSpace, inode: &Arc<Inode>, phdr: &Elf64Phdr, bias: usize) -> EResult<()> {
	if phdr.p_memsz == 0 {
		return Ok(());
	}
	let vaddr = bias + phdr.p_vaddr as usize;
	let page_off = vaddr % PAGE_SIZE;
	if page_off != (phdr.p_offset as usize) % PAGE_SIZE {
		return Err(errno!(EINVAL));
	}
	let mut flags = VmFlags::READ;
	if phdr.p_flags & PF_W != 0 {
		flags |= VmFlags::WRITE;
	}
	if phdr.p_flags & PF_X != 0 {
		flags |= VmFlags::EXEC;
	}
	let map_begin = VirtAddr(math::align_down(vaddr, PAGE_SIZE));
	let file_pages = (page_off + phdr.p_filesz as usize).div_ceil(PAGE_SIZE);
	if file_pages > 0 {
		mm.map_file(
			map_begin,
			MmapFlags::PRIVATE | MmapFlags::EXACT,
			flags,
			file_pages,
			inode.clone(),
			(phdr.p_offset as usize - page_off) / PAGE_SIZE,
			VmaContent::File,
		)?;
	}
	// The bss tail: zero the remainder of the last file page, then map the
	// rest anonymously
	let file_end = vaddr + phdr.p_filesz as usize;
	let mem_end = vaddr + phdr.p_memsz as usize;
	if mem_end > file_end {
		let map_end = map_begin.0 + file_pages * PAGE_SIZE;
		let zero_end = mem_end.min(map_end);
		if zero_end > file_end && flags.contains(VmFlags::WRITE) {
			let zeros = vec![0u8; zero_end - file_end];
			mm.write_bytes(VirtAddr(file_end), &zeros)?;
		}
		if mem_end > map_end {
			let bss_pages = (mem_end - map_end).div_ceil(PAGE_SIZE);
			mm.map_anonymous(
				VirtAddr(map_end),
				MmapFlags::PRIVATE | MmapFlags::EXACT,
				flags,
				bss_pages,
				VmaContent::File,
			)?;
		}
	}
	Ok(())
}

/// Loads the ELF image into `mm`.
///
/// `allow_interp` guards the single level of `PT_INTERP` recursion.
fn load_image(
	mm: &MemSpace,
	inode: &Arc<Inode>,
	forced_bias: Option<usize>,
	allow_interp: bool,
) -> EResult<LoadLayout> {
	let ehdr: Elf64Ehdr = {
		let mut buf = [0u8; size_of::<Elf64Ehdr>()];
		read_exact(inode, 0, &mut buf)?;
		*bytes::from_bytes(&buf).ok_or(errno!(EINVAL))?
	};
	ehdr.validate()?;
	let bias = forced_bias.unwrap_or(if ehdr.e_type == ET_DYN {
		ADDR_PIE_BASE.0
	} else {
		0
	});
	// Program headers
	let mut phdrs = Vec::with_capacity(ehdr.e_phnum as usize);
	for i in 0..ehdr.e_phnum as usize {
		let mut buf = [0u8; size_of::<Elf64Phdr>()];
		let off = ehdr.e_phoff + (i * size_of::<Elf64Phdr>()) as u64;
		read_exact(inode, off, &mut buf)?;
		phdrs.push(*bytes::from_bytes::<Elf64Phdr>(&buf).ok_or(errno!(EINVAL))?);
	}
	let mut layout = LoadLayout {
		entry: VirtAddr(bias + ehdr.e_entry as usize),
		phdr: None,
		phnum: ehdr.e_phnum as usize,
		interp_base: None,
	};
	for phdr in &phdrs {
		if phdr.p_type != PT_LOAD {
			continue;
		}
		map_segment(mm, inode, phdr, bias)?;
		// Expose the program headers if this segment covers them
		let phoff = ehdr.e_phoff;
		if phoff >= phdr.p_offset && phoff < phdr.p_offset + phdr.p_filesz {
			layout.phdr = Some(VirtAddr(
				bias + (phdr.p_vaddr + (phoff - phdr.p_offset)) as usize,
			));
		}
	}
	// The interpreter, if requested
	if allow_interp {
		if let Some(interp) = phdrs.iter().find(|p| p.p_type == PT_INTERP) {
			let mut path = vec![0u8; interp.p_filesz as usize];
			read_exact(inode, interp.p_offset, &mut path)?;
			// Strip the terminating NUL
			let path = core::str::from_utf8(
				path.strip_suffix(&[0]).unwrap_or(&path),
			)
			.map_err(|_| errno!(EINVAL))?;
			let d = vfs::resolve(
				&vfs::root_dentry(),
				Path::new(path),
				vfs::ResolveFlags::FOLLOW | vfs::ResolveFlags::EXPECT_FILE,
			)?;
			let interp_inode = d.inode().ok_or(errno!(ENOENT))?;
			let sub = load_image(mm, &interp_inode, Some(ADDR_INTERPRETER.0), false)?;
			layout.entry = sub.entry;
			layout.interp_base = Some(ADDR_INTERPRETER);
		}
	}
	Ok(layout)
}

/// Builds the initial user stack, returning the stack pointer at entry.
fn build_stack(
	mm: &MemSpace,
	layout: &LoadLayout,
	info: &ExecInfo,
) -> EResult<(VirtAddr, StackInfo)> {
	let stack_base = VirtAddr(ADDR_USER_STACK_TOP.0 - STACK_PAGES * PAGE_SIZE);
	mm.map_anonymous(
		stack_base,
		MmapFlags::PRIVATE | MmapFlags::EXACT,
		VmFlags::READ | VmFlags::WRITE,
		STACK_PAGES,
		VmaContent::Stack,
	)?;
	let mut sp = ADDR_USER_STACK_TOP.0;
	let mut push_str = |s: &str| -> EResult<usize> {
		sp -= s.len() + 1;
		mm.write_bytes(VirtAddr(sp), s.as_bytes())?;
		mm.write_obj(VirtAddr(sp + s.len()), &0u8)?;
		Ok(sp)
	};
	// Strings, topmost first
	let execfn = push_str(&info.path)?;
	let mut argv_ptrs = Vec::with_capacity(info.argv.len());
	for arg in &info.argv {
		argv_ptrs.push(push_str(arg)?);
	}
	let mut envp_ptrs = Vec::with_capacity(info.envp.len());
	for env in &info.envp {
		envp_ptrs.push(push_str(env)?);
	}
	// The auxiliary vector
	let mut aux: Vec<(u64, u64)> = Vec::new();
	if let Some(phdr) = layout.phdr {
		aux.push((auxv::AT_PHDR, phdr.0 as u64));
		aux.push((auxv::AT_PHENT, size_of::<Elf64Phdr>() as u64));
		aux.push((auxv::AT_PHNUM, layout.phnum as u64));
	}
	aux.push((auxv::AT_ENTRY, layout.entry.0 as u64));
	aux.push((
		auxv::AT_BASE,
		layout.interp_base.map(|b| b.0 as u64).unwrap_or(0),
	));
	aux.push((auxv::AT_EXECFN, execfn as u64));
	aux.push((auxv::AT_PAGESZ, PAGE_SIZE as u64));
	aux.push((auxv::AT_UID, 0));
	aux.push((auxv::AT_EUID, 0));
	aux.push((auxv::AT_GID, 0));
	aux.push((auxv::AT_EGID, 0));
	aux.push((auxv::AT_NULL, 0));
	// Word-level layout: argc, argv[], NULL, envp[], NULL, auxv
	let words = 1 + argv_ptrs.len() + 1 + envp_ptrs.len() + 1 + aux.len() * 2;
	sp = math::align_down(sp - words * size_of::<u64>(), 16);
	let mut cursor = sp;
	let mut push_word = |val: u64| -> EResult<()> {
		mm.write_obj(VirtAddr(cursor), &val)?;
		cursor += size_of::<u64>();
		Ok(())
	};
	push_word(info.argv.len() as u64)?;
	for ptr in &argv_ptrs {
		push_word(*ptr as u64)?;
	}
	push_word(0)?;
	for ptr in &envp_ptrs {
		push_word(*ptr as u64)?;
	}
	push_word(0)?;
	for (tag, val) in &aux {
		push_word(*tag)?;
		push_word(*val)?;
	}
	Ok((
		VirtAddr(sp),
		StackInfo {
			base: stack_base,
			pages: STACK_PAGES,
		},
	))
}

/// Loads the program behind `io` into a fresh address space.
///
/// Returns the new space with the entry context and stack description.
pub fn load(io: &Arc<Io>, info: &ExecInfo) -> EResult<(MemSpace, UserContext, StackInfo)> {
	let inode = io.mapped_inode(false)?;
	let mm = MemSpace::new()?;
	let layout = load_image(&mm, &inode, None, true)?;
	let (sp, stack) = build_stack(&mm, &layout, info)?;
	let ctx = UserContext {
		pc: layout.entry.0,
		sp: sp.0,
		..Default::default()
	};
	Ok((mm, ctx, stack))
}

/// `execve`: replaces the current process's image in place.
///
/// Sibling threads are killed, the address space is swapped, signal
/// handlers reset to their defaults and close-on-exec descriptors closed.
pub fn execve(io: &Arc<Io>, info: &ExecInfo) -> EResult<UserContext> {
	let (mm, ctx, stack) = load(io, info)?;
	let current = Thread::current();
	let proc = current.process();
	for thread in proc.threads() {
		if thread.tid != current.tid {
			let _ = signal::send_to_thread(&thread, signal::Signal::SIGKILL);
		}
	}
	proc.replace_mm(Arc::new(mm));
	proc.signal_handlers.lock().reset();
	proc.fds.lock().close_cloexec();
	*proc.name.lock() = info.path.clone();
	*current.user_ctx.lock() = ctx;
	*current.ustack.lock() = stack;
	Ok(ctx)
}

/// Creates process 1 from the initrd.
pub fn spawn_init() -> EResult<()> {
	let path = cmdline::init_path();
	let root = vfs::root_dentry();
	let io = vfs::open(
		&root,
		Path::new(&path),
		crate::io::OpenFlags::READ,
		0,
	)?;
	let mut argv = vec![path.clone()];
	if let Some(args) = cmdline::init_args() {
		argv.extend(args.split_whitespace().map(|s| s.to_string()));
	}
	let info = ExecInfo {
		path: path.clone(),
		argv,
		envp: Vec::new(),
	};
	let (mm, ctx, stack) = load(&io, &info)?;
	let init = Process::new_with_pid(pid::INIT_PID, "init", Arc::new(mm));
	// Standard descriptors on the console
	{
		let mut fds = init.fds.lock();
		for _ in 0..3 {
			fds.attach(Io::new_console(), Default::default())?;
		}
	}
	let thread = Thread::new(ThreadMode::User, "init");
	*thread.user_ctx.lock() = ctx;
	*thread.ustack.lock() = stack;
	init.attach_thread(&thread);
	scheduler::add_thread(&thread);
	pr_info!("spawned init: {path} (pid 1, entry {:#x})", ctx.pc);
	Ok(())
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::selftest;

	/// Reads one machine word of the new process image.
	fn word(mm: &MemSpace, addr: usize) -> u64 {
		mm.read_obj(VirtAddr(addr)).unwrap()
	}

	#[test]
	fn load_maps_segments_and_builds_stack() {
		selftest::ensure_booted();
		let root = vfs::root_dentry();
		let io = vfs::open(
			&root,
			Path::new("/initrd/sbin/init"),
			crate::io::OpenFlags::READ,
			0,
		)
		.unwrap();
		let info = ExecInfo {
			path: String::from("/initrd/sbin/init"),
			argv: vec![String::from("init"), String::from("one")],
			envp: vec![String::from("TERM=mos")],
		};
		let (mm, ctx, stack) = load(&io, &info).unwrap();
		assert_eq!(ctx.pc, 0x400000);
		assert_eq!(ctx.sp % 16, 0);
		assert_eq!(stack.pages, STACK_PAGES);
		// The segment content came from the file
		let mut seg = [0u8; 8];
		mm.read_bytes(VirtAddr(0x400000), &mut seg).unwrap();
		assert_eq!(seg, [0, 1, 2, 3, 4, 5, 6, 7]);
		// The bss tail beyond the file content reads as zeros
		let mut bss = [0xffu8; 8];
		mm.read_bytes(VirtAddr(0x400100), &mut bss).unwrap();
		assert_eq!(bss, [0u8; 8]);
		// Stack block: argc, then the argv pointers, NULL, envp, NULL, auxv
		let sp = ctx.sp;
		assert_eq!(word(&mm, sp), 2);
		let argv0 = word(&mm, sp + 8) as usize;
		let argv1 = word(&mm, sp + 16) as usize;
		assert_eq!(word(&mm, sp + 24), 0);
		assert_eq!(mm.read_cstring(VirtAddr(argv0), 64).unwrap(), "init");
		assert_eq!(mm.read_cstring(VirtAddr(argv1), 64).unwrap(), "one");
		let envp0 = word(&mm, sp + 32) as usize;
		assert_eq!(word(&mm, sp + 40), 0);
		assert_eq!(mm.read_cstring(VirtAddr(envp0), 64).unwrap(), "TERM=mos");
		// The auxiliary vector terminates with AT_NULL and carries the
		// entry point
		let mut cursor = sp + 48;
		let mut saw_entry = false;
		loop {
			let tag = word(&mm, cursor);
			let val = word(&mm, cursor + 8);
			cursor += 16;
			match tag {
				crate::elf::auxv::AT_NULL => break,
				crate::elf::auxv::AT_ENTRY => {
					assert_eq!(val, 0x400000);
					saw_entry = true;
				}
				crate::elf::auxv::AT_PAGESZ => {
					assert_eq!(val, PAGE_SIZE as u64);
				}
				_ => {}
			}
		}
		assert!(saw_entry);
	}

	#[test]
	fn rejects_garbage() {
		selftest::ensure_booted();
		let root = vfs::root_dentry();
		let io = vfs::open(
			&root,
			Path::new("/initrd/etc/motd"),
			crate::io::OpenFlags::READ,
			0,
		)
		.unwrap();
		let err = load(
			&io,
			&ExecInfo {
				path: String::from("/initrd/etc/motd"),
				..Default::default()
			},
		)
		.unwrap_err();
		assert_eq!(err, utils::errno!(EINVAL));
	}

	#[test]
	fn execve_replaces_the_image() {
		let run = selftest::spawn_process("exec-replace", || {
			let proc = Process::current();
			let old_mm = proc.mm();
			// Something that must vanish across exec
			let (r, _w) = crate::io::Io::new_pipe_pair().unwrap();
			let cloexec_fd = proc
				.fds
				.lock()
				.attach(r, crate::file::fd::FdFlags::CLOEXEC)
				.unwrap();
			proc.signal_handlers.lock().set(
				signal::Signal::SIGUSR1,
				signal::SigAction {
					handler: signal::SigHandler::Handler(VirtAddr(0xdead)),
					flags: Default::default(),
				},
			);
			let root = vfs::root_dentry();
			let io = vfs::open(
				&root,
				Path::new("/initrd/sbin/init"),
				crate::io::OpenFlags::READ,
				0,
			)
			.unwrap();
			let info = ExecInfo {
				path: String::from("/initrd/sbin/init"),
				argv: vec![String::from("replaced")],
				envp: Vec::new(),
			};
			let ctx = execve(&io, &info).unwrap();
			assert_eq!(ctx.pc, 0x400000);
			// Fresh address space
			assert!(!Arc::ptr_eq(&proc.mm(), &old_mm));
			// Close-on-exec swept, handlers reset
			assert!(proc.fds.lock().get(cloexec_fd).is_err());
			let action = proc.signal_handlers.lock().get(signal::Signal::SIGUSR1);
			assert_eq!(action.handler, signal::SigHandler::Default);
			assert_eq!(&*proc.name.lock(), "/initrd/sbin/init");
		});
		run.join();
	}
}

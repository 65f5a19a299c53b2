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

//! MOS is a small monolithic kernel. This crate is its core runtime:
//! physical and virtual memory management, tasks and scheduling, signals,
//! the VFS core with pipes and IPC, and the ELF loader.
//!
//! Everything architecture-specific sits behind the [`platform`] interface.
//! The `hosted` feature backs that interface with a host OS so the whole
//! core runs under `cargo test`.
//!
//! # Features
//!
//! - `hosted`: host-backed platform implementation (enabled under test)
//! - `strace`: trace system calls to the kernel log

#![no_std]
#![allow(dead_code)]
#![feature(allocator_api)]

extern crate alloc;

#[cfg(any(test, feature = "hosted"))]
extern crate std;

#[macro_use]
pub mod print;

pub mod boot;
pub mod cmdline;
pub mod debug;
pub mod elf;
pub mod file;
pub mod io;
pub mod ipc;
pub mod logger;
pub mod memory;
pub mod panic;
pub mod platform;
pub mod power;
pub mod process;
#[cfg(any(test, feature = "hosted"))]
pub mod selftest;
pub mod sync;
pub mod syscall;

pub use utils;

/// The kernel's name.
pub const NAME: &str = "mos";
/// Current kernel version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

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

//! The kernel message log.
//!
//! Records are forwarded to the platform console. Before the platform is
//! installed, records are silently dropped.

use crate::platform;
use core::fmt;
use core::fmt::Write;
use core::sync::atomic::{AtomicU8, Ordering::Relaxed};

/// The severity of a log record.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[repr(u8)]
pub enum LogLevel {
	/// Debugging message, gated by a module toggle.
	Debug = 0,
	/// Informational message.
	Info = 1,
	/// Warning.
	Warn = 2,
	/// Error.
	Error = 3,
}

impl LogLevel {
	/// The prefix shown in front of records of this level.
	fn prefix(self) -> &'static str {
		match self {
			Self::Debug => "[debug] ",
			Self::Info => "",
			Self::Warn => "[warn] ",
			Self::Error => "[err] ",
		}
	}
}

/// Minimum level a record needs to reach the console.
static MIN_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Debug as u8);

/// Sets the minimum level written to the console.
pub fn set_min_level(level: LogLevel) {
	MIN_LEVEL.store(level as u8, Relaxed);
}

/// Adapter writing `fmt` output to the platform console.
struct ConsoleWriter;

impl Write for ConsoleWriter {
	fn write_str(&mut self, s: &str) -> fmt::Result {
		if let Some(plat) = platform::try_platform() {
			plat.console_write(s);
		}
		Ok(())
	}
}

/// Writes a raw formatted string to the console.
pub fn print_fmt(args: fmt::Arguments<'_>) {
	let _ = ConsoleWriter.write_fmt(args);
}

/// Writes a record at the given level.
pub fn log(level: LogLevel, args: fmt::Arguments<'_>) {
	if (level as u8) < MIN_LEVEL.load(Relaxed) {
		return;
	}
	let mut w = ConsoleWriter;
	let _ = w.write_str(level.prefix());
	let _ = w.write_fmt(args);
	let _ = w.write_str("\n");
}

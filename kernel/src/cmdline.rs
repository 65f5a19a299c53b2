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

//! Kernel command line parsing.
//!
//! The command line is a space-separated list of `key=value` or bare `key`
//! tokens. A table of option handlers is invoked in order of appearance;
//! unknown keys are logged and ignored.

use crate::{debug, sync::Mutex};
use alloc::string::{String, ToString};
use core::sync::atomic::{AtomicBool, Ordering::Relaxed};

/// Path of the binary loaded as process 1.
static INIT_PATH: Mutex<Option<String>> = Mutex::new(None);
/// Arguments passed to process 1.
static INIT_ARGS: Mutex<Option<String>> = Mutex::new(None);
/// Whether a kernel panic powers the machine off instead of halting.
static POWEROFF_ON_PANIC: AtomicBool = AtomicBool::new(false);
/// Name of the scheduler selected on the command line.
static SCHEDULER: Mutex<Option<String>> = Mutex::new(None);
/// Name of the console receiving the kernel log.
static KMSG_CONSOLE: Mutex<Option<String>> = Mutex::new(None);

/// One recognized command line option.
struct Option_ {
	name: &'static str,
	handler: fn(&str),
}

/// The option table. Handlers run in the order options appear on the line.
static OPTIONS: &[Option_] = &[
	Option_ {
		name: "init",
		handler: |val| *INIT_PATH.lock() = Some(val.to_string()),
	},
	Option_ {
		name: "init_args",
		handler: |val| {
			*INIT_ARGS.lock() = Some(val.trim_matches('"').to_string());
		},
	},
	Option_ {
		name: "poweroff_on_panic",
		handler: |val| POWEROFF_ON_PANIC.store(val != "0", Relaxed),
	},
	Option_ {
		name: "scheduler",
		handler: |val| *SCHEDULER.lock() = Some(val.to_string()),
	},
	Option_ {
		name: "kmsg_console",
		handler: |val| *KMSG_CONSOLE.lock() = Some(val.to_string()),
	},
];

/// Parses the kernel command line, invoking option handlers in order.
pub fn parse(line: &str) {
	for token in line.split_whitespace() {
		let (key, val) = match token.split_once('=') {
			Some((k, v)) => (k, v),
			None => (token, "1"),
		};
		if let Some(module) = key.strip_prefix("debug.") {
			debug::set_enabled(module, val != "0");
			continue;
		}
		match OPTIONS.iter().find(|o| o.name == key) {
			Some(opt) => (opt.handler)(val),
			None => pr_warn!("cmdline: unknown option '{key}'"),
		}
	}
}

/// The path of the init binary, as configured.
pub fn init_path() -> String {
	INIT_PATH
		.lock()
		.clone()
		.unwrap_or_else(|| "/initrd/sbin/init".to_string())
}

/// The arguments of the init binary, as configured.
pub fn init_args() -> Option<String> {
	INIT_ARGS.lock().clone()
}

/// Tells whether a panic should power the machine off.
pub fn poweroff_on_panic() -> bool {
	POWEROFF_ON_PANIC.load(Relaxed)
}

/// The scheduler selected on the command line, if any.
pub fn scheduler_name() -> Option<String> {
	SCHEDULER.lock().clone()
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn tokens() {
		parse("init=/initrd/bin/init debug.scheduler=1 poweroff_on_panic=1 junk=x");
		assert_eq!(init_path(), "/initrd/bin/init");
		assert!(debug::enabled("scheduler"));
		assert!(poweroff_on_panic());
		debug::set_enabled("scheduler", false);
		POWEROFF_ON_PANIC.store(false, Relaxed);
	}
}

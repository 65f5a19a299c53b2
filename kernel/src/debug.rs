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

//! Per-module debug toggles.
//!
//! Each subsystem can emit debug records gated on a named toggle. Toggles are
//! set from the command line (`debug.<module>=[0|1]`) and exposed read-write
//! under `/sys/debug/<module>`.

use crate::sync::Mutex;
use alloc::{
	collections::BTreeMap,
	string::{String, ToString},
	vec::Vec,
};

/// Toggle states, keyed by module name.
static TOGGLES: Mutex<BTreeMap<String, bool>> = Mutex::new(BTreeMap::new());

/// Tells whether debugging output is enabled for the given module.
pub fn enabled(module: &str) -> bool {
	TOGGLES.lock().get(module).copied().unwrap_or(false)
}

/// Enables or disables debugging output for the given module.
pub fn set_enabled(module: &str, enabled: bool) {
	TOGGLES.lock().insert(module.to_string(), enabled);
}

/// Returns the list of known modules with their state.
pub fn list() -> Vec<(String, bool)> {
	TOGGLES
		.lock()
		.iter()
		.map(|(name, on)| (name.clone(), *on))
		.collect()
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn toggle() {
		assert!(!enabled("selftest_toggle"));
		set_enabled("selftest_toggle", true);
		assert!(enabled("selftest_toggle"));
		set_enabled("selftest_toggle", false);
		assert!(!enabled("selftest_toggle"));
	}
}

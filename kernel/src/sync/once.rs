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

//! Explicitly-initialized globals.
//!
//! Kernel-wide singletons are initialized exactly once, in a well-defined
//! order during boot. There is no hidden lazy initialization: accessing an
//! uninitialized [`OnceInit`] is a kernel bug and panics.

use core::ops::Deref;

/// A global initialized once during boot.
#[derive(Debug)]
pub struct OnceInit<T> {
	inner: spin::Once<T>,
}

impl<T> OnceInit<T> {
	/// Creates an uninitialized instance.
	pub const fn new() -> Self {
		Self {
			inner: spin::Once::new(),
		}
	}

	/// Initializes the value. Must be called exactly once.
	pub fn init(&self, val: T) {
		assert!(
			!self.inner.is_completed(),
			"global initialized several times"
		);
		self.inner.call_once(|| val);
	}

	/// Returns the value, panicking if it has not been initialized yet.
	pub fn get(&self) -> &T {
		self.inner
			.get()
			.expect("global accessed before initialization")
	}

	/// Returns the value, or `None` if it has not been initialized yet.
	pub fn try_get(&self) -> Option<&T> {
		self.inner.get()
	}
}

impl<T> Deref for OnceInit<T> {
	type Target = T;

	fn deref(&self) -> &Self::Target {
		self.get()
	}
}

impl<T> Default for OnceInit<T> {
	fn default() -> Self {
		Self::new()
	}
}

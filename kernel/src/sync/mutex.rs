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

//! Mutual exclusion.
//!
//! A [`Mutex`] must never be held across a reschedule point. Suspending code
//! drops its locks before blocking and re-acquires them on wakeup.

use core::{
	fmt,
	ops::{Deref, DerefMut},
};

/// A kernel spinlock.
pub struct Mutex<T: ?Sized> {
	inner: spin::Mutex<T>,
}

/// A guard over a locked [`Mutex`].
pub struct MutexGuard<'m, T: ?Sized> {
	inner: spin::MutexGuard<'m, T>,
}

impl<T> Mutex<T> {
	/// Creates a new mutex wrapping `val`.
	pub const fn new(val: T) -> Self {
		Self {
			inner: spin::Mutex::new(val),
		}
	}
}

impl<T: ?Sized> Mutex<T> {
	/// Acquires the lock, spinning until it is available.
	pub fn lock(&self) -> MutexGuard<'_, T> {
		MutexGuard {
			inner: self.inner.lock(),
		}
	}

	/// Tells whether the lock is currently held.
	pub fn is_locked(&self) -> bool {
		self.inner.is_locked()
	}
}

impl<T: Default> Default for Mutex<T> {
	fn default() -> Self {
		Self::new(T::default())
	}
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Mutex<T> {
	fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.inner.try_lock() {
			Some(guard) => fmt.debug_tuple("Mutex").field(&&*guard).finish(),
			None => fmt.write_str("Mutex(<locked>)"),
		}
	}
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
	type Target = T;

	fn deref(&self) -> &Self::Target {
		&self.inner
	}
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
	fn deref_mut(&mut self) -> &mut Self::Target {
		&mut self.inner
	}
}

impl<T: ?Sized + fmt::Display> fmt::Display for MutexGuard<'_, T> {
	fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(&**self, fmt)
	}
}

/// A spinlock which would additionally mask interrupts on the local CPU while
/// held.
///
/// Interrupt masking is the platform's business; in the hosted configuration
/// this is a plain [`Mutex`]. The distinct name documents which locks may be
/// taken from interrupt context.
pub type IntMutex<T> = Mutex<T>;

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn lock_unlock() {
		let m = Mutex::new(0usize);
		*m.lock() += 1;
		assert_eq!(*m.lock(), 1);
		assert!(!m.is_locked());
	}
}

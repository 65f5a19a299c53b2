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

//! Power control.

use crate::platform;

/// Powers the machine off, or reboots it.
pub fn poweroff(reboot: bool) -> ! {
	pr_info!("system {}", if reboot { "reboot" } else { "poweroff" });
	platform::platform().poweroff(reboot)
}

/// Halts the current CPU forever.
pub fn halt() -> ! {
	platform::platform().halt()
}

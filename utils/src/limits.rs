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

//! System limits.

/// The size of a page of memory in bytes.
pub const PAGE_SIZE: usize = 4096;
/// Maximum length of a path, in bytes.
pub const PATH_MAX: usize = 4096;
/// Maximum length of a path component, in bytes.
pub const NAME_MAX: usize = 255;
/// Maximum number of symbolic links followed during one path resolution.
pub const SYMLOOP_MAX: usize = 16;
/// The number of slots in a process's file descriptor table.
pub const OPEN_MAX: usize = 64;
/// Default capacity of a pipe, in pages.
pub const PIPE_DEFAULT_PAGES: usize = 4;
/// Highest signal number.
pub const SIGNAL_MAX: usize = 32;
/// Maximum number of threads a process may own.
pub const THREAD_MAX: usize = 1024;
/// Maximum number of entries in an `iovec` array.
pub const IOV_MAX: usize = 1024;

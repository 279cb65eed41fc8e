// SPDX-FileCopyrightText: 2025 The durango contributors
// SPDX-License-Identifier: GPL-3.0-only

//! Parsers for Xbox One storage formats: XVD disk images, NAND flash dumps,
//! and savegame containers from external drives.
//!
//! Since durango is primarily an application and not a library, the semver
//! versioning covers the CLI only. All Rust APIs can change at any time, even
//! in patch releases.

pub mod cli;
pub mod format;
pub mod stream;

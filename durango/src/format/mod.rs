// SPDX-FileCopyrightText: 2025 The durango contributors
// SPDX-License-Identifier: GPL-3.0-only

pub mod drivemode;
pub mod nand;
pub mod padding;
pub mod primitive;
pub mod savegame;
pub mod updatecfg;
pub mod xbfs;
pub mod xvd;
pub mod xvi;

// SPDX-FileCopyrightText: 2025 The durango contributors
// SPDX-License-Identifier: GPL-3.0-only

#[cfg(not(windows))]
mod fuzz {
    use durango::format::{updatecfg::UpdateConfig, xbfs::XbfsTable};
    use honggfuzz::fuzz;

    pub fn main() {
        loop {
            fuzz!(|data: &[u8]| {
                if let Ok(table) = XbfsTable::parse(data) {
                    for (_, entry) in table.files() {
                        let _ = entry.byte_region().range();
                    }
                }
                let _ = UpdateConfig::parse(data);
            });
        }
    }
}

fn main() {
    #[cfg(not(windows))]
    fuzz::main();
}

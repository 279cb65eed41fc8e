// SPDX-FileCopyrightText: 2025 The durango contributors
// SPDX-License-Identifier: GPL-3.0-only

#[cfg(not(windows))]
mod fuzz {
    use durango::format::savegame;
    use honggfuzz::fuzz;

    pub fn main() {
        loop {
            fuzz!(|data: &[u8]| {
                if let Ok(index) = savegame::parse_index(data) {
                    for entry in index.entries_with_data() {
                        let _ = entry.blob_path();
                    }
                }
                let _ = savegame::parse_blob(data);
                if let Ok(s) = std::str::from_utf8(data) {
                    let _ = savegame::parse_folder_key(s);
                }
            });
        }
    }
}

fn main() {
    #[cfg(not(windows))]
    fuzz::main();
}

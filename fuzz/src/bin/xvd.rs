// SPDX-FileCopyrightText: 2025 The durango contributors
// SPDX-License-Identifier: GPL-3.0-only

#[cfg(not(windows))]
mod fuzz {
    use durango::format::{xvd::XvdHeader, xvi::XviHeader};
    use honggfuzz::fuzz;

    pub fn main() {
        loop {
            fuzz!(|data: &[u8]| {
                if let Ok(header) = XvdHeader::parse(data) {
                    let _ = header.embedded_xvd_region();
                    let _ = header.user_data_region();
                    let encoded = header.to_bytes();
                    assert_eq!(encoded, &data[..encoded.len()]);
                }
                let _ = XviHeader::parse(data);
            });
        }
    }
}

fn main() {
    #[cfg(not(windows))]
    fuzz::main();
}

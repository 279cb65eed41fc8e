// SPDX-FileCopyrightText: 2025 The durango contributors
// SPDX-License-Identifier: GPL-3.0-only

use num_traits::PrimInt;

/// Calculate the amount of padding that needs to be added to align the
/// specified offset to a page boundary.
pub fn calc<N: PrimInt>(offset: N, page_size: N) -> N {
    let r = offset % page_size;
    if r == N::zero() {
        N::zero()
    } else {
        page_size - r
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_rounding() {
        assert_eq!(calc(0u64, 4096), 0);
        assert_eq!(calc(1u64, 4096), 4095);
        assert_eq!(calc(4096u64, 4096), 0);
        assert_eq!(calc(0x1234u32, 0x1000), 0xdcc);
    }
}

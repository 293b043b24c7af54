// SPDX-License-Identifier: CEPL-1.0
//! Mip chain layout for 4x4 block-compressed images.

/// Bytes per 4x4 block in BC1.
pub const BC1_BLOCK_BYTES: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MipLevel {
    pub level: u32,
    pub width: u32,
    pub height: u32,
    /// Byte offset from the start of the payload.
    pub offset: u64,
    pub size: u64,
}

/// Number of levels down to 1x1.
pub fn full_chain_len(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

pub fn level_size(width: u32, height: u32, block_bytes: u64) -> u64 {
    let blocks_x = u64::from(width.div_ceil(4));
    let blocks_y = u64::from(height.div_ceil(4));
    blocks_x * blocks_y * block_bytes
}

/// Levels in descending resolution order, each packed right after the previous.
pub fn mip_chain(width: u32, height: u32, count: u32, block_bytes: u64) -> Vec<MipLevel> {
    let mut offset = 0;
    (0..count)
        .map(|level| {
            let w = (width >> level).max(1);
            let h = (height >> level).max(1);
            let size = level_size(w, h, block_bytes);
            let mip = MipLevel {
                level,
                width: w,
                height: h,
                offset,
                size,
            };
            offset += size;
            mip
        })
        .collect()
}

pub fn total_size(chain: &[MipLevel]) -> u64 {
    chain.iter().map(|m| m.size).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bc1_256_eight_levels() {
        let chain = mip_chain(256, 256, 8, BC1_BLOCK_BYTES);
        let sizes: Vec<u64> = chain.iter().map(|m| m.size).collect();
        assert_eq!(sizes, [32768, 8192, 2048, 512, 128, 32, 8, 8]);
        assert_eq!(total_size(&chain), 43696);

        let closed: u64 = (0..8)
            .map(|i| {
                let w = (256u64 >> i).max(1);
                w.div_ceil(4) * w.div_ceil(4) * 8
            })
            .sum();
        assert_eq!(total_size(&chain), closed);
    }

    #[test]
    fn offsets_are_running_sums() {
        let chain = mip_chain(64, 32, 4, BC1_BLOCK_BYTES);
        let mut expected = 0;
        for mip in &chain {
            assert_eq!(mip.offset, expected);
            expected += mip.size;
        }
        assert_eq!(chain[3].width, 8);
        assert_eq!(chain[3].height, 4);
    }

    #[test]
    fn non_square_levels_clamp_to_one() {
        let chain = mip_chain(8, 2, 4, BC1_BLOCK_BYTES);
        assert_eq!((chain[2].width, chain[2].height), (2, 1));
        assert_eq!((chain[3].width, chain[3].height), (1, 1));
        assert!(chain.iter().skip(1).all(|m| m.size == 8));
    }

    #[test]
    fn chain_length() {
        assert_eq!(full_chain_len(256, 256), 9);
        assert_eq!(full_chain_len(300, 20), 9);
        assert_eq!(full_chain_len(1, 1), 1);
    }
}

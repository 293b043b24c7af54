// SPDX-License-Identifier: CEPL-1.0
//! DDS container holding a BC1 (DXT1) mip chain.

use crate::error::AssetError;
use crate::mip::{full_chain_len, mip_chain, total_size, MipLevel, BC1_BLOCK_BYTES};

const MAGIC: &[u8; 4] = b"DDS ";
const HEADER_SIZE: u32 = 124;
const PIXEL_FORMAT_SIZE: u32 = 32;
const DXT1: &[u8; 4] = b"DXT1";

// Offsets into the 124-byte header, which starts right after the magic.
const OFF_SIZE: usize = 0;
const OFF_HEIGHT: usize = 8;
const OFF_WIDTH: usize = 12;
const OFF_MIP_COUNT: usize = 24;
const OFF_PF_SIZE: usize = 72;
const OFF_PF_FOURCC: usize = 80;

/// A validated header plus the payload slice covering every mip level.
#[derive(Debug, Clone)]
pub struct DdsTexture<'a> {
    pub width: u32,
    pub height: u32,
    pub mips: Vec<MipLevel>,
    pub payload: &'a [u8],
}

impl<'a> DdsTexture<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, AssetError> {
        let data_start = MAGIC.len() + HEADER_SIZE as usize;
        if bytes.len() < data_start {
            return Err(AssetError::Truncated {
                expected: data_start,
                actual: bytes.len(),
            });
        }
        if &bytes[..4] != MAGIC {
            return Err(AssetError::BadMagic);
        }

        let header = &bytes[MAGIC.len()..data_start];
        let header_size = field(header, OFF_SIZE);
        let pf_size = field(header, OFF_PF_SIZE);
        if header_size != HEADER_SIZE || pf_size != PIXEL_FORMAT_SIZE {
            return Err(AssetError::BadHeaderSize {
                header: header_size,
                pixel_format: pf_size,
            });
        }

        let mut four_cc = [0u8; 4];
        four_cc.copy_from_slice(&header[OFF_PF_FOURCC..OFF_PF_FOURCC + 4]);
        if &four_cc != DXT1 {
            return Err(AssetError::UnsupportedFormat { four_cc });
        }

        let width = field(header, OFF_WIDTH);
        let height = field(header, OFF_HEIGHT);
        if width == 0 || height == 0 {
            return Err(AssetError::ZeroExtent);
        }

        let mip_count = field(header, OFF_MIP_COUNT).clamp(1, full_chain_len(width, height));
        let mips = mip_chain(width, height, mip_count, BC1_BLOCK_BYTES);
        let total = total_size(&mips) as usize;

        let data = &bytes[data_start..];
        if data.len() < total {
            return Err(AssetError::Truncated {
                expected: data_start + total,
                actual: bytes.len(),
            });
        }

        tracing::debug!(width, height, mip_count, bytes = total, "parsed DXT1 texture");
        Ok(Self {
            width,
            height,
            mips,
            payload: &data[..total],
        })
    }

    pub fn mip_count(&self) -> u32 {
        self.mips.len() as u32
    }
}

fn field(header: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([header[at], header[at + 1], header[at + 2], header[at + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dds(width: u32, height: u32, mips: u32, four_cc: &[u8; 4], payload: usize) -> Vec<u8> {
        let mut header = [0u32; 31];
        header[0] = HEADER_SIZE;
        header[1] = 0x0002_1007;
        header[2] = height;
        header[3] = width;
        header[6] = mips;
        header[18] = PIXEL_FORMAT_SIZE;
        header[19] = 0x4;
        header[20] = u32::from_le_bytes(*four_cc);
        header[26] = 0x0040_1008;

        let mut out = MAGIC.to_vec();
        for word in header {
            out.extend_from_slice(&word.to_le_bytes());
        }
        out.extend((0..payload).map(|i| (i % 251) as u8));
        out
    }

    #[test]
    fn parses_full_chain() {
        let file = dds(256, 256, 8, DXT1, 43696);
        let tex = DdsTexture::parse(&file).unwrap();
        assert_eq!((tex.width, tex.height), (256, 256));
        assert_eq!(tex.mip_count(), 8);
        assert_eq!(tex.payload.len(), 43696);
        assert_eq!(tex.payload[0], 0);
        assert_eq!(tex.mips[1].offset, 32768);
    }

    #[test]
    fn zero_mip_count_means_one() {
        let file = dds(16, 16, 0, DXT1, 128);
        let tex = DdsTexture::parse(&file).unwrap();
        assert_eq!(tex.mip_count(), 1);
        assert_eq!(tex.payload.len(), 128);
    }

    #[test]
    fn mip_count_clamps_to_chain() {
        let file = dds(4, 4, 12, DXT1, 64);
        let tex = DdsTexture::parse(&file).unwrap();
        assert_eq!(tex.mip_count(), 3);
        assert_eq!(tex.payload.len(), 24);
    }

    #[test]
    fn rejects_other_formats() {
        let file = dds(16, 16, 1, b"DXT5", 256);
        match DdsTexture::parse(&file) {
            Err(AssetError::UnsupportedFormat { four_cc }) => assert_eq!(&four_cc, b"DXT5"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_magic_and_sizes() {
        let mut file = dds(16, 16, 1, DXT1, 128);
        file[0] = b'X';
        assert!(matches!(DdsTexture::parse(&file), Err(AssetError::BadMagic)));

        let mut file = dds(16, 16, 1, DXT1, 128);
        file[4] = 100;
        assert!(matches!(
            DdsTexture::parse(&file),
            Err(AssetError::BadHeaderSize { header: 100, .. })
        ));
    }

    #[test]
    fn rejects_zero_extent_and_short_payload() {
        assert!(matches!(
            DdsTexture::parse(&dds(0, 16, 1, DXT1, 128)),
            Err(AssetError::ZeroExtent)
        ));
        assert!(matches!(
            DdsTexture::parse(&dds(16, 16, 1, DXT1, 127)),
            Err(AssetError::Truncated { .. })
        ));
        assert!(matches!(
            DdsTexture::parse(b"DDS "),
            Err(AssetError::Truncated { expected: 128, actual: 4 })
        ));
    }
}

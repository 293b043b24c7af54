// SPDX-License-Identifier: CEPL-1.0
//! Compiled mesh files: `vertex_bytes: u32`, `index_bytes: u32` (both LE),
//! then the vertex block, then the u32 index block.

use crate::error::AssetError;

/// Bytes per vertex: half-float position, snorm8 normal, half-float uv.
pub const VERTEX_STRIDE: usize = 16;

const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy)]
pub struct MeshData<'a> {
    pub vertices: &'a [u8],
    pub indices: &'a [u8],
}

impl<'a> MeshData<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, AssetError> {
        if bytes.len() < HEADER_LEN {
            return Err(AssetError::Truncated {
                expected: HEADER_LEN,
                actual: bytes.len(),
            });
        }
        let vertex_len = read_u32(bytes, 0) as usize;
        let index_len = read_u32(bytes, 4) as usize;

        if vertex_len == 0 || index_len == 0 {
            return Err(AssetError::EmptyMesh);
        }
        if index_len % 4 != 0 {
            return Err(AssetError::MisalignedIndices(index_len));
        }

        let expected = HEADER_LEN
            .checked_add(vertex_len)
            .and_then(|n| n.checked_add(index_len))
            .ok_or(AssetError::Truncated {
                expected: usize::MAX,
                actual: bytes.len(),
            })?;
        if bytes.len() < expected {
            return Err(AssetError::Truncated {
                expected,
                actual: bytes.len(),
            });
        }

        let (vertices, rest) = bytes[HEADER_LEN..].split_at(vertex_len);
        Ok(Self {
            vertices,
            indices: &rest[..index_len],
        })
    }

    pub fn index_count(&self) -> u32 {
        (self.indices.len() / 4) as u32
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / VERTEX_STRIDE
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mesh_file(vertex_len: u32, index_len: u32) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&vertex_len.to_le_bytes());
        out.extend_from_slice(&index_len.to_le_bytes());
        out.extend((0..vertex_len).map(|i| i as u8));
        for i in 0..index_len / 4 {
            out.extend_from_slice(&i.to_le_bytes());
        }
        out
    }

    #[test]
    fn sixty_four_vertex_bytes_twelve_index_bytes() {
        let file = mesh_file(64, 12);
        let mesh = MeshData::parse(&file).unwrap();
        assert_eq!(mesh.index_count(), 3);
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.vertices.len(), 64);
        assert_eq!(mesh.indices, &[0, 0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0]);
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let mut file = mesh_file(16, 4);
        file.extend_from_slice(&[0xFF; 7]);
        let mesh = MeshData::parse(&file).unwrap();
        assert_eq!(mesh.indices.len(), 4);
    }

    #[test]
    fn short_payload_is_truncated() {
        let mut file = mesh_file(64, 12);
        file.truncate(file.len() - 1);
        match MeshData::parse(&file) {
            Err(AssetError::Truncated { expected, actual }) => {
                assert_eq!(expected, 84);
                assert_eq!(actual, 83);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn short_header_is_truncated() {
        assert!(matches!(
            MeshData::parse(&[1, 0, 0]),
            Err(AssetError::Truncated { expected: 8, actual: 3 })
        ));
    }

    #[test]
    fn rejects_empty_and_misaligned() {
        assert!(matches!(
            MeshData::parse(&mesh_file(0, 12)),
            Err(AssetError::EmptyMesh)
        ));
        let mut file = mesh_file(16, 8);
        file[4] = 6;
        assert!(matches!(
            MeshData::parse(&file),
            Err(AssetError::MisalignedIndices(6))
        ));
    }
}

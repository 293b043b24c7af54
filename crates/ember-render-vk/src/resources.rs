// SPDX-License-Identifier: CEPL-1.0
//! Engine-owned GPU assets addressed by typed handles.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::device::Gpu;
use crate::error::{Result, VkError};
use crate::mesh::GpuMesh;
use crate::texture::Texture;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshHandle(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(u32);

/// Append-only storage; indices are never reused while the table lives.
#[derive(Debug)]
struct Slots<T> {
    items: Vec<T>,
}

impl<T> Default for Slots<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T> Slots<T> {
    fn push(&mut self, item: T) -> u32 {
        self.items.push(item);
        (self.items.len() - 1) as u32
    }

    fn get(&self, index: u32) -> Option<&T> {
        self.items.get(index as usize)
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn drain(&mut self) -> std::vec::Drain<'_, T> {
        self.items.drain(..)
    }
}

#[derive(Default)]
pub struct ResourceTable {
    meshes: Slots<GpuMesh>,
    textures: Slots<Texture>,
    by_path: HashMap<PathBuf, TextureHandle>,
}

impl ResourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_mesh(&mut self, mesh: GpuMesh) -> MeshHandle {
        MeshHandle(self.meshes.push(mesh))
    }

    pub fn mesh(&self, handle: MeshHandle) -> Result<&GpuMesh> {
        self.meshes.get(handle.0).ok_or(VkError::UnknownHandle("mesh"))
    }

    /// Registers a texture loaded from `path`; later lookups of the same path share it.
    pub fn insert_texture(&mut self, path: &Path, texture: Texture) -> TextureHandle {
        let handle = TextureHandle(self.textures.push(texture));
        self.by_path.insert(path.to_path_buf(), handle);
        handle
    }

    pub fn cached_texture(&self, path: &Path) -> Option<TextureHandle> {
        self.by_path.get(path).copied()
    }

    pub fn texture(&self, handle: TextureHandle) -> Result<&Texture> {
        self.textures
            .get(handle.0)
            .ok_or(VkError::UnknownHandle("texture"))
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    /// Frees every asset. The caller has waited for the device to go idle.
    pub fn destroy_all(&mut self, gpu: &Gpu) {
        let (meshes, textures) = (self.meshes.len(), self.textures.len());
        for mesh in self.meshes.drain() {
            mesh.destroy(gpu);
        }
        for texture in self.textures.drain() {
            texture.destroy(gpu);
        }
        self.by_path.clear();
        tracing::debug!(meshes, textures, "resources released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_hand_out_sequential_indices() {
        let mut slots = Slots::default();
        assert_eq!(slots.push("a"), 0);
        assert_eq!(slots.push("b"), 1);
        assert_eq!(slots.get(1), Some(&"b"));
        assert_eq!(slots.get(2), None);
        assert_eq!(slots.drain().count(), 2);
        assert_eq!(slots.len(), 0);
    }

    #[test]
    fn empty_table_rejects_handles() {
        let table = ResourceTable::new();
        assert!(matches!(
            table.mesh(MeshHandle(0)),
            Err(VkError::UnknownHandle("mesh"))
        ));
        assert!(matches!(
            table.texture(TextureHandle(3)),
            Err(VkError::UnknownHandle("texture"))
        ));
        assert!(table.cached_texture(Path::new("a.dds")).is_none());
        assert_eq!((table.mesh_count(), table.texture_count()), (0, 0));
    }
}

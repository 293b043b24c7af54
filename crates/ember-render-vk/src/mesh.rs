// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use ember_render::MeshData;
use gpu_allocator::MemoryLocation;

use crate::device::{Gpu, GpuBuffer};
use crate::error::Result;

/// Vertex and index buffers in host-visible memory.
pub struct GpuMesh {
    pub vertices: GpuBuffer,
    pub indices: GpuBuffer,
    pub index_count: u32,
}

impl GpuMesh {
    pub fn upload(gpu: &Gpu, mesh: &MeshData<'_>, name: &str) -> Result<Self> {
        let vertices = upload_buffer(gpu, mesh.vertices, vk::BufferUsageFlags::VERTEX_BUFFER, name)?;
        let indices =
            match upload_buffer(gpu, mesh.indices, vk::BufferUsageFlags::INDEX_BUFFER, name) {
                Ok(b) => b,
                Err(e) => {
                    gpu.destroy_buffer(vertices);
                    return Err(e);
                }
            };

        tracing::debug!(
            name,
            vertices = mesh.vertex_count(),
            indices = mesh.index_count(),
            "mesh uploaded"
        );
        Ok(Self {
            vertices,
            indices,
            index_count: mesh.index_count(),
        })
    }

    pub fn destroy(self, gpu: &Gpu) {
        gpu.destroy_buffer(self.vertices);
        gpu.destroy_buffer(self.indices);
    }
}

fn upload_buffer(
    gpu: &Gpu,
    bytes: &[u8],
    usage: vk::BufferUsageFlags,
    name: &str,
) -> Result<GpuBuffer> {
    let mut buf = gpu.create_buffer(
        bytes.len() as vk::DeviceSize,
        usage,
        MemoryLocation::CpuToGpu,
        name,
    )?;
    if let Err(e) = buf.write(bytes) {
        gpu.destroy_buffer(buf);
        return Err(e);
    }
    Ok(buf)
}

// SPDX-License-Identifier: CEPL-1.0
//! BC1 texture upload through a host-visible staging buffer.

use ash::vk;
use ember_render::{DdsTexture, MipLevel};
use gpu_allocator::MemoryLocation;

use crate::device::{Gpu, GpuImage};
use crate::error::{Result, VkError};
use crate::error::VkResultExt;

pub struct Texture {
    pub image: GpuImage,
    pub view: vk::ImageView,
    pub sampler: vk::Sampler,
    pub extent: vk::Extent2D,
    pub mip_count: u32,
}

/// One buffer-to-image copy per mip level, reading at each level's payload offset.
pub fn copy_regions(mips: &[MipLevel]) -> Vec<vk::BufferImageCopy> {
    mips.iter()
        .map(|m| vk::BufferImageCopy {
            buffer_offset: m.offset,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: m.level,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: vk::Extent3D {
                width: m.width,
                height: m.height,
                depth: 1,
            },
        })
        .collect()
}

fn full_range(mip_count: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: mip_count,
        base_array_layer: 0,
        layer_count: 1,
    }
}

impl Texture {
    /// Uploads every mip level and leaves the image shader-readable.
    /// Blocks until the copy has finished.
    pub fn upload(gpu: &Gpu, dds: &DdsTexture<'_>, name: &str) -> Result<Self> {
        if !gpu.supports_bc {
            return Err(VkError::Unsupported(
                "adapter lacks BC texture compression".into(),
            ));
        }

        let mip_count = dds.mip_count();
        let extent = vk::Extent2D {
            width: dds.width,
            height: dds.height,
        };

        let mut staging = gpu.create_buffer(
            dds.payload.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            "texture staging",
        )?;
        if let Err(e) = staging.write(dds.payload) {
            gpu.destroy_buffer(staging);
            return Err(e);
        }

        let img_ci = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format: vk::Format::BC1_RGBA_UNORM_BLOCK,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            mip_levels: mip_count,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let image = match gpu.create_image(&img_ci, MemoryLocation::GpuOnly, name) {
            Ok(img) => img,
            Err(e) => {
                gpu.destroy_buffer(staging);
                return Err(e);
            }
        };

        let regions = copy_regions(&dds.mips);
        let (src, dst) = (staging.buffer, image.image);
        let copied = gpu.one_shot(|device, cmd| {
            let to_dst = vk::ImageMemoryBarrier2 {
                s_type: vk::StructureType::IMAGE_MEMORY_BARRIER_2,
                src_stage_mask: vk::PipelineStageFlags2::TOP_OF_PIPE,
                src_access_mask: vk::AccessFlags2::empty(),
                dst_stage_mask: vk::PipelineStageFlags2::COPY,
                dst_access_mask: vk::AccessFlags2::TRANSFER_WRITE,
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                image: dst,
                subresource_range: full_range(mip_count),
                ..Default::default()
            };
            let to_read = vk::ImageMemoryBarrier2 {
                s_type: vk::StructureType::IMAGE_MEMORY_BARRIER_2,
                src_stage_mask: vk::PipelineStageFlags2::COPY,
                src_access_mask: vk::AccessFlags2::TRANSFER_WRITE,
                dst_stage_mask: vk::PipelineStageFlags2::FRAGMENT_SHADER,
                dst_access_mask: vk::AccessFlags2::SHADER_SAMPLED_READ,
                old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                image: dst,
                subresource_range: full_range(mip_count),
                ..Default::default()
            };
            // SAFETY: `cmd` is recording; buffer and image stay alive until the wait in `one_shot`.
            unsafe {
                device.cmd_pipeline_barrier2(
                    cmd,
                    &vk::DependencyInfo {
                        s_type: vk::StructureType::DEPENDENCY_INFO,
                        image_memory_barrier_count: 1,
                        p_image_memory_barriers: &to_dst,
                        ..Default::default()
                    },
                );
                device.cmd_copy_buffer_to_image(
                    cmd,
                    src,
                    dst,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &regions,
                );
                device.cmd_pipeline_barrier2(
                    cmd,
                    &vk::DependencyInfo {
                        s_type: vk::StructureType::DEPENDENCY_INFO,
                        image_memory_barrier_count: 1,
                        p_image_memory_barriers: &to_read,
                        ..Default::default()
                    },
                );
            }
        });
        gpu.destroy_buffer(staging);
        if let Err(e) = copied {
            gpu.destroy_image(image);
            return Err(e);
        }

        let view_ci = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image: image.image,
            view_type: vk::ImageViewType::TYPE_2D,
            format: vk::Format::BC1_RGBA_UNORM_BLOCK,
            subresource_range: full_range(mip_count),
            ..Default::default()
        };
        // SAFETY: image is live and in a readable layout.
        let view = match unsafe { gpu.device.create_image_view(&view_ci, None) }
            .during("vkCreateImageView")
        {
            Ok(v) => v,
            Err(e) => {
                gpu.destroy_image(image);
                return Err(e);
            }
        };

        let sampler_ci = sampler_info(mip_count);
        // SAFETY: plain create call on a live device.
        let sampler = match unsafe { gpu.device.create_sampler(&sampler_ci, None) }
            .during("vkCreateSampler")
        {
            Ok(s) => s,
            Err(e) => {
                // SAFETY: the view was never used.
                unsafe { gpu.device.destroy_image_view(view, None) };
                gpu.destroy_image(image);
                return Err(e);
            }
        };

        tracing::debug!(
            name,
            width = extent.width,
            height = extent.height,
            mip_count,
            "texture uploaded"
        );
        Ok(Self {
            image,
            view,
            sampler,
            extent,
            mip_count,
        })
    }

    pub fn destroy(self, gpu: &Gpu) {
        // SAFETY: the GPU is idle with respect to this texture.
        unsafe {
            gpu.device.destroy_sampler(self.sampler, None);
            gpu.device.destroy_image_view(self.view, None);
        }
        gpu.destroy_image(self.image);
    }
}

pub fn sampler_info(mip_count: u32) -> vk::SamplerCreateInfo<'static> {
    vk::SamplerCreateInfo {
        s_type: vk::StructureType::SAMPLER_CREATE_INFO,
        mag_filter: vk::Filter::LINEAR,
        min_filter: vk::Filter::LINEAR,
        mipmap_mode: vk::SamplerMipmapMode::LINEAR,
        address_mode_u: vk::SamplerAddressMode::REPEAT,
        address_mode_v: vk::SamplerAddressMode::REPEAT,
        address_mode_w: vk::SamplerAddressMode::REPEAT,
        min_lod: 0.0,
        max_lod: mip_count as f32,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_render::{mip_chain, BC1_BLOCK_BYTES};

    #[test]
    fn one_region_per_level_at_payload_offsets() {
        let mips = mip_chain(256, 128, 4, BC1_BLOCK_BYTES);
        let regions = copy_regions(&mips);
        assert_eq!(regions.len(), 4);
        assert_eq!(regions[0].buffer_offset, 0);
        assert_eq!(regions[1].buffer_offset, 64 * 32 * 8);
        assert_eq!(regions[2].buffer_offset, 64 * 32 * 8 + 32 * 16 * 8);
        for (r, m) in regions.iter().zip(&mips) {
            assert_eq!(r.image_subresource.mip_level, m.level);
            assert_eq!((r.image_extent.width, r.image_extent.height), (m.width, m.height));
            assert_eq!(r.image_extent.depth, 1);
            // Tightly packed rows.
            assert_eq!(r.buffer_row_length, 0);
        }
    }

    #[test]
    fn sampler_covers_every_mip() {
        let s = sampler_info(8);
        assert_eq!(s.max_lod, 8.0);
        assert_eq!(s.address_mode_u, vk::SamplerAddressMode::REPEAT);
        assert_eq!(s.min_filter, vk::Filter::LINEAR);
    }
}

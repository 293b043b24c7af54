// SPDX-License-Identifier: CEPL-1.0
//! The renderer as seen by the application.
//!
//! Per frame the caller runs
//! `begin_frame -> begin_rendering -> draw_model* -> end_rendering -> end_frame`.
//! Calls out of that order fail with `VkError::Schedule`.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use ash::vk;
use ember_core::Arena;
use ember_render::{read_file_into, DdsTexture, MeshData, RenderSize};
use glam::Mat4;
use gpu_allocator::MemoryLocation;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::device::{Gpu, GpuImage};
use crate::error::{Result, VkError, VkResultExt};
use crate::frame::{AcquiredImage, FrameOrchestrator};
use crate::instance::GpuInstance;
use crate::mesh::GpuMesh;
use crate::pipeline::{Pipeline, PipelineDesc, ShaderSource, MESH_FRAG_SPV, MESH_VERT_SPV};
use crate::resources::{MeshHandle, ResourceTable, TextureHandle};
use crate::swapchain::Swapchain;
use crate::texture::Texture;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub vertex_shader: ShaderSource,
    pub fragment_shader: ShaderSource,
    /// Texture bound by [`Engine::load_model`].
    pub default_texture: PathBuf,
    /// Host scratch memory for reading asset files.
    pub scratch_arena_bytes: usize,
    /// Descriptor sets available for models.
    pub max_models: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            vertex_shader: ShaderSource::Embedded(MESH_VERT_SPV),
            fragment_shader: ShaderSource::Embedded(MESH_FRAG_SPV),
            default_texture: PathBuf::from("image.dds"),
            scratch_arena_bytes: 10 << 20,
            max_models: 64,
        }
    }
}

/// A drawable instance. Copies share the mesh, texture and descriptor set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Model {
    pub mesh: MeshHandle,
    pub texture: TextureHandle,
    pub descriptor_set: vk::DescriptorSet,
    pub index_count: u32,
    pub transform: Mat4,
}

struct DepthTarget {
    image: GpuImage,
    view: vk::ImageView,
    format: vk::Format,
}

impl DepthTarget {
    fn new(gpu: &Gpu, format: vk::Format, extent: vk::Extent2D) -> Result<Self> {
        let img_ci = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let image = gpu.create_image(&img_ci, MemoryLocation::GpuOnly, "depth")?;

        let view_ci = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image: image.image,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            subresource_range: depth_range(),
            ..Default::default()
        };
        // SAFETY: image is live and has memory bound.
        match unsafe { gpu.device.create_image_view(&view_ci, None) }.during("vkCreateImageView") {
            Ok(view) => Ok(Self {
                image,
                view,
                format,
            }),
            Err(e) => {
                gpu.destroy_image(image);
                Err(e)
            }
        }
    }

    fn destroy(self, gpu: &Gpu) {
        // SAFETY: the device is idle.
        unsafe { gpu.device.destroy_image_view(self.view, None) };
        gpu.destroy_image(self.image);
    }
}

fn depth_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::DEPTH,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn pick_depth_format(inst: &GpuInstance, gpu: &Gpu) -> Result<vk::Format> {
    [
        vk::Format::D32_SFLOAT,
        vk::Format::D32_SFLOAT_S8_UINT,
        vk::Format::D24_UNORM_S8_UINT,
        vk::Format::D16_UNORM,
    ]
    .into_iter()
    .find(|&fmt| {
        // SAFETY: plain format query.
        let props = unsafe {
            inst.instance
                .get_physical_device_format_properties(gpu.physical, fmt)
        };
        props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    })
    .ok_or_else(|| VkError::Unsupported("no depth attachment format".into()))
}

pub struct Engine {
    scratch: Arena<'static>,
    default_texture: PathBuf,
    max_models: u32,
    models_allocated: u32,

    frames: FrameOrchestrator,
    resources: ResourceTable,
    descriptor_pool: vk::DescriptorPool,
    depth: Option<DepthTarget>,
    pipeline: Pipeline,
    swapchain: Swapchain,

    // Dropped after the explicit teardown above, device before instance.
    gpu: Gpu,
    instance: GpuInstance,
    _single_thread: PhantomData<*const ()>,
}

impl Engine {
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        options: EngineOptions,
    ) -> Result<Self> {
        let instance = GpuInstance::new(window, display)?;
        let gpu = Gpu::new(&instance)?;
        let scratch = Arena::new(options.scratch_arena_bytes)?;

        let mut engine = Engine {
            scratch,
            default_texture: options.default_texture,
            max_models: options.max_models.max(1),
            models_allocated: 0,
            frames: FrameOrchestrator::empty(),
            resources: ResourceTable::new(),
            descriptor_pool: vk::DescriptorPool::null(),
            depth: None,
            pipeline: Pipeline::empty(),
            swapchain: Swapchain::empty(),
            gpu,
            instance,
            _single_thread: PhantomData,
        };

        // Anything built below is released by `Drop` if a later step fails.
        engine.swapchain = Swapchain::new(&engine.instance, &engine.gpu, size)?;
        let depth_format = pick_depth_format(&engine.instance, &engine.gpu)?;
        engine.depth = Some(DepthTarget::new(
            &engine.gpu,
            depth_format,
            engine.swapchain.extent,
        )?);

        let desc = PipelineDesc::mesh(
            options.vertex_shader,
            options.fragment_shader,
            engine.swapchain.format,
            Some(depth_format),
        );
        engine.pipeline = Pipeline::build(&engine.gpu.device, &desc)?;
        engine.descriptor_pool = create_descriptor_pool(&engine.gpu.device, engine.max_models)?;
        engine.frames = FrameOrchestrator::new(&engine.gpu)?;

        tracing::info!(
            width = engine.swapchain.extent.width,
            height = engine.swapchain.extent.height,
            depth = ?depth_format,
            max_models = engine.max_models,
            "engine ready"
        );
        Ok(engine)
    }

    /// Loads a compiled mesh and binds the default texture to it.
    pub fn load_model(&mut self, mesh_path: impl AsRef<Path>) -> Result<Model> {
        let texture = self.default_texture.clone();
        self.load_model_with_texture(mesh_path, texture)
    }

    pub fn load_model_with_texture(
        &mut self,
        mesh_path: impl AsRef<Path>,
        texture_path: impl AsRef<Path>,
    ) -> Result<Model> {
        let mesh_path = mesh_path.as_ref();
        if self.models_allocated >= self.max_models {
            return Err(VkError::DescriptorPoolExhausted {
                max: self.max_models,
            });
        }

        let texture = self.load_texture(texture_path)?;

        let mesh = {
            let scope = self.scratch.begin_temp();
            let bytes =
                read_file_into(&scope, mesh_path).map_err(|e| VkError::asset(mesh_path, e))?;
            let data = MeshData::parse(bytes).map_err(|e| VkError::asset(mesh_path, e))?;
            GpuMesh::upload(&self.gpu, &data, &mesh_path.display().to_string())?
        };
        let index_count = mesh.index_count;

        let descriptor_set = match self.allocate_texture_set(texture) {
            Ok(set) => set,
            Err(e) => {
                mesh.destroy(&self.gpu);
                return Err(e);
            }
        };
        let mesh = self.resources.insert_mesh(mesh);

        tracing::info!(path = %mesh_path.display(), index_count, "model loaded");
        Ok(Model {
            mesh,
            texture,
            descriptor_set,
            index_count,
            transform: Mat4::IDENTITY,
        })
    }

    /// Uploads a DXT1 texture, or returns the handle of the one already loaded from `path`.
    pub fn load_texture(&mut self, path: impl AsRef<Path>) -> Result<TextureHandle> {
        let path = path.as_ref();
        if let Some(handle) = self.resources.cached_texture(path) {
            return Ok(handle);
        }

        let texture = {
            let scope = self.scratch.begin_temp();
            let bytes = read_file_into(&scope, path).map_err(|e| VkError::asset(path, e))?;
            let dds = DdsTexture::parse(bytes).map_err(|e| VkError::asset(path, e))?;
            Texture::upload(&self.gpu, &dds, &path.display().to_string())?
        };
        Ok(self.resources.insert_texture(path, texture))
    }

    fn allocate_texture_set(&mut self, texture: TextureHandle) -> Result<vk::DescriptorSet> {
        let layout = self.pipeline.set_layouts[0];
        let ai = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: self.descriptor_pool,
            descriptor_set_count: 1,
            p_set_layouts: &layout,
            ..Default::default()
        };
        // SAFETY: pool and layout belong to this device.
        let set = match unsafe { self.gpu.device.allocate_descriptor_sets(&ai) } {
            Ok(sets) => sets[0],
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {
                return Err(VkError::DescriptorPoolExhausted {
                    max: self.max_models,
                })
            }
            Err(e) => return Err::<vk::DescriptorSet, _>(e).during("vkAllocateDescriptorSets"),
        };
        self.models_allocated += 1;

        let tex = self.resources.texture(texture)?;
        let image_info = vk::DescriptorImageInfo {
            sampler: tex.sampler,
            image_view: tex.view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        };
        let write = vk::WriteDescriptorSet {
            s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
            dst_set: set,
            dst_binding: 0,
            descriptor_count: 1,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            p_image_info: &image_info,
            ..Default::default()
        };
        // SAFETY: the set is not in use by any submitted work yet.
        unsafe {
            self.gpu
                .device
                .update_descriptor_sets(std::slice::from_ref(&write), &[])
        };
        Ok(set)
    }

    pub fn begin_frame(&mut self) -> Result<AcquiredImage> {
        self.frames.begin(&self.gpu, &self.swapchain)
    }

    /// Clears the acquired image and the depth buffer and opens a rendering pass.
    pub fn begin_rendering(&mut self, image: &AcquiredImage, clear: [f32; 4]) -> Result<()> {
        self.check_slot(image)?;
        let depth = self
            .depth
            .as_ref()
            .ok_or_else(|| VkError::Unsupported("engine has no depth target".into()))?;
        self.frames.schedule_mut().begin_rendering()?;

        let cmd = self.frames.command_buffer();
        let d = &self.gpu.device;

        // Previous frame's depth writes must land before this frame clears.
        let depth_barrier = vk::ImageMemoryBarrier2 {
            s_type: vk::StructureType::IMAGE_MEMORY_BARRIER_2,
            src_stage_mask: vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
            src_access_mask: vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
            dst_stage_mask: vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
            dst_access_mask: vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE
                | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ,
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            image: depth.image.image,
            subresource_range: depth_range(),
            ..Default::default()
        };
        let dep = vk::DependencyInfo {
            s_type: vk::StructureType::DEPENDENCY_INFO,
            image_memory_barrier_count: 1,
            p_image_memory_barriers: &depth_barrier,
            ..Default::default()
        };

        let color_att = vk::RenderingAttachmentInfo {
            s_type: vk::StructureType::RENDERING_ATTACHMENT_INFO,
            image_view: self.swapchain.views[image.image_index as usize],
            image_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_value: vk::ClearValue {
                color: vk::ClearColorValue { float32: clear },
            },
            ..Default::default()
        };
        let depth_att = vk::RenderingAttachmentInfo {
            s_type: vk::StructureType::RENDERING_ATTACHMENT_INFO,
            image_view: depth.view,
            image_layout: vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            clear_value: vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 0.0,
                    stencil: 0,
                },
            },
            ..Default::default()
        };
        let rendering_info = vk::RenderingInfo {
            s_type: vk::StructureType::RENDERING_INFO,
            render_area: self.swapchain.render_area(),
            layer_count: 1,
            color_attachment_count: 1,
            p_color_attachments: &color_att,
            p_depth_attachment: &depth_att,
            ..Default::default()
        };

        // SAFETY: `cmd` is recording for this slot; attachments are live.
        unsafe {
            d.cmd_pipeline_barrier2(cmd, &dep);
            d.cmd_begin_rendering(cmd, &rendering_info);
        }
        Ok(())
    }

    /// Records one indexed draw. Can be called any number of times per pass.
    pub fn draw_model(&mut self, view_proj: Mat4, model: &Model) -> Result<()> {
        self.frames.schedule().check_draw()?;
        let mesh = self.resources.mesh(model.mesh)?;

        let cmd = self.frames.command_buffer();
        let d = &self.gpu.device;
        let area = self.swapchain.render_area();
        let viewport = vk::Viewport {
            x: area.offset.x as f32,
            y: area.offset.y as f32,
            width: area.extent.width as f32,
            height: area.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let matrices = [model.transform, view_proj];

        // SAFETY: inside an open rendering pass on this slot's command buffer;
        // buffers and the descriptor set outlive the frame.
        unsafe {
            d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline.pipeline);
            d.cmd_set_viewport(cmd, 0, std::slice::from_ref(&viewport));
            d.cmd_set_scissor(cmd, 0, std::slice::from_ref(&area));
            d.cmd_push_constants(
                cmd,
                self.pipeline.layout,
                vk::ShaderStageFlags::VERTEX,
                0,
                bytemuck::bytes_of(&matrices),
            );
            d.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline.layout,
                0,
                std::slice::from_ref(&model.descriptor_set),
                &[],
            );
            d.cmd_bind_vertex_buffers(cmd, 0, std::slice::from_ref(&mesh.vertices.buffer), &[0]);
            d.cmd_bind_index_buffer(cmd, mesh.indices.buffer, 0, vk::IndexType::UINT32);
            d.cmd_draw_indexed(cmd, model.index_count, 1, 0, 0, 0);
        }
        Ok(())
    }

    pub fn end_rendering(&mut self) -> Result<()> {
        self.frames.schedule_mut().end_rendering()?;
        // SAFETY: closes the pass opened by `begin_rendering`.
        unsafe { self.gpu.device.cmd_end_rendering(self.frames.command_buffer()) };
        Ok(())
    }

    /// Submits and presents. `SurfaceOutOfDate` here still ends the frame.
    pub fn end_frame(&mut self, image: AcquiredImage) -> Result<()> {
        self.check_slot(&image)?;
        self.frames.end(&self.gpu, &self.swapchain, &image)
    }

    fn check_slot(&self, image: &AcquiredImage) -> Result<()> {
        check_image(
            image,
            self.frames.current_slot(),
            self.swapchain.images.len(),
        )
    }

    /// Index of the frame slot the next `begin_frame` uses.
    pub fn frame_index(&self) -> usize {
        self.frames.current_slot()
    }

    pub fn render_area(&self) -> vk::Rect2D {
        self.swapchain.render_area()
    }

    pub fn swapchain_format(&self) -> vk::Format {
        self.swapchain.format
    }

    pub fn supports_bc(&self) -> bool {
        self.gpu.supports_bc
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.frames.wait_all(&self.gpu);
        self.gpu.wait_idle();

        self.frames.destroy(&self.gpu);
        self.resources.destroy_all(&self.gpu);
        // SAFETY: the device is idle; sets die with their pool.
        unsafe {
            self.gpu
                .device
                .destroy_descriptor_pool(self.descriptor_pool, None)
        };
        if let Some(depth) = self.depth.take() {
            depth.destroy(&self.gpu);
        }
        self.pipeline.destroy(&self.gpu.device);
        self.swapchain.destroy(&self.gpu);
        tracing::info!("engine shut down");
    }
}

/// Rejects an image that was not acquired for `slot` or lies outside the swapchain.
fn check_image(image: &AcquiredImage, slot: usize, image_count: usize) -> Result<()> {
    if image.slot != slot || image.image_index as usize >= image_count {
        return Err(VkError::Unsupported(format!(
            "stale image {} for slot {}",
            image.image_index, image.slot
        )));
    }
    Ok(())
}

fn create_descriptor_pool(device: &ash::Device, max_models: u32) -> Result<vk::DescriptorPool> {
    let pool_size = vk::DescriptorPoolSize {
        ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        descriptor_count: max_models,
    };
    let pool_info = vk::DescriptorPoolCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
        max_sets: max_models,
        pool_size_count: 1,
        p_pool_sizes: &pool_size,
        ..Default::default()
    };
    // SAFETY: valid create info on a live device.
    unsafe { device.create_descriptor_pool(&pool_info, None) }.during("vkCreateDescriptorPool")
}

// SPDX-License-Identifier: CEPL-1.0
//! Graphics pipeline construction for dynamic rendering.
//!
//! A [`PipelineDesc`] is plain data: shader sources, vertex layout, resource
//! layout and attachment formats. [`Pipeline::build`] turns it into the
//! pipeline, its layout and one descriptor-set layout per set. Creation is a
//! one-time blocking call.

use std::ffi::CStr;
use std::io::Cursor;
use std::path::PathBuf;

use ash::util::read_spv;
use ash::vk;

use crate::error::{Result, VkError, VkResultExt};

const ENTRY_POINT: &CStr = c"main";

pub const MESH_VERT_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/mesh.vert.spv"));
pub const MESH_FRAG_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/mesh.frag.spv"));

/// Model matrix followed by view-projection, both column-major f32 4x4.
pub const MESH_PUSH_CONSTANT_BYTES: u32 = 2 * 64;
pub const MESH_VERTEX_STRIDE: u32 = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShaderSource {
    /// Compiled SPIR-V on disk.
    File(PathBuf),
    Embedded(&'static [u8]),
}

impl ShaderSource {
    pub fn load(&self) -> Result<Vec<u32>> {
        let shader_err = |source| VkError::Shader {
            path: self.label(),
            source,
        };
        match self {
            ShaderSource::File(path) => {
                let bytes = std::fs::read(path).map_err(shader_err)?;
                read_spv(&mut Cursor::new(&bytes[..])).map_err(shader_err)
            }
            ShaderSource::Embedded(bytes) => {
                read_spv(&mut Cursor::new(*bytes)).map_err(shader_err)
            }
        }
    }

    fn label(&self) -> String {
        match self {
            ShaderSource::File(path) => path.display().to_string(),
            ShaderSource::Embedded(_) => "<embedded>".to_owned(),
        }
    }
}

/// What a descriptor binding holds. `PipelineDesc::mesh` only samples a
/// texture; the buffer kinds let other layouts bind uniform or storage data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    CombinedImageSampler,
    UniformBuffer,
    StorageBuffer,
}

impl ResourceKind {
    pub fn descriptor_type(self) -> vk::DescriptorType {
        match self {
            ResourceKind::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            ResourceKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            ResourceKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingDesc {
    pub set: u32,
    pub binding: u32,
    pub kind: ResourceKind,
    pub stages: vk::ShaderStageFlags,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayoutDesc {
    pub bindings: Vec<BindingDesc>,
    pub push_constant_bytes: u32,
    pub push_constant_stages: vk::ShaderStageFlags,
}

impl LayoutDesc {
    /// Number of descriptor sets. Sets must be numbered 0..n without gaps.
    pub fn set_count(&self) -> Result<u32> {
        let count = self.bindings.iter().map(|b| b.set + 1).max().unwrap_or(0);
        if let Some(missing) = (0..count).find(|s| !self.bindings.iter().any(|b| b.set == *s)) {
            return Err(VkError::Unsupported(format!(
                "descriptor set {missing} has no bindings; sets must be contiguous from 0"
            )));
        }
        Ok(count)
    }

    pub fn set_bindings(&self, set: u32) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
        self.bindings
            .iter()
            .filter(|b| b.set == set)
            .map(|b| vk::DescriptorSetLayoutBinding {
                binding: b.binding,
                descriptor_type: b.kind.descriptor_type(),
                descriptor_count: 1,
                stage_flags: b.stages,
                ..Default::default()
            })
            .collect()
    }

    pub fn push_constant_range(&self) -> Option<vk::PushConstantRange> {
        (self.push_constant_bytes > 0).then_some(vk::PushConstantRange {
            stage_flags: self.push_constant_stages,
            offset: 0,
            size: self.push_constant_bytes,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PipelineDesc {
    pub vertex_shader: ShaderSource,
    pub fragment_shader: ShaderSource,
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub layout: LayoutDesc,
    pub color_format: vk::Format,
    pub depth_format: Option<vk::Format>,
}

impl PipelineDesc {
    /// The textured mesh pipeline: packed 16-byte vertices, one sampled texture
    /// at set 0 binding 0, two matrices pushed to the vertex stage.
    pub fn mesh(
        vertex_shader: ShaderSource,
        fragment_shader: ShaderSource,
        color_format: vk::Format,
        depth_format: Option<vk::Format>,
    ) -> Self {
        let attr = |location, format, offset| vk::VertexInputAttributeDescription {
            location,
            binding: 0,
            format,
            offset,
        };
        Self {
            vertex_shader,
            fragment_shader,
            vertex_bindings: vec![vk::VertexInputBindingDescription {
                binding: 0,
                stride: MESH_VERTEX_STRIDE,
                input_rate: vk::VertexInputRate::VERTEX,
            }],
            vertex_attributes: vec![
                attr(0, vk::Format::R16G16B16A16_SFLOAT, 0),
                attr(1, vk::Format::R8G8B8A8_SNORM, 8),
                attr(2, vk::Format::R16G16_SFLOAT, 12),
            ],
            layout: LayoutDesc {
                bindings: vec![BindingDesc {
                    set: 0,
                    binding: 0,
                    kind: ResourceKind::CombinedImageSampler,
                    stages: vk::ShaderStageFlags::FRAGMENT,
                }],
                push_constant_bytes: MESH_PUSH_CONSTANT_BYTES,
                push_constant_stages: vk::ShaderStageFlags::VERTEX,
            },
            color_format,
            depth_format,
        }
    }
}

/// Depth test and write with reversed depth, or nothing without a depth attachment.
pub fn depth_state(
    depth_format: Option<vk::Format>,
) -> Option<vk::PipelineDepthStencilStateCreateInfo<'static>> {
    depth_format.map(|_| vk::PipelineDepthStencilStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
        depth_test_enable: vk::TRUE,
        depth_write_enable: vk::TRUE,
        depth_compare_op: vk::CompareOp::GREATER_OR_EQUAL,
        min_depth_bounds: 0.0,
        max_depth_bounds: 1.0,
        ..Default::default()
    })
}

pub fn raster_state() -> vk::PipelineRasterizationStateCreateInfo<'static> {
    vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: vk::CullModeFlags::BACK,
        front_face: vk::FrontFace::COUNTER_CLOCKWISE,
        line_width: 1.0,
        ..Default::default()
    }
}

pub struct Pipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub set_layouts: Vec<vk::DescriptorSetLayout>,
}

impl Pipeline {
    pub fn empty() -> Self {
        Self {
            pipeline: vk::Pipeline::null(),
            layout: vk::PipelineLayout::null(),
            set_layouts: Vec::new(),
        }
    }

    pub fn build(device: &ash::Device, desc: &PipelineDesc) -> Result<Self> {
        let vs_code = desc.vertex_shader.load()?;
        let fs_code = desc.fragment_shader.load()?;
        let set_count = desc.layout.set_count()?;

        let mut out = Pipeline::empty();
        let mut modules = Vec::with_capacity(2);

        let built = (|| -> Result<()> {
            for set in 0..set_count {
                let bindings = desc.layout.set_bindings(set);
                let ci = vk::DescriptorSetLayoutCreateInfo {
                    s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
                    binding_count: bindings.len() as u32,
                    p_bindings: bindings.as_ptr(),
                    ..Default::default()
                };
                // SAFETY: `bindings` outlives the call.
                let layout = unsafe { device.create_descriptor_set_layout(&ci, None) }
                    .during("vkCreateDescriptorSetLayout")?;
                out.set_layouts.push(layout);
            }

            let push_range = desc.layout.push_constant_range();
            let layout_info = vk::PipelineLayoutCreateInfo {
                s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
                set_layout_count: out.set_layouts.len() as u32,
                p_set_layouts: out.set_layouts.as_ptr(),
                push_constant_range_count: push_range.is_some() as u32,
                p_push_constant_ranges: push_range
                    .as_ref()
                    .map_or(std::ptr::null(), |r| r as *const _),
                ..Default::default()
            };
            // SAFETY: arrays outlive the call.
            out.layout = unsafe { device.create_pipeline_layout(&layout_info, None) }
                .during("vkCreatePipelineLayout")?;

            for code in [&vs_code, &fs_code] {
                let ci = vk::ShaderModuleCreateInfo {
                    s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
                    p_code: code.as_ptr(),
                    code_size: code.len() * 4,
                    ..Default::default()
                };
                // SAFETY: `code` is word-aligned SPIR-V.
                modules.push(
                    unsafe { device.create_shader_module(&ci, None) }
                        .during("vkCreateShaderModule")?,
                );
            }

            let stages = [
                vk::PipelineShaderStageCreateInfo {
                    s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                    stage: vk::ShaderStageFlags::VERTEX,
                    module: modules[0],
                    p_name: ENTRY_POINT.as_ptr(),
                    ..Default::default()
                },
                vk::PipelineShaderStageCreateInfo {
                    s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                    stage: vk::ShaderStageFlags::FRAGMENT,
                    module: modules[1],
                    p_name: ENTRY_POINT.as_ptr(),
                    ..Default::default()
                },
            ];

            let vertex_input = vk::PipelineVertexInputStateCreateInfo {
                s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
                vertex_binding_description_count: desc.vertex_bindings.len() as u32,
                p_vertex_binding_descriptions: desc.vertex_bindings.as_ptr(),
                vertex_attribute_description_count: desc.vertex_attributes.len() as u32,
                p_vertex_attribute_descriptions: desc.vertex_attributes.as_ptr(),
                ..Default::default()
            };
            let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
                s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
                topology: vk::PrimitiveTopology::TRIANGLE_LIST,
                ..Default::default()
            };
            let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
            let dynamic_state = vk::PipelineDynamicStateCreateInfo {
                s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
                dynamic_state_count: dyn_states.len() as u32,
                p_dynamic_states: dyn_states.as_ptr(),
                ..Default::default()
            };
            let viewport_state = vk::PipelineViewportStateCreateInfo {
                s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
                viewport_count: 1,
                scissor_count: 1,
                ..Default::default()
            };
            let raster = raster_state();
            let multisample = vk::PipelineMultisampleStateCreateInfo {
                s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
                rasterization_samples: vk::SampleCountFlags::TYPE_1,
                ..Default::default()
            };
            let depth = depth_state(desc.depth_format);
            let color_blend_att = vk::PipelineColorBlendAttachmentState {
                color_write_mask: vk::ColorComponentFlags::RGBA,
                blend_enable: vk::FALSE,
                ..Default::default()
            };
            let color_blend = vk::PipelineColorBlendStateCreateInfo {
                s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
                attachment_count: 1,
                p_attachments: &color_blend_att,
                ..Default::default()
            };
            let rendering = vk::PipelineRenderingCreateInfo {
                s_type: vk::StructureType::PIPELINE_RENDERING_CREATE_INFO,
                color_attachment_count: 1,
                p_color_attachment_formats: &desc.color_format,
                depth_attachment_format: desc.depth_format.unwrap_or(vk::Format::UNDEFINED),
                ..Default::default()
            };

            let pipeline_info = vk::GraphicsPipelineCreateInfo {
                s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
                p_next: (&rendering as *const _) as *const _,
                stage_count: stages.len() as u32,
                p_stages: stages.as_ptr(),
                p_vertex_input_state: &vertex_input,
                p_input_assembly_state: &input_assembly,
                p_viewport_state: &viewport_state,
                p_rasterization_state: &raster,
                p_multisample_state: &multisample,
                p_depth_stencil_state: depth
                    .as_ref()
                    .map_or(std::ptr::null(), |d| d as *const _),
                p_color_blend_state: &color_blend,
                p_dynamic_state: &dynamic_state,
                layout: out.layout,
                ..Default::default()
            };

            // SAFETY: every state struct above outlives the call.
            let pipelines = unsafe {
                device.create_graphics_pipelines(
                    vk::PipelineCache::null(),
                    std::slice::from_ref(&pipeline_info),
                    None,
                )
            }
            .map_err(|(_, r)| r)
            .during("vkCreateGraphicsPipelines")?;
            out.pipeline = pipelines[0];
            Ok(())
        })();

        // SAFETY: modules are only referenced during pipeline creation.
        for module in modules {
            unsafe { device.destroy_shader_module(module, None) };
        }

        match built {
            Ok(()) => {
                tracing::info!(
                    color = ?desc.color_format,
                    depth = ?desc.depth_format,
                    sets = set_count,
                    "graphics pipeline built"
                );
                Ok(out)
            }
            Err(e) => {
                out.destroy(device);
                Err(e)
            }
        }
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        // SAFETY: null handles are ignored; the caller has idled the GPU.
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
            for layout in self.set_layouts.drain(..) {
                device.destroy_descriptor_set_layout(layout, None);
            }
        }
        self.pipeline = vk::Pipeline::null();
        self.layout = vk::PipelineLayout::null();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mesh_desc() -> PipelineDesc {
        PipelineDesc::mesh(
            ShaderSource::Embedded(MESH_VERT_SPV),
            ShaderSource::Embedded(MESH_FRAG_SPV),
            vk::Format::B8G8R8A8_UNORM,
            Some(vk::Format::D32_SFLOAT),
        )
    }

    #[test]
    fn mesh_vertex_layout() {
        let desc = mesh_desc();
        assert_eq!(desc.vertex_bindings[0].stride, 16);
        let attrs: Vec<_> = desc
            .vertex_attributes
            .iter()
            .map(|a| (a.location, a.format, a.offset))
            .collect();
        assert_eq!(
            attrs,
            [
                (0, vk::Format::R16G16B16A16_SFLOAT, 0),
                (1, vk::Format::R8G8B8A8_SNORM, 8),
                (2, vk::Format::R16G16_SFLOAT, 12),
            ]
        );
    }

    #[test]
    fn mesh_resource_layout() {
        let desc = mesh_desc();
        assert_eq!(desc.layout.set_count().unwrap(), 1);
        let set0 = desc.layout.set_bindings(0);
        assert_eq!(set0.len(), 1);
        assert_eq!(set0[0].binding, 0);
        assert_eq!(
            set0[0].descriptor_type,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
        let push = desc.layout.push_constant_range().unwrap();
        assert_eq!(push.size, 128);
        assert_eq!(push.stage_flags, vk::ShaderStageFlags::VERTEX);
    }

    #[test]
    fn sets_must_be_contiguous() {
        let layout = LayoutDesc {
            bindings: vec![
                BindingDesc {
                    set: 0,
                    binding: 0,
                    kind: ResourceKind::UniformBuffer,
                    stages: vk::ShaderStageFlags::VERTEX,
                },
                BindingDesc {
                    set: 2,
                    binding: 0,
                    kind: ResourceKind::StorageBuffer,
                    stages: vk::ShaderStageFlags::FRAGMENT,
                },
            ],
            ..Default::default()
        };
        assert!(matches!(layout.set_count(), Err(VkError::Unsupported(_))));
        assert_eq!(LayoutDesc::default().set_count().unwrap(), 0);
        assert!(LayoutDesc::default().push_constant_range().is_none());
    }

    #[test]
    fn buffer_bindings_share_a_set() {
        let binding = |binding, kind| BindingDesc {
            set: 0,
            binding,
            kind,
            stages: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
        };
        let layout = LayoutDesc {
            bindings: vec![
                binding(0, ResourceKind::UniformBuffer),
                binding(1, ResourceKind::StorageBuffer),
                binding(2, ResourceKind::CombinedImageSampler),
            ],
            ..Default::default()
        };
        assert_eq!(layout.set_count().unwrap(), 1);
        let types: Vec<_> = layout
            .set_bindings(0)
            .iter()
            .map(|b| (b.binding, b.descriptor_type))
            .collect();
        assert_eq!(
            types,
            [
                (0, vk::DescriptorType::UNIFORM_BUFFER),
                (1, vk::DescriptorType::STORAGE_BUFFER),
                (2, vk::DescriptorType::COMBINED_IMAGE_SAMPLER),
            ]
        );
        assert!(layout.set_bindings(1).is_empty());
    }

    #[test]
    fn reversed_depth_only_with_attachment() {
        let d = depth_state(Some(vk::Format::D32_SFLOAT)).unwrap();
        assert_eq!(d.depth_compare_op, vk::CompareOp::GREATER_OR_EQUAL);
        assert_eq!(d.depth_test_enable, vk::TRUE);
        assert_eq!(d.depth_write_enable, vk::TRUE);
        assert!(depth_state(None).is_none());
    }

    #[test]
    fn fixed_raster_state() {
        let r = raster_state();
        assert_eq!(r.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(r.front_face, vk::FrontFace::COUNTER_CLOCKWISE);
        assert_eq!(r.polygon_mode, vk::PolygonMode::FILL);
        assert_eq!(r.line_width, 1.0);
    }

    #[test]
    fn embedded_shaders_are_spirv() {
        let words = ShaderSource::Embedded(MESH_VERT_SPV).load().unwrap();
        assert_eq!(words[0], 0x0723_0203);
        assert!(ShaderSource::Embedded(MESH_FRAG_SPV).load().is_ok());
    }

    #[test]
    fn bad_shader_sources_report_path() {
        let err = ShaderSource::File(PathBuf::from("/nonexistent/mesh.vert.spv"))
            .load()
            .unwrap_err();
        assert!(err.to_string().contains("mesh.vert.spv"));

        static ODD: [u8; 5] = [3, 2, 35, 7, 0];
        assert!(matches!(
            ShaderSource::Embedded(&ODD).load(),
            Err(VkError::Shader { .. })
        ));
    }
}

// SPDX-License-Identifier: CEPL-1.0
//! Vulkan 1.3 backend: device bootstrap, swapchain, the mesh pipeline,
//! DXT1 texture streaming and the double-buffered frame loop, tied together
//! by [`Engine`].
#![deny(unsafe_op_in_unsafe_fn)]

pub mod device;
pub mod engine;
pub mod error;
pub mod frame;
pub mod instance;
pub mod mesh;
pub mod pipeline;
pub mod resources;
pub mod swapchain;
pub mod texture;

pub use ash::vk;
pub use device::{Gpu, GpuBuffer, GpuImage};
pub use engine::{Engine, EngineOptions, Model};
pub use error::{ErrorKind, Result, VkError, VkResultExt};
pub use frame::{AcquiredImage, FrameOrchestrator};
pub use instance::GpuInstance;
pub use mesh::GpuMesh;
pub use pipeline::{Pipeline, PipelineDesc, ShaderSource};
pub use resources::{MeshHandle, ResourceTable, TextureHandle};
pub use swapchain::Swapchain;
pub use texture::Texture;

pub use ember_render::RenderSize;

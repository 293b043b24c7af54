// SPDX-License-Identifier: CEPL-1.0
//! Backend-independent pieces of the renderer: asset formats, selection
//! policies and the frame schedule. Nothing in here touches the GPU.

pub mod dds;
pub mod error;
pub mod frame;
pub mod load;
pub mod mesh;
pub mod mip;
pub mod select;

pub use dds::DdsTexture;
pub use error::{AssetError, ScheduleError};
pub use frame::{FrameSchedule, SlotPhase, FRAMES_IN_FLIGHT};
pub use load::read_file_into;
pub use mesh::{MeshData, VERTEX_STRIDE};
pub use mip::{mip_chain, total_size, MipLevel, BC1_BLOCK_BYTES};
pub use select::{
    select_queue, swapchain_image_count, AdapterInfo, QueueFamilyInfo, MAX_SWAPCHAIN_IMAGES,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

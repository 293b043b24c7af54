// SPDX-License-Identifier: CEPL-1.0
//! Adapter, queue and swapchain sizing policies over plain descriptions.

/// Upper bound on presentable images the renderer tracks.
pub const MAX_SWAPCHAIN_IMAGES: usize = 16;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyInfo {
    pub graphics: bool,
    /// Present support for the target surface. Query failures are reported as `false`.
    pub present: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdapterInfo {
    /// The adapter reports Vulkan 1.3 or newer.
    pub api_1_3: bool,
    pub queue_families: Vec<QueueFamilyInfo>,
}

/// First adapter with Vulkan 1.3, then its first family that can both draw
/// and present. Returns `(adapter index, queue family index)`.
pub fn select_queue(adapters: &[AdapterInfo]) -> Option<(usize, u32)> {
    adapters.iter().enumerate().find_map(|(a, info)| {
        if !info.api_1_3 {
            return None;
        }
        info.queue_families
            .iter()
            .position(|f| f.graphics && f.present)
            .map(|q| (a, q as u32))
    })
}

/// One more than the minimum, clamped to the maximum. A maximum of 0 means unbounded.
pub fn swapchain_image_count(min: u32, max: u32) -> u32 {
    let desired = min.saturating_add(1);
    if max > 0 {
        desired.min(max)
    } else {
        desired
    }
}

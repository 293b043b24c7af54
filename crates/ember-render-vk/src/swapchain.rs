// SPDX-License-Identifier: CEPL-1.0
//! Presentable image ring. No resize handling; `destroy` lets a caller rebuild.

use ash::vk;
use ember_render::{swapchain_image_count, RenderSize, MAX_SWAPCHAIN_IMAGES};

use crate::device::Gpu;
use crate::error::{Result, VkError, VkResultExt};
use crate::instance::GpuInstance;

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
}

impl Swapchain {
    /// A placeholder holding no handles.
    pub fn empty() -> Self {
        Self {
            swapchain: vk::SwapchainKHR::null(),
            format: vk::Format::UNDEFINED,
            extent: vk::Extent2D::default(),
            images: Vec::new(),
            views: Vec::new(),
        }
    }

    pub fn new(inst: &GpuInstance, gpu: &Gpu, size: RenderSize) -> Result<Self> {
        let surf = &inst.surface_loader;
        // SAFETY: surface and adapter belong to the same instance.
        let (caps, formats) = unsafe {
            (
                surf.get_physical_device_surface_capabilities(gpu.physical, inst.surface)
                    .during("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?,
                surf.get_physical_device_surface_formats(gpu.physical, inst.surface)
                    .during("vkGetPhysicalDeviceSurfaceFormatsKHR")?,
            )
        };
        let surface_format = *formats
            .first()
            .ok_or_else(|| VkError::Unsupported("surface reports no formats".into()))?;

        let extent = extent_from_caps(&caps, size);
        let min_image_count = swapchain_image_count(caps.min_image_count, caps.max_image_count);
        let pre_transform = if caps
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            caps.current_transform
        };

        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: inst.surface,
            min_image_count,
            image_format: surface_format.format,
            image_color_space: surface_format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: vk::SharingMode::EXCLUSIVE,
            pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: vk::PresentModeKHR::FIFO,
            clipped: vk::TRUE,
            ..Default::default()
        };

        let loader = &gpu.swapchain_loader;
        // SAFETY: device was created with VK_KHR_swapchain.
        let swapchain =
            unsafe { loader.create_swapchain(&swap_info, None) }.during("vkCreateSwapchainKHR")?;
        let mut out = Self {
            swapchain,
            format: surface_format.format,
            extent,
            images: Vec::new(),
            views: Vec::new(),
        };

        // SAFETY: swapchain was just created.
        match unsafe { loader.get_swapchain_images(swapchain) }.during("vkGetSwapchainImagesKHR") {
            Ok(images) if images.len() <= MAX_SWAPCHAIN_IMAGES => out.images = images,
            Ok(images) => {
                out.destroy(gpu);
                return Err(VkError::Unsupported(format!(
                    "swapchain has {} images, at most {MAX_SWAPCHAIN_IMAGES} are supported",
                    images.len()
                )));
            }
            Err(e) => {
                out.destroy(gpu);
                return Err(e);
            }
        }

        for i in 0..out.images.len() {
            match create_color_view(&gpu.device, out.images[i], out.format) {
                Ok(view) => out.views.push(view),
                Err(e) => {
                    out.destroy(gpu);
                    return Err(e);
                }
            }
        }

        tracing::info!(
            format = ?out.format,
            color_space = ?surface_format.color_space,
            width = extent.width,
            height = extent.height,
            images = out.images.len(),
            "swapchain created"
        );
        Ok(out)
    }

    pub fn render_area(&self) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent,
        }
    }

    pub fn destroy(&mut self, gpu: &Gpu) {
        // SAFETY: callers make sure no submitted work still targets these images.
        unsafe {
            for view in self.views.drain(..) {
                gpu.device.destroy_image_view(view, None);
            }
            self.images.clear();
            if self.swapchain != vk::SwapchainKHR::null() {
                gpu.swapchain_loader.destroy_swapchain(self.swapchain, None);
                self.swapchain = vk::SwapchainKHR::null();
            }
        }
    }
}

fn create_color_view(device: &ash::Device, image: vk::Image, format: vk::Format) -> Result<vk::ImageView> {
    let iv_info = vk::ImageViewCreateInfo {
        s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
        image,
        view_type: vk::ImageViewType::TYPE_2D,
        format,
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        },
        ..Default::default()
    };
    // SAFETY: image belongs to a live swapchain on this device.
    unsafe { device.create_image_view(&iv_info, None) }.during("vkCreateImageView")
}

/// The surface's fixed extent, or the window size clamped to the allowed range.
pub fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(current: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: 64,
                height: 64,
            },
            max_image_extent: vk::Extent2D {
                width: 1024,
                height: 768,
            },
            ..Default::default()
        }
    }

    #[test]
    fn fixed_extent_wins() {
        let e = extent_from_caps(&caps((800, 600)), RenderSize { width: 10, height: 10 });
        assert_eq!((e.width, e.height), (800, 600));
    }

    #[test]
    fn free_extent_clamps_window_size() {
        let e = extent_from_caps(
            &caps((u32::MAX, u32::MAX)),
            RenderSize {
                width: 2000,
                height: 10,
            },
        );
        assert_eq!((e.width, e.height), (1024, 64));
    }
}

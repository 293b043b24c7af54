// SPDX-License-Identifier: CEPL-1.0
//! Adapter selection, logical device, queue and the GPU sub-allocator.

use std::cell::RefCell;
use std::ffi::c_void;
use std::mem::ManuallyDrop;

use ash::khr::swapchain;
use ash::vk;
use ember_render::{select_queue, AdapterInfo, QueueFamilyInfo};
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;

use crate::error::{Result, VkError, VkResultExt};
use crate::instance::GpuInstance;

/// A buffer and the sub-allocation backing it.
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub allocation: Allocation,
    pub size: vk::DeviceSize,
}

impl GpuBuffer {
    /// Copies `bytes` to the start of a host-visible buffer.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let mapped = self
            .allocation
            .mapped_slice_mut()
            .ok_or_else(|| VkError::Unsupported("buffer memory is not host visible".into()))?;
        if bytes.len() > mapped.len() {
            return Err(VkError::Unsupported(format!(
                "write of {} bytes into a {} byte buffer",
                bytes.len(),
                mapped.len()
            )));
        }
        mapped[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

pub struct GpuImage {
    pub image: vk::Image,
    pub allocation: Allocation,
}

/// The one logical device the renderer drives.
pub struct Gpu {
    pub physical: vk::PhysicalDevice,
    pub device: ash::Device,
    pub queue: vk::Queue,
    pub queue_family: u32,
    pub supports_bc: bool,
    pub swapchain_loader: swapchain::Device,
    upload_pool: vk::CommandPool,
    allocator: ManuallyDrop<RefCell<Allocator>>,
}

impl Gpu {
    pub fn new(inst: &GpuInstance) -> Result<Self> {
        let instance = &inst.instance;
        // SAFETY: plain queries on a live instance.
        let adapters =
            unsafe { instance.enumerate_physical_devices() }.during("vkEnumeratePhysicalDevices")?;

        let infos: Vec<AdapterInfo> = adapters
            .iter()
            .map(|&phys| describe_adapter(inst, phys))
            .collect();
        let (adapter, queue_family) = select_queue(&infos).ok_or(VkError::NoSuitableAdapter)?;
        let physical = adapters[adapter];

        // SAFETY: `physical` came from this instance.
        let (props, features) = unsafe {
            (
                instance.get_physical_device_properties(physical),
                instance.get_physical_device_features(physical),
            )
        };
        let name = props
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let supports_bc = features.texture_compression_bc == vk::TRUE;

        let priorities = [1.0_f32];
        let qinfo = vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: queue_family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        };
        let device_exts = [swapchain::NAME.as_ptr()];

        let mut feats13 = vk::PhysicalDeviceVulkan13Features {
            s_type: vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_3_FEATURES,
            synchronization2: vk::TRUE,
            dynamic_rendering: vk::TRUE,
            ..Default::default()
        };
        let feats2 = vk::PhysicalDeviceFeatures2 {
            s_type: vk::StructureType::PHYSICAL_DEVICE_FEATURES_2,
            p_next: (&mut feats13) as *mut _ as *mut c_void,
            features: vk::PhysicalDeviceFeatures {
                texture_compression_bc: features.texture_compression_bc,
                ..Default::default()
            },
            ..Default::default()
        };
        let dinfo = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            p_next: (&feats2) as *const _ as *const c_void,
            queue_create_info_count: 1,
            p_queue_create_infos: &qinfo,
            enabled_extension_count: device_exts.len() as u32,
            pp_enabled_extension_names: device_exts.as_ptr(),
            ..Default::default()
        };

        // SAFETY: the feature chain and arrays outlive the call.
        let device = unsafe { instance.create_device(physical, &dinfo, None) }
            .during("vkCreateDevice")?;
        // SAFETY: one queue was requested from this family.
        let queue = unsafe { device.get_device_queue(queue_family, 0) };

        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: queue_family,
            flags: vk::CommandPoolCreateFlags::TRANSIENT,
            ..Default::default()
        };
        // SAFETY: valid device and create info.
        let upload_pool = match unsafe { device.create_command_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                // SAFETY: nothing else was created from the device.
                unsafe { device.destroy_device(None) };
                return Err::<Self, _>(e).during("vkCreateCommandPool");
            }
        };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device: physical,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        });
        let allocator = match allocator {
            Ok(a) => a,
            Err(e) => {
                // SAFETY: only the pool was created from the device.
                unsafe {
                    device.destroy_command_pool(upload_pool, None);
                    device.destroy_device(None);
                }
                return Err(e.into());
            }
        };

        let swapchain_loader = swapchain::Device::new(instance, &device);
        tracing::info!(adapter = %name, queue_family, supports_bc, "device ready");

        Ok(Self {
            physical,
            device,
            queue,
            queue_family,
            supports_bc,
            swapchain_loader,
            upload_pool,
            allocator: ManuallyDrop::new(RefCell::new(allocator)),
        })
    }

    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<GpuBuffer> {
        let bci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        // SAFETY: valid create info on a live device.
        let buffer = unsafe { self.device.create_buffer(&bci, None) }.during("vkCreateBuffer")?;
        // SAFETY: buffer was just created from this device.
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation = self.allocate(name, requirements, location, true);
        let allocation = match allocation {
            Ok(a) => a,
            Err(e) => {
                // SAFETY: unbound and unused.
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        // SAFETY: the allocation satisfies `requirements`.
        let bound = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        }
        .during("vkBindBufferMemory");
        let buf = GpuBuffer {
            buffer,
            allocation,
            size,
        };
        if let Err(e) = bound {
            self.destroy_buffer(buf);
            return Err(e);
        }
        Ok(buf)
    }

    pub fn destroy_buffer(&self, buf: GpuBuffer) {
        self.free(buf.allocation);
        // SAFETY: callers only destroy buffers the GPU no longer uses.
        unsafe { self.device.destroy_buffer(buf.buffer, None) };
    }

    pub fn create_image(
        &self,
        info: &vk::ImageCreateInfo<'_>,
        location: MemoryLocation,
        name: &str,
    ) -> Result<GpuImage> {
        // SAFETY: valid create info on a live device.
        let image = unsafe { self.device.create_image(info, None) }.during("vkCreateImage")?;
        // SAFETY: image was just created from this device.
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let allocation = match self.allocate(name, requirements, location, false) {
            Ok(a) => a,
            Err(e) => {
                // SAFETY: unbound and unused.
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };
        // SAFETY: the allocation satisfies `requirements`.
        let bound = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        }
        .during("vkBindImageMemory");
        let img = GpuImage { image, allocation };
        if let Err(e) = bound {
            self.destroy_image(img);
            return Err(e);
        }
        Ok(img)
    }

    pub fn destroy_image(&self, img: GpuImage) {
        self.free(img.allocation);
        // SAFETY: callers only destroy images the GPU no longer uses.
        unsafe { self.device.destroy_image(img.image, None) };
    }

    fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> Result<Allocation> {
        let allocation = self.allocator.borrow_mut().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        allocation.map_err(|e| {
            tracing::error!(name, size = requirements.size, "gpu allocation failed: {e}");
            VkError::from(e)
        })
    }

    fn free(&self, allocation: Allocation) {
        if let Err(e) = self.allocator.borrow_mut().free(allocation) {
            tracing::warn!("gpu free failed: {e}");
        }
    }

    /// Records into a transient command buffer, submits it and blocks until the queue is idle.
    pub fn one_shot(&self, record: impl FnOnce(&ash::Device, vk::CommandBuffer)) -> Result<()> {
        let ai = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.upload_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };
        // SAFETY: pool belongs to this device and is only used on this thread.
        let cmd = unsafe { self.device.allocate_command_buffers(&ai) }
            .during("vkAllocateCommandBuffers")?[0];

        let result = (|| -> Result<()> {
            let bi = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                ..Default::default()
            };
            // SAFETY: freshly allocated buffer in the initial state.
            unsafe { self.device.begin_command_buffer(cmd, &bi) }
                .during("vkBeginCommandBuffer")?;
            record(&self.device, cmd);
            // SAFETY: recording state.
            unsafe { self.device.end_command_buffer(cmd) }.during("vkEndCommandBuffer")?;

            let si = vk::SubmitInfo {
                s_type: vk::StructureType::SUBMIT_INFO,
                command_buffer_count: 1,
                p_command_buffers: &cmd,
                ..Default::default()
            };
            // SAFETY: executable buffer; the wait below keeps it alive until done.
            unsafe {
                self.device
                    .queue_submit(self.queue, std::slice::from_ref(&si), vk::Fence::null())
                    .during("vkQueueSubmit")?;
                self.device
                    .queue_wait_idle(self.queue)
                    .during("vkQueueWaitIdle")
            }
        })();

        // SAFETY: the queue is idle or the buffer was never submitted.
        unsafe {
            self.device
                .free_command_buffers(self.upload_pool, std::slice::from_ref(&cmd))
        };
        result
    }

    pub fn wait_idle(&self) {
        // SAFETY: live device.
        if let Err(e) = unsafe { self.device.device_wait_idle() } {
            tracing::warn!("device_wait_idle: {e:?}");
        }
    }
}

impl Drop for Gpu {
    fn drop(&mut self) {
        // SAFETY: every buffer/image was freed by its owner first; the allocator
        // must go before the device it allocates from.
        unsafe {
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_command_pool(self.upload_pool, None);
            self.device.destroy_device(None);
        }
    }
}

fn describe_adapter(inst: &GpuInstance, phys: vk::PhysicalDevice) -> AdapterInfo {
    // SAFETY: `phys` came from this instance.
    let (props, families) = unsafe {
        (
            inst.instance.get_physical_device_properties(phys),
            inst.instance.get_physical_device_queue_family_properties(phys),
        )
    };
    let api = props.api_version;
    let api_1_3 = (vk::api_version_major(api), vk::api_version_minor(api)) >= (1, 3);
    if !api_1_3 {
        tracing::debug!(
            "adapter reports Vulkan {}.{}; skipped",
            vk::api_version_major(api),
            vk::api_version_minor(api)
        );
    }
    let queue_families = families
        .iter()
        .enumerate()
        .map(|(i, q)| QueueFamilyInfo {
            graphics: q.queue_flags.contains(vk::QueueFlags::GRAPHICS),
            // SAFETY: surface and adapter share the instance.
            present: unsafe {
                inst.surface_loader
                    .get_physical_device_surface_support(phys, i as u32, inst.surface)
            }
            .unwrap_or(false),
        })
        .collect();
    AdapterInfo {
        api_1_3,
        queue_families,
    }
}

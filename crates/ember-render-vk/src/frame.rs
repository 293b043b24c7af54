// SPDX-License-Identifier: CEPL-1.0
//! Double-buffered frame slots: acquire, record, submit, present.
//!
//! Slot `i` is only re-recorded after its fence has signaled, so at most
//! [`FRAMES_IN_FLIGHT`] frames are queued on the GPU. The slot index advances
//! by one per presented frame, independently of which swapchain image the
//! presentation engine hands out.

use ash::vk;
use ember_render::{FrameSchedule, FRAMES_IN_FLIGHT};

use crate::device::Gpu;
use crate::error::{Result, VkError, VkResultExt};
use crate::swapchain::Swapchain;

pub struct FrameSlot {
    pub cmd: vk::CommandBuffer,
    pub image_acquired: vk::Semaphore,
    pub ready_to_present: vk::Semaphore,
    pub in_flight: vk::Fence,
}

/// The swapchain image a frame renders into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    pub image_index: u32,
    pub slot: usize,
    pub suboptimal: bool,
}

pub struct FrameOrchestrator {
    pool: vk::CommandPool,
    slots: Vec<FrameSlot>,
    schedule: FrameSchedule,
}

fn color_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

impl FrameOrchestrator {
    /// No slots and no pool; `destroy` and `wait_all` are no-ops on it.
    pub fn empty() -> Self {
        Self {
            pool: vk::CommandPool::null(),
            slots: Vec::new(),
            schedule: FrameSchedule::new(FRAMES_IN_FLIGHT),
        }
    }

    pub fn new(gpu: &Gpu) -> Result<Self> {
        let d = &gpu.device;
        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: gpu.queue_family,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        // SAFETY: valid create info on a live device.
        let pool = unsafe { d.create_command_pool(&pool_info, None) }
            .during("vkCreateCommandPool")?;
        let mut out = Self {
            pool,
            slots: Vec::with_capacity(FRAMES_IN_FLIGHT),
            schedule: FrameSchedule::new(FRAMES_IN_FLIGHT),
        };
        if let Err(e) = out.create_slots(gpu) {
            out.destroy(gpu);
            return Err(e);
        }
        Ok(out)
    }

    fn create_slots(&mut self, gpu: &Gpu) -> Result<()> {
        let d = &gpu.device;
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: FRAMES_IN_FLIGHT as u32,
            ..Default::default()
        };
        // SAFETY: pool belongs to this device.
        let cmds = unsafe { d.allocate_command_buffers(&alloc_info) }
            .during("vkAllocateCommandBuffers")?;

        let sem_ci = vk::SemaphoreCreateInfo::default();
        let fence_ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        for cmd in cmds {
            // SAFETY: plain create calls; partially built slots are cleaned up by `destroy`.
            unsafe {
                let image_acquired = d.create_semaphore(&sem_ci, None).during("vkCreateSemaphore")?;
                let ready_to_present = match d.create_semaphore(&sem_ci, None) {
                    Ok(s) => s,
                    Err(e) => {
                        d.destroy_semaphore(image_acquired, None);
                        return Err::<(), _>(e).during("vkCreateSemaphore");
                    }
                };
                let in_flight = match d.create_fence(&fence_ci, None) {
                    Ok(f) => f,
                    Err(e) => {
                        d.destroy_semaphore(image_acquired, None);
                        d.destroy_semaphore(ready_to_present, None);
                        return Err::<(), _>(e).during("vkCreateFence");
                    }
                };
                self.slots.push(FrameSlot {
                    cmd,
                    image_acquired,
                    ready_to_present,
                    in_flight,
                });
            }
        }
        Ok(())
    }

    pub fn schedule(&self) -> &FrameSchedule {
        &self.schedule
    }

    pub fn schedule_mut(&mut self) -> &mut FrameSchedule {
        &mut self.schedule
    }

    pub fn current_slot(&self) -> usize {
        self.schedule.current()
    }

    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.slots[self.schedule.current()].cmd
    }

    /// Waits for the slot, acquires an image and opens the slot's command buffer
    /// with the image transitioned for color output.
    pub fn begin(&mut self, gpu: &Gpu, swapchain: &Swapchain) -> Result<AcquiredImage> {
        let slot = self.schedule.begin()?;
        match self.begin_slot(gpu, swapchain, slot) {
            Ok(acquired) => {
                self.schedule.acquired()?;
                Ok(acquired)
            }
            Err(e) => {
                self.schedule.abort();
                Err(e)
            }
        }
    }

    fn begin_slot(&self, gpu: &Gpu, swapchain: &Swapchain, slot: usize) -> Result<AcquiredImage> {
        let d = &gpu.device;
        let s = &self.slots[slot];

        // SAFETY: fence and semaphore belong to this device; the swapchain is live.
        let (image_index, suboptimal) = unsafe {
            d.wait_for_fences(&[s.in_flight], true, u64::MAX)
                .during("vkWaitForFences")?;
            gpu.swapchain_loader
                .acquire_next_image(
                    swapchain.swapchain,
                    u64::MAX,
                    s.image_acquired,
                    vk::Fence::null(),
                )
                .during("vkAcquireNextImageKHR")?
        };
        if suboptimal {
            tracing::debug!(image_index, "swapchain suboptimal");
        }

        // SAFETY: the fence wait above guarantees the command buffer is idle.
        unsafe {
            d.reset_command_buffer(s.cmd, vk::CommandBufferResetFlags::empty())
                .during("vkResetCommandBuffer")?;
            let begin = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                ..Default::default()
            };
            d.begin_command_buffer(s.cmd, &begin)
                .during("vkBeginCommandBuffer")?;

            let to_color = vk::ImageMemoryBarrier2 {
                s_type: vk::StructureType::IMAGE_MEMORY_BARRIER_2,
                src_stage_mask: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                src_access_mask: vk::AccessFlags2::empty(),
                dst_stage_mask: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                dst_access_mask: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags2::COLOR_ATTACHMENT_READ,
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                image: swapchain.images[image_index as usize],
                subresource_range: color_range(),
                ..Default::default()
            };
            let dep = vk::DependencyInfo {
                s_type: vk::StructureType::DEPENDENCY_INFO,
                image_memory_barrier_count: 1,
                p_image_memory_barriers: &to_color,
                ..Default::default()
            };
            d.cmd_pipeline_barrier2(s.cmd, &dep);

            // Last fallible step: any earlier failure leaves the fence signaled.
            d.reset_fences(&[s.in_flight]).during("vkResetFences")?;
        }

        Ok(AcquiredImage {
            image_index,
            slot,
            suboptimal,
        })
    }

    /// Closes the command buffer, submits it and presents the image.
    ///
    /// An out-of-date surface at present still counts as a finished frame:
    /// the slot advances and `SurfaceOutOfDate` is returned.
    pub fn end(&mut self, gpu: &Gpu, swapchain: &Swapchain, image: &AcquiredImage) -> Result<()> {
        if image.slot != self.schedule.current() {
            return Err(VkError::Unsupported(format!(
                "image acquired for slot {} ended on slot {}",
                image.slot,
                self.schedule.current()
            )));
        }
        self.schedule.check_submit()?;

        let d = &gpu.device;
        let s = &self.slots[image.slot];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];

        // SAFETY: `s.cmd` is recording and targets a live swapchain image.
        unsafe {
            let to_present = vk::ImageMemoryBarrier2 {
                s_type: vk::StructureType::IMAGE_MEMORY_BARRIER_2,
                src_stage_mask: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                src_access_mask: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
                dst_stage_mask: vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
                dst_access_mask: vk::AccessFlags2::empty(),
                old_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
                image: swapchain.images[image.image_index as usize],
                subresource_range: color_range(),
                ..Default::default()
            };
            let dep = vk::DependencyInfo {
                s_type: vk::StructureType::DEPENDENCY_INFO,
                image_memory_barrier_count: 1,
                p_image_memory_barriers: &to_present,
                ..Default::default()
            };
            d.cmd_pipeline_barrier2(s.cmd, &dep);
            d.end_command_buffer(s.cmd).during("vkEndCommandBuffer")?;

            let submit = vk::SubmitInfo {
                s_type: vk::StructureType::SUBMIT_INFO,
                wait_semaphore_count: 1,
                p_wait_semaphores: &s.image_acquired,
                p_wait_dst_stage_mask: wait_stages.as_ptr(),
                command_buffer_count: 1,
                p_command_buffers: &s.cmd,
                signal_semaphore_count: 1,
                p_signal_semaphores: &s.ready_to_present,
                ..Default::default()
            };
            d.queue_submit(gpu.queue, std::slice::from_ref(&submit), s.in_flight)
                .during("vkQueueSubmit")?;
        }
        self.schedule.submitted()?;

        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &s.ready_to_present,
            swapchain_count: 1,
            p_swapchains: &swapchain.swapchain,
            p_image_indices: &image.image_index,
            ..Default::default()
        };
        // SAFETY: pointers in `present` outlive the call.
        let presented = unsafe { gpu.swapchain_loader.queue_present(gpu.queue, &present) }
            .during("vkQueuePresentKHR");

        match presented {
            Ok(_) => {
                self.schedule.presented()?;
                Ok(())
            }
            Err(VkError::SurfaceOutOfDate) => {
                self.schedule.presented()?;
                Err(VkError::SurfaceOutOfDate)
            }
            Err(e) => Err(e),
        }
    }

    /// Blocks until every slot's last submission has finished. Slots whose
    /// fence was reset without a submission are skipped.
    pub fn wait_all(&self, gpu: &Gpu) {
        let fences: Vec<_> = self
            .slots
            .iter()
            .enumerate()
            .filter(|&(i, _)| self.schedule.fence_signals(i))
            .map(|(_, s)| s.in_flight)
            .collect();
        if fences.is_empty() {
            return;
        }
        // SAFETY: fences belong to this device.
        if let Err(e) = unsafe { gpu.device.wait_for_fences(&fences, true, u64::MAX) } {
            tracing::warn!("waiting for frame fences: {e:?}");
        }
    }

    pub fn destroy(&mut self, gpu: &Gpu) {
        let d = &gpu.device;
        // SAFETY: the caller waited for the device to go idle.
        unsafe {
            for s in self.slots.drain(..) {
                d.destroy_fence(s.in_flight, None);
                d.destroy_semaphore(s.ready_to_present, None);
                d.destroy_semaphore(s.image_acquired, None);
            }
            // Frees the command buffers with it.
            d.destroy_command_pool(self.pool, None);
        }
        self.pool = vk::CommandPool::null();
    }
}

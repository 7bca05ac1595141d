// SPDX-License-Identifier: CEPL-1.0
//! Per-slot GPU objects of the frame ring.
use std::ptr::NonNull;

use ash::vk;

use crate::device::Device;
use crate::error::{Error, Result, VkContext};
use crate::memory::GpuBuffer;

/// Host-visible, host-coherent buffer mapped for its whole lifetime.
pub struct UniformBuffer {
    pub buffer: GpuBuffer,
    mapped: Option<NonNull<u8>>,
}

impl UniformBuffer {
    unsafe fn new(device: &Device, size: vk::DeviceSize) -> Result<Self> {
        let buffer = GpuBuffer::new(
            device,
            size,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            &(vk::SharingMode::EXCLUSIVE, Vec::new()),
        )?;
        let mapped = device
            .logical
            .map_memory(buffer.memory, 0, size, vk::MemoryMapFlags::empty())
            .map(|p| NonNull::new(p.cast::<u8>()));
        match mapped {
            Ok(mapped) => Ok(Self { buffer, mapped }),
            Err(result) => {
                buffer.destroy(&device.logical);
                Err(Error::Vulkan {
                    op: "map_memory",
                    result,
                })
            }
        }
    }

    /// `None` once the buffer is unmapped.
    pub fn bytes_mut(&mut self) -> Option<&mut [u8]> {
        let ptr = self.mapped?;
        // SAFETY: the mapping covers `size` bytes until `destroy`, and
        // `&mut self` keeps the slice unique.
        Some(unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), self.buffer.size as usize) })
    }

    unsafe fn destroy(&mut self, device: &ash::Device) {
        // free_memory unmaps implicitly
        self.mapped = None;
        self.buffer.destroy(device);
    }
}

pub struct FrameSlot {
    pub command_buffer: vk::CommandBuffer,
    pub image_acquired: vk::Semaphore,
    pub render_complete: vk::Semaphore,
    /// Created signaled so the first wait on a fresh slot returns at once.
    pub in_flight: vk::Fence,
    pub uniforms: Option<UniformBuffer>,
}

impl FrameSlot {
    pub unsafe fn new(device: &Device, uniform_size: vk::DeviceSize) -> Result<Self> {
        let mut slot = Self {
            command_buffer: vk::CommandBuffer::null(),
            image_acquired: vk::Semaphore::null(),
            render_complete: vk::Semaphore::null(),
            in_flight: vk::Fence::null(),
            uniforms: None,
        };
        if let Err(e) = slot.create(device, uniform_size) {
            slot.destroy(device);
            return Err(e);
        }
        Ok(slot)
    }

    unsafe fn create(&mut self, device: &Device, uniform_size: vk::DeviceSize) -> Result<()> {
        let d = &device.logical;
        let cb_ai = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: device.render_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };
        self.command_buffer = d
            .allocate_command_buffers(&cb_ai)
            .context("allocate_command_buffers")?
            .first()
            .copied()
            .unwrap_or_default();

        let sem_ci = vk::SemaphoreCreateInfo::default();
        self.image_acquired = d.create_semaphore(&sem_ci, None).context("create_semaphore")?;
        self.render_complete = d.create_semaphore(&sem_ci, None).context("create_semaphore")?;

        let fence_ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        self.in_flight = d.create_fence(&fence_ci, None).context("create_fence")?;
        self.uniforms = Some(UniformBuffer::new(device, uniform_size)?);
        Ok(())
    }

    pub fn uniform_bytes(&mut self) -> Option<&mut [u8]> {
        self.uniforms.as_mut().and_then(UniformBuffer::bytes_mut)
    }

    pub fn uniform_buffer(&self) -> vk::Buffer {
        self.uniforms
            .as_ref()
            .map_or(vk::Buffer::null(), |u| u.buffer.buffer)
    }

    /// Caller guarantees the slot's fence has signaled (or the device is idle).
    pub unsafe fn destroy(&mut self, device: &Device) {
        let d = &device.logical;
        if let Some(mut u) = self.uniforms.take() {
            u.destroy(d);
        }
        d.destroy_fence(self.in_flight, None);
        d.destroy_semaphore(self.render_complete, None);
        d.destroy_semaphore(self.image_acquired, None);
        if self.command_buffer != vk::CommandBuffer::null() {
            d.free_command_buffers(device.render_pool, &[self.command_buffer]);
        }
        self.in_flight = vk::Fence::null();
        self.render_complete = vk::Semaphore::null();
        self.image_acquired = vk::Semaphore::null();
        self.command_buffer = vk::CommandBuffer::null();
    }
}

// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::device::Device;
use crate::error::{Error, Result, VkContext};

/// First memory type allowed by `type_bits` that has every `required` flag.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32> {
    (0..props.memory_type_count)
        .find(|&i| {
            type_bits & (1 << i) != 0
                && props.memory_types[i as usize]
                    .property_flags
                    .contains(required)
        })
        .ok_or(Error::NoMemoryType(required))
}

unsafe fn allocate(
    device: &Device,
    req: vk::MemoryRequirements,
    props: vk::MemoryPropertyFlags,
) -> Result<vk::DeviceMemory> {
    let mai = vk::MemoryAllocateInfo {
        s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
        allocation_size: req.size,
        memory_type_index: find_memory_type(&device.memory, req.memory_type_bits, props)?,
        ..Default::default()
    };
    device
        .logical
        .allocate_memory(&mai, None)
        .context("allocate_memory")
}

pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl GpuBuffer {
    pub unsafe fn new(
        device: &Device,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        props: vk::MemoryPropertyFlags,
        sharing: &(vk::SharingMode, Vec<u32>),
    ) -> Result<Self> {
        let d = &device.logical;
        let bci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size: size.max(1),
            usage,
            sharing_mode: sharing.0,
            queue_family_index_count: sharing.1.len() as u32,
            p_queue_family_indices: sharing.1.as_ptr(),
            ..Default::default()
        };
        let buffer = d.create_buffer(&bci, None).context("create_buffer")?;
        let req = d.get_buffer_memory_requirements(buffer);
        let memory = match allocate(device, req, props) {
            Ok(m) => m,
            Err(e) => {
                d.destroy_buffer(buffer, None);
                return Err(e);
            }
        };
        let out = Self {
            buffer,
            memory,
            size,
        };
        if let Err(e) = d.bind_buffer_memory(buffer, memory, 0) {
            out.destroy(d);
            return Err(Error::Vulkan {
                op: "bind_buffer_memory",
                result: e,
            });
        }
        Ok(out)
    }

    /// Host-visible, host-coherent buffer only: map, copy, unmap.
    pub unsafe fn write(&self, device: &ash::Device, bytes: &[u8]) -> Result<()> {
        let ptr = device
            .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
            .context("map_memory")?;
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len().min(self.size as usize));
        device.unmap_memory(self.memory);
        Ok(())
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_buffer(self.buffer, None);
        device.free_memory(self.memory, None);
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ImageSpec {
    pub width: u32,
    pub height: u32,
    pub format: vk::Format,
    pub mip_levels: u32,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
}

/// Device-local image, its memory and a view over every mip level.
pub struct GpuImage {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub spec: ImageSpec,
}

pub unsafe fn create_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
    mip_levels: u32,
) -> Result<vk::ImageView> {
    let view_ci = vk::ImageViewCreateInfo {
        s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
        image,
        view_type: vk::ImageViewType::TYPE_2D,
        format,
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: mip_levels,
            base_array_layer: 0,
            layer_count: 1,
        },
        ..Default::default()
    };
    device
        .create_image_view(&view_ci, None)
        .context("create_image_view")
}

impl GpuImage {
    pub unsafe fn new(
        device: &Device,
        spec: ImageSpec,
        sharing: &(vk::SharingMode, Vec<u32>),
    ) -> Result<Self> {
        let d = &device.logical;
        let img_ci = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format: spec.format,
            extent: vk::Extent3D {
                width: spec.width,
                height: spec.height,
                depth: 1,
            },
            mip_levels: spec.mip_levels,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: spec.usage,
            sharing_mode: sharing.0,
            queue_family_index_count: sharing.1.len() as u32,
            p_queue_family_indices: sharing.1.as_ptr(),
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let image = d.create_image(&img_ci, None).context("create_image")?;
        let req = d.get_image_memory_requirements(image);
        let memory = match allocate(device, req, vk::MemoryPropertyFlags::DEVICE_LOCAL) {
            Ok(m) => m,
            Err(e) => {
                d.destroy_image(image, None);
                return Err(e);
            }
        };
        let mut out = Self {
            image,
            memory,
            view: vk::ImageView::null(),
            spec,
        };
        let bound = d
            .bind_image_memory(image, memory, 0)
            .context("bind_image_memory")
            .and_then(|()| create_view(d, image, spec.format, spec.aspect, spec.mip_levels));
        match bound {
            Ok(view) => {
                out.view = view;
                Ok(out)
            }
            Err(e) => {
                out.destroy(d);
                Err(e)
            }
        }
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        if self.view != vk::ImageView::null() {
            device.destroy_image_view(self.view, None);
        }
        device.destroy_image(self.image, None);
        device.free_memory(self.memory, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut p = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (slot, &f) in p.memory_types.iter_mut().zip(flags) {
            slot.property_flags = f;
        }
        p
    }

    #[test]
    fn picks_first_allowed_type_with_all_flags() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let p = props(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            host,
            host | vk::MemoryPropertyFlags::HOST_CACHED,
        ]);
        assert_eq!(find_memory_type(&p, 0b1111, host).unwrap(), 2);
        // Type 2 masked out by the resource's requirements.
        assert_eq!(find_memory_type(&p, 0b1011, host).unwrap(), 3);
        assert_eq!(
            find_memory_type(&p, 0b1111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            0
        );
    }

    #[test]
    fn no_match_is_an_error() {
        let p = props(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        assert!(matches!(
            find_memory_type(&p, 0b1, vk::MemoryPropertyFlags::HOST_VISIBLE),
            Err(Error::NoMemoryType(_))
        ));
        // Allowed bits beyond memory_type_count are ignored.
        assert!(find_memory_type(&p, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL).is_err());
    }
}

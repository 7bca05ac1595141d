// SPDX-License-Identifier: CEPL-1.0
//! Blocking staging uploads on the transfer queue.
//!
//! Every call records into a one-shot command buffer from the transient
//! pool, submits it, and waits for the transfer queue to drain before
//! returning. Meant for load time, not the steady-state frame loop.
use ash::vk;
use prism_render::{mip_chain, ImageData};
use tracing::debug;

use crate::device::Device;
use crate::error::{Error, Result, VkContext};
use crate::memory::{GpuBuffer, GpuImage, ImageSpec};

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Access masks and pipeline stages for one image layout change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

pub fn layout_transition(from: vk::ImageLayout, to: vk::ImageLayout) -> Result<Transition> {
    use vk::AccessFlags as A;
    use vk::ImageLayout as L;
    use vk::PipelineStageFlags as S;

    let (src_access, dst_access, src_stage, dst_stage) = match (from, to) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => {
            (A::empty(), A::TRANSFER_WRITE, S::TOP_OF_PIPE, S::TRANSFER)
        }
        (L::TRANSFER_DST_OPTIMAL, L::TRANSFER_SRC_OPTIMAL) => {
            (A::TRANSFER_WRITE, A::TRANSFER_READ, S::TRANSFER, S::TRANSFER)
        }
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => {
            (A::TRANSFER_WRITE, A::SHADER_READ, S::TRANSFER, S::FRAGMENT_SHADER)
        }
        (L::TRANSFER_SRC_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => {
            (A::TRANSFER_READ, A::SHADER_READ, S::TRANSFER, S::FRAGMENT_SHADER)
        }
        (L::SHADER_READ_ONLY_OPTIMAL, L::TRANSFER_DST_OPTIMAL) => {
            (A::SHADER_READ, A::TRANSFER_WRITE, S::FRAGMENT_SHADER, S::TRANSFER)
        }
        (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => (
            A::empty(),
            A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
            S::TOP_OF_PIPE,
            S::EARLY_FRAGMENT_TESTS,
        ),
        _ => return Err(Error::UnsupportedLayoutTransition { from, to }),
    };
    Ok(Transition {
        src_access,
        dst_access,
        src_stage,
        dst_stage,
    })
}

#[allow(clippy::too_many_arguments)]
unsafe fn transition_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    base_mip_level: u32,
    level_count: u32,
    from: vk::ImageLayout,
    to: vk::ImageLayout,
) -> Result<()> {
    let t = layout_transition(from, to)?;
    let barrier = vk::ImageMemoryBarrier {
        s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
        src_access_mask: t.src_access,
        dst_access_mask: t.dst_access,
        old_layout: from,
        new_layout: to,
        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        image,
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level,
            level_count,
            base_array_layer: 0,
            layer_count: 1,
        },
        ..Default::default()
    };
    device.cmd_pipeline_barrier(
        cmd,
        t.src_stage,
        t.dst_stage,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        std::slice::from_ref(&barrier),
    );
    Ok(())
}

/// Allocate, record, submit to the transfer queue, wait idle, free.
unsafe fn one_shot<F>(device: &Device, record: F) -> Result<()>
where
    F: FnOnce(&ash::Device, vk::CommandBuffer) -> Result<()>,
{
    let d = &device.logical;
    let ai = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool: device.transfer_pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: 1,
        ..Default::default()
    };
    let cmd = d
        .allocate_command_buffers(&ai)
        .context("allocate_command_buffers")?
        .first()
        .copied()
        .unwrap_or_default();

    let run = || -> Result<()> {
        let bi = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        d.begin_command_buffer(cmd, &bi)
            .context("begin_command_buffer")?;
        record(d, cmd)?;
        d.end_command_buffer(cmd).context("end_command_buffer")?;

        let si = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            ..Default::default()
        };
        d.queue_submit(device.transfer_queue, std::slice::from_ref(&si), vk::Fence::null())
            .context("queue_submit (transfer)")?;
        d.queue_wait_idle(device.transfer_queue)
            .context("queue_wait_idle (transfer)")
    };
    let result = run();
    d.free_command_buffers(device.transfer_pool, std::slice::from_ref(&cmd));
    result
}

unsafe fn staging_buffer(device: &Device, bytes: &[u8]) -> Result<GpuBuffer> {
    let staging = GpuBuffer::new(
        device,
        bytes.len() as vk::DeviceSize,
        vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        &(vk::SharingMode::EXCLUSIVE, Vec::new()),
    )?;
    if let Err(e) = staging.write(&device.logical, bytes) {
        staging.destroy(&device.logical);
        return Err(e);
    }
    Ok(staging)
}

/// Device-local buffer holding `bytes`, readable by `usage`.
pub unsafe fn upload_buffer(
    device: &Device,
    bytes: &[u8],
    usage: vk::BufferUsageFlags,
) -> Result<GpuBuffer> {
    let size = bytes.len() as vk::DeviceSize;
    let staging = staging_buffer(device, bytes)?;
    let dst = match GpuBuffer::new(
        device,
        size,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
        &device.resource_sharing(),
    ) {
        Ok(b) => b,
        Err(e) => {
            staging.destroy(&device.logical);
            return Err(e);
        }
    };

    let copied = one_shot(device, |d, cmd| {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        d.cmd_copy_buffer(cmd, staging.buffer, dst.buffer, std::slice::from_ref(&region));
        Ok(())
    });
    staging.destroy(&device.logical);
    match copied {
        Ok(()) => Ok(dst),
        Err(e) => {
            dst.destroy(&device.logical);
            Err(e)
        }
    }
}

/// Sampled RGBA8 sRGB image with a full blit-generated mip chain, left in
/// `SHADER_READ_ONLY_OPTIMAL`.
pub unsafe fn upload_image(device: &Device, data: &ImageData) -> Result<GpuImage> {
    let levels = data.mip_levels();
    if levels > 1 && !device.supports_linear_blit(TEXTURE_FORMAT) {
        return Err(Error::LinearFilterUnsupported(TEXTURE_FORMAT));
    }

    let staging = staging_buffer(device, data.pixels())?;
    let spec = ImageSpec {
        width: data.width(),
        height: data.height(),
        format: TEXTURE_FORMAT,
        mip_levels: levels,
        usage: vk::ImageUsageFlags::TRANSFER_SRC
            | vk::ImageUsageFlags::TRANSFER_DST
            | vk::ImageUsageFlags::SAMPLED,
        aspect: vk::ImageAspectFlags::COLOR,
    };
    let image = match GpuImage::new(device, spec, &device.resource_sharing()) {
        Ok(i) => i,
        Err(e) => {
            staging.destroy(&device.logical);
            return Err(e);
        }
    };

    let recorded = one_shot(device, |d, cmd| {
        record_image_upload(d, cmd, staging.buffer, &image)
    });
    staging.destroy(&device.logical);
    match recorded {
        Ok(()) => {
            debug!(
                "uploaded {}x{} texture, {} mip levels",
                spec.width, spec.height, levels
            );
            Ok(image)
        }
        Err(e) => {
            image.destroy(&device.logical);
            Err(e)
        }
    }
}

// STRICT ORDER:
// 1) all levels UNDEFINED -> TRANSFER_DST
// 2) staging -> level 0
// 3) per level k: k-1 DST -> SRC, blit k-1 -> k, k-1 SRC -> SHADER_READ
// 4) last level DST -> SHADER_READ
unsafe fn record_image_upload(
    d: &ash::Device,
    cmd: vk::CommandBuffer,
    staging: vk::Buffer,
    image: &GpuImage,
) -> Result<()> {
    use vk::ImageLayout as L;
    let color = vk::ImageAspectFlags::COLOR;
    let spec = image.spec;
    let layers = |mip_level| vk::ImageSubresourceLayers {
        aspect_mask: color,
        mip_level,
        base_array_layer: 0,
        layer_count: 1,
    };

    transition_image(
        d,
        cmd,
        image.image,
        color,
        0,
        spec.mip_levels,
        L::UNDEFINED,
        L::TRANSFER_DST_OPTIMAL,
    )?;

    let copy = vk::BufferImageCopy {
        buffer_offset: 0,
        buffer_row_length: 0,
        buffer_image_height: 0,
        image_subresource: layers(0),
        image_offset: vk::Offset3D::default(),
        image_extent: vk::Extent3D {
            width: spec.width,
            height: spec.height,
            depth: 1,
        },
    };
    d.cmd_copy_buffer_to_image(
        cmd,
        staging,
        image.image,
        L::TRANSFER_DST_OPTIMAL,
        std::slice::from_ref(&copy),
    );

    for step in mip_chain(spec.width, spec.height, spec.mip_levels) {
        let src_level = step.level - 1;
        transition_image(
            d,
            cmd,
            image.image,
            color,
            src_level,
            1,
            L::TRANSFER_DST_OPTIMAL,
            L::TRANSFER_SRC_OPTIMAL,
        )?;
        let blit = vk::ImageBlit {
            src_subresource: layers(src_level),
            src_offsets: [
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: step.src.0 as i32,
                    y: step.src.1 as i32,
                    z: 1,
                },
            ],
            dst_subresource: layers(step.level),
            dst_offsets: [
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: step.dst.0 as i32,
                    y: step.dst.1 as i32,
                    z: 1,
                },
            ],
        };
        d.cmd_blit_image(
            cmd,
            image.image,
            L::TRANSFER_SRC_OPTIMAL,
            image.image,
            L::TRANSFER_DST_OPTIMAL,
            std::slice::from_ref(&blit),
            vk::Filter::LINEAR,
        );
        transition_image(
            d,
            cmd,
            image.image,
            color,
            src_level,
            1,
            L::TRANSFER_SRC_OPTIMAL,
            L::SHADER_READ_ONLY_OPTIMAL,
        )?;
    }

    transition_image(
        d,
        cmd,
        image.image,
        color,
        spec.mip_levels - 1,
        1,
        L::TRANSFER_DST_OPTIMAL,
        L::SHADER_READ_ONLY_OPTIMAL,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use vk::ImageLayout as L;

    #[test]
    fn mip_generation_path_is_supported() {
        for (from, to) in [
            (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL),
            (L::TRANSFER_DST_OPTIMAL, L::TRANSFER_SRC_OPTIMAL),
            (L::TRANSFER_SRC_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL),
            (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL),
        ] {
            assert!(layout_transition(from, to).is_ok(), "{from:?} -> {to:?}");
        }
    }

    #[test]
    fn blit_read_waits_for_copy_write() {
        let t = layout_transition(L::TRANSFER_DST_OPTIMAL, L::TRANSFER_SRC_OPTIMAL).unwrap();
        assert_eq!(t.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(t.dst_access, vk::AccessFlags::TRANSFER_READ);
        assert_eq!(t.src_stage, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(t.dst_stage, vk::PipelineStageFlags::TRANSFER);
    }

    #[test]
    fn shader_read_gates_the_fragment_stage() {
        let t = layout_transition(L::TRANSFER_SRC_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL).unwrap();
        assert_eq!(t.dst_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(t.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn depth_attachment_from_undefined() {
        let t = layout_transition(L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL).unwrap();
        assert!(t.src_access.is_empty());
        assert_eq!(t.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(t.dst_stage, vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS);
    }

    #[test]
    fn unknown_pairs_are_rejected() {
        for (from, to) in [
            (L::SHADER_READ_ONLY_OPTIMAL, L::UNDEFINED),
            (L::PRESENT_SRC_KHR, L::TRANSFER_DST_OPTIMAL),
            (L::TRANSFER_SRC_OPTIMAL, L::TRANSFER_DST_OPTIMAL),
        ] {
            assert!(matches!(
                layout_transition(from, to),
                Err(Error::UnsupportedLayoutTransition { .. })
            ));
        }
    }
}

// SPDX-License-Identifier: CEPL-1.0
//! Vulkan side of the surface chain: selection policies and the
//! [`ChainBackend`] the generic rebuild protocol drives.
use ash::vk;
use prism_render::{ChainBackend, RenderSize, SwapchainParts};
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{Error, Result, VkContext};
use crate::memory::{create_view, GpuImage, ImageSpec};

pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

/// MAILBOX when offered, otherwise FIFO, which every surface supports.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: window
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: window
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// One more than the minimum; `max_image_count == 0` means unbounded.
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = caps.min_image_count + 1;
    if caps.max_image_count == 0 {
        wanted
    } else {
        wanted.min(caps.max_image_count)
    }
}

pub fn sharing_mode(graphics: u32, present: u32) -> (vk::SharingMode, Vec<u32>) {
    if graphics == present {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (vk::SharingMode::CONCURRENT, vec![graphics, present])
    }
}

pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
}

impl SwapchainParts for Swapchain {
    type Image = vk::Image;
    type Format = vk::Format;

    fn images(&self) -> &[vk::Image] {
        &self.images
    }

    fn format(&self) -> vk::Format {
        self.format.format
    }

    fn size(&self) -> RenderSize {
        RenderSize::new(self.extent.width, self.extent.height)
    }
}

/// Color load=clear/store=keep, depth load=clear/store=discard.
unsafe fn create_render_pass(
    device: &ash::Device,
    color_format: vk::Format,
    depth_format: vk::Format,
) -> Result<vk::RenderPass> {
    let attachments = [
        vk::AttachmentDescription {
            format: color_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Default::default()
        },
        vk::AttachmentDescription {
            format: depth_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ..Default::default()
        },
    ];
    let color_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let depth_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &color_ref,
        p_depth_stencil_attachment: &depth_ref,
        ..Default::default()
    };
    // External -> 0: the acquire semaphore wait happens at color output, and
    // the previous frame's depth writes must land before this frame clears.
    let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    let dependency = vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: stages,
        dst_stage_mask: stages,
        src_access_mask: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ..Default::default()
    };
    let ci = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: attachments.len() as u32,
        p_attachments: attachments.as_ptr(),
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: 1,
        p_dependencies: &dependency,
        ..Default::default()
    };
    device
        .create_render_pass(&ci, None)
        .context("create_render_pass")
}

impl ChainBackend for Device {
    type Error = Error;
    type Swapchain = Swapchain;
    type View = vk::ImageView;
    type RenderTarget = vk::RenderPass;
    type Depth = GpuImage;
    type Framebuffer = vk::Framebuffer;

    fn wait_idle(&mut self) -> Result<()> {
        unsafe { self.logical.device_wait_idle() }.context("device_wait_idle")
    }

    fn create_swapchain(&mut self, window: RenderSize) -> Result<Swapchain> {
        unsafe {
            let caps = self
                .surface_loader
                .get_physical_device_surface_capabilities(self.physical, self.surface)
                .context("get_physical_device_surface_capabilities")?;
            let formats = self
                .surface_loader
                .get_physical_device_surface_formats(self.physical, self.surface)
                .context("get_physical_device_surface_formats")?;
            let modes = self
                .surface_loader
                .get_physical_device_surface_present_modes(self.physical, self.surface)
                .context("get_physical_device_surface_present_modes")?;

            let format = choose_surface_format(&formats).ok_or(Error::SurfaceLost)?;
            let present_mode = choose_present_mode(&modes);
            let extent = choose_extent(&caps, window);
            let min_image_count = choose_image_count(&caps);
            let (sharing, families) = sharing_mode(self.families.graphics, self.families.present);
            debug!(
                "swapchain request: {:?}/{:?} {:?} {}x{} min_images={}",
                format.format,
                format.color_space,
                present_mode,
                extent.width,
                extent.height,
                min_image_count
            );

            let pre_transform = if caps
                .supported_transforms
                .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
            {
                vk::SurfaceTransformFlagsKHR::IDENTITY
            } else {
                caps.current_transform
            };

            let ci = vk::SwapchainCreateInfoKHR {
                s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
                surface: self.surface,
                min_image_count,
                image_format: format.format,
                image_color_space: format.color_space,
                image_extent: extent,
                image_array_layers: 1,
                image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
                image_sharing_mode: sharing,
                queue_family_index_count: families.len() as u32,
                p_queue_family_indices: families.as_ptr(),
                pre_transform,
                composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
                present_mode,
                clipped: vk::TRUE,
                ..Default::default()
            };
            let handle = self
                .swapchain_loader
                .create_swapchain(&ci, None)
                .context("create_swapchain")?;
            let images = match self.swapchain_loader.get_swapchain_images(handle) {
                Ok(images) => images,
                Err(result) => {
                    self.swapchain_loader.destroy_swapchain(handle, None);
                    return Err(Error::Vulkan {
                        op: "get_swapchain_images",
                        result,
                    });
                }
            };
            info!(
                "swapchain: {:?} {:?}, {} images",
                format.format,
                present_mode,
                images.len()
            );
            Ok(Swapchain {
                handle,
                images,
                format,
                present_mode,
                extent,
            })
        }
    }

    fn create_view(&mut self, swapchain: &Swapchain, image: vk::Image) -> Result<vk::ImageView> {
        unsafe {
            create_view(
                &self.logical,
                image,
                swapchain.format.format,
                vk::ImageAspectFlags::COLOR,
                1,
            )
        }
    }

    fn create_render_target(&mut self, swapchain: &Swapchain) -> Result<vk::RenderPass> {
        unsafe { create_render_pass(&self.logical, swapchain.format.format, self.depth_format) }
    }

    fn create_depth(&mut self, swapchain: &Swapchain) -> Result<GpuImage> {
        let spec = ImageSpec {
            width: swapchain.extent.width,
            height: swapchain.extent.height,
            format: self.depth_format,
            mip_levels: 1,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            aspect: vk::ImageAspectFlags::DEPTH,
        };
        unsafe { GpuImage::new(self, spec, &(vk::SharingMode::EXCLUSIVE, Vec::new())) }
    }

    fn create_framebuffer(
        &mut self,
        target: &vk::RenderPass,
        view: &vk::ImageView,
        depth: &GpuImage,
        size: RenderSize,
    ) -> Result<vk::Framebuffer> {
        let attachments = [*view, depth.view];
        let ci = vk::FramebufferCreateInfo {
            s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
            render_pass: *target,
            attachment_count: attachments.len() as u32,
            p_attachments: attachments.as_ptr(),
            width: size.width,
            height: size.height,
            layers: 1,
            ..Default::default()
        };
        unsafe { self.logical.create_framebuffer(&ci, None) }.context("create_framebuffer")
    }

    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer) {
        unsafe { self.logical.destroy_framebuffer(framebuffer, None) }
    }

    fn destroy_depth(&mut self, depth: GpuImage) {
        unsafe { depth.destroy(&self.logical) }
    }

    fn destroy_view(&mut self, view: vk::ImageView) {
        unsafe { self.logical.destroy_image_view(view, None) }
    }

    fn destroy_render_target(&mut self, target: vk::RenderPass) {
        unsafe { self.logical.destroy_render_pass(target, None) }
    }

    fn destroy_swapchain(&mut self, swapchain: Swapchain) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain.handle, None) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sf(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn caps(current: (u32, u32), min: (u32, u32), max: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: min.0,
                height: min.1,
            },
            max_image_extent: vk::Extent2D {
                width: max.0,
                height: max.1,
            },
            ..Default::default()
        }
    }

    fn pick(formats: &[vk::SurfaceFormatKHR]) -> Option<(vk::Format, vk::ColorSpaceKHR)> {
        choose_surface_format(formats).map(|f| (f.format, f.color_space))
    }

    #[test]
    fn prefers_bgra8_srgb_nonlinear() {
        let formats = [
            sf(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            sf(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
            sf(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            pick(&formats),
            Some((vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR))
        );
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [
            sf(vk::Format::A2B10G10R10_UNORM_PACK32, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            sf(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            pick(&formats),
            Some((vk::Format::A2B10G10R10_UNORM_PACK32, vk::ColorSpaceKHR::SRGB_NONLINEAR))
        );
        assert_eq!(pick(&[]), None);
    }

    #[test]
    fn mailbox_else_fifo() {
        use vk::PresentModeKHR as M;
        assert_eq!(choose_present_mode(&[M::FIFO, M::MAILBOX]), M::MAILBOX);
        assert_eq!(choose_present_mode(&[M::IMMEDIATE, M::FIFO]), M::FIFO);
        assert_eq!(choose_present_mode(&[]), M::FIFO);
    }

    #[test]
    fn fixed_extent_ignores_window() {
        let c = caps((800, 600), (1, 1), (4096, 4096));
        let e = choose_extent(&c, RenderSize::new(1920, 1080));
        assert_eq!((e.width, e.height), (800, 600));
    }

    #[test]
    fn undefined_extent_clamps_window() {
        let c = caps((u32::MAX, u32::MAX), (64, 64), (2048, 1024));
        let e = choose_extent(&c, RenderSize::new(4000, 10));
        assert_eq!((e.width, e.height), (2048, 64));
        let e = choose_extent(&c, RenderSize::new(640, 480));
        assert_eq!((e.width, e.height), (640, 480));
    }

    #[test]
    fn image_count_is_min_plus_one_clamped() {
        let mut c = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&c), 3);
        c.max_image_count = 8;
        assert_eq!(choose_image_count(&c), 3);
        c.max_image_count = 2;
        assert_eq!(choose_image_count(&c), 2);
    }

    #[test]
    fn sharing_follows_family_split() {
        assert_eq!(sharing_mode(0, 0), (vk::SharingMode::EXCLUSIVE, vec![]));
        assert_eq!(sharing_mode(0, 2), (vk::SharingMode::CONCURRENT, vec![0, 2]));
    }
}

// SPDX-License-Identifier: CEPL-1.0
//! The ash implementation of the frame and chain backends, plus ownership of
//! every device-resident resource.
use std::path::Path;

use ash::vk;
use prism_render::{
    Acquire, BindingKind, BindingTable, Bounds, FrameBackend, FrameMisuse, ImageData, MeshData,
    Present, RebuildOutcome, RenderSize, ShaderStages, SurfaceChain, TextureSlots, Uniforms,
    FRAMES_IN_FLIGHT, MAX_TEXTURES,
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use slotmap::SlotMap;
use tracing::{debug, info};

use crate::descriptors::DescriptorRegistry;
use crate::device::Device;
use crate::error::{Error, Result, VkContext};
use crate::instance::InstanceContext;
use crate::pipeline::{GpuPipeline, PipelineCache, PipelineDesc};
use crate::resources::{Mesh, MeshId, PipelineId, Texture, TextureId};
use crate::sync::FrameSlot;
use crate::RendererConfig;

// Field order is drop order: everything created from the device is released
// in `Drop`, then the device, then the instance and surface.
pub struct VkBackend {
    chain: Option<SurfaceChain<Device>>,
    slots: Vec<FrameSlot>,
    descriptors: Option<DescriptorRegistry>,
    pipelines: SlotMap<PipelineId, GpuPipeline>,
    pipeline_cache: Option<PipelineCache>,
    meshes: SlotMap<MeshId, Mesh>,
    textures: TextureSlots<Texture>,
    /// Bound to every free texture slot so the sampler array stays valid.
    fallback: Option<Texture>,
    window: RenderSize,
    device: Device,
    _instance: InstanceContext,
}

impl VkBackend {
    /// # Safety
    /// The window must outlive the backend.
    pub unsafe fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        cfg: &RendererConfig,
    ) -> Result<Self> {
        let instance = InstanceContext::new(window, display, cfg)?;
        let device = Device::open(&instance)?;
        let mut backend = Self {
            chain: None,
            slots: Vec::with_capacity(FRAMES_IN_FLIGHT),
            descriptors: None,
            pipelines: SlotMap::with_key(),
            pipeline_cache: None,
            meshes: SlotMap::with_key(),
            textures: TextureSlots::new(MAX_TEXTURES),
            fallback: None,
            window: size,
            device,
            _instance: instance,
        };
        // Partial init is unwound by Drop.
        backend.init(cfg.pipeline_cache.as_deref())?;
        Ok(backend)
    }

    // STRICT ORDER:
    // 1) surface chain (render pass needed by pipelines)
    // 2) frame slots with their uniform buffers
    // 3) descriptor registry, uniforms written once
    // 4) fallback texture, sampler array written
    // 5) pipeline cache
    unsafe fn init(&mut self, cache_dir: Option<&Path>) -> Result<()> {
        self.chain = Some(SurfaceChain::build(&mut self.device, self.window)?);

        let uniform_size = std::mem::size_of::<Uniforms>() as vk::DeviceSize;
        for _ in 0..FRAMES_IN_FLIGHT {
            let slot = FrameSlot::new(&self.device, uniform_size)?;
            self.slots.push(slot);
        }

        let mut table = BindingTable::new(MAX_TEXTURES as u32);
        table.register(BindingKind::UniformBuffer, ShaderStages::VERTEX);
        table.register(BindingKind::CombinedImageSampler, ShaderStages::FRAGMENT);
        let registry =
            DescriptorRegistry::new(&self.device.logical, table, FRAMES_IN_FLIGHT as u32)?;
        let buffers: Vec<vk::Buffer> = self.slots.iter().map(FrameSlot::uniform_buffer).collect();
        registry.write_uniforms(&self.device.logical, &buffers, uniform_size)?;
        self.descriptors = Some(registry);

        self.fallback = Some(Texture::upload(
            &self.device,
            &ImageData::solid(1, 1, [255, 255, 255, 255]),
        )?);
        self.write_texture_array()?;

        self.pipeline_cache = Some(PipelineCache::load(
            &self.device.logical,
            &self.device.properties,
            cache_dir,
        )?);
        info!(
            "renderer ready: {} frame slots, {} texture slots, {:?}",
            self.slots.len(),
            self.textures.capacity(),
            self.chain()?.swapchain().present_mode
        );
        Ok(())
    }

    fn chain(&self) -> Result<&SurfaceChain<Device>> {
        self.chain.as_ref().ok_or(Error::SurfaceLost)
    }

    fn registry(&self) -> Result<&DescriptorRegistry> {
        self.descriptors.as_ref().ok_or(Error::SurfaceLost)
    }

    fn slot(&self, slot: usize) -> Result<&FrameSlot> {
        self.slots
            .get(slot)
            .ok_or(Error::Misuse(FrameMisuse::UnknownHandle("frame slot")))
    }

    fn pipeline(&self, id: PipelineId) -> Result<&GpuPipeline> {
        self.pipelines
            .get(id)
            .ok_or(Error::Misuse(FrameMisuse::UnknownHandle("pipeline")))
    }

    /// Live window framebuffer size; used by the next chain rebuild.
    pub fn set_window_size(&mut self, size: RenderSize) {
        self.window = size;
    }

    pub fn surface_size(&self) -> RenderSize {
        self.chain
            .as_ref()
            .map_or(RenderSize::default(), SurfaceChain::size)
    }

    pub fn surface_format(&self) -> Option<vk::Format> {
        self.chain.as_ref().map(SurfaceChain::format)
    }

    /// Every live texture, free slots mapped to the fallback.
    unsafe fn write_texture_array(&self) -> Result<()> {
        let fallback = self
            .fallback
            .as_ref()
            .map(Texture::descriptor)
            .ok_or(Error::Misuse(FrameMisuse::UnknownHandle("fallback texture")))?;
        let infos: Vec<vk::DescriptorImageInfo> = self
            .textures
            .slots()
            .map(|t| t.map_or(fallback, Texture::descriptor))
            .collect();
        self.registry()?
            .write_textures(&self.device.logical, &infos)
    }

    pub fn create_pipeline(&mut self, desc: PipelineDesc) -> Result<PipelineId> {
        let render_pass = *self.chain()?.render_target();
        let set_layout = self.registry()?.layout;
        let cache = self
            .pipeline_cache
            .as_ref()
            .map_or(vk::PipelineCache::null(), |c| c.handle);
        let pipeline = unsafe {
            GpuPipeline::new(
                &self.device.logical,
                cache,
                render_pass,
                set_layout,
                desc,
                self.device.fill_mode_non_solid,
            )?
        };
        Ok(self.pipelines.insert(pipeline))
    }

    pub fn destroy_pipeline(&mut self, id: PipelineId) -> Result<()> {
        let pipeline = retire(
            "pipeline",
            self.pipelines.contains_key(id),
            || self.device.wait_idle(),
            || self.pipelines.remove(id),
        )?;
        unsafe { pipeline.destroy(&self.device.logical) };
        Ok(())
    }

    unsafe fn recreate_pipelines(&mut self) -> Result<()> {
        let render_pass = *self.chain()?.render_target();
        let cache = self
            .pipeline_cache
            .as_ref()
            .map_or(vk::PipelineCache::null(), |c| c.handle);
        for (_, p) in self.pipelines.iter_mut() {
            p.recreate(
                &self.device.logical,
                cache,
                render_pass,
                self.device.fill_mode_non_solid,
            )?;
        }
        debug!("recreated {} pipelines", self.pipelines.len());
        Ok(())
    }

    pub fn upload_mesh(&mut self, data: &MeshData) -> Result<MeshId> {
        let mesh = unsafe { Mesh::upload(&self.device, data)? };
        info!(
            "mesh uploaded: {} vertices, {} indices",
            data.vertices.len(),
            data.indices.len()
        );
        Ok(self.meshes.insert(mesh))
    }

    pub fn load_mesh(&mut self, path: &Path) -> Result<MeshId> {
        let data = prism_assets::load_mesh(path)?;
        self.upload_mesh(&data)
    }

    /// Waits for the device so no in-flight frame still reads the buffers.
    pub fn destroy_mesh(&mut self, id: MeshId) -> Result<()> {
        let mesh = retire(
            "mesh",
            self.meshes.contains_key(id),
            || self.device.wait_idle(),
            || self.meshes.remove(id),
        )?;
        unsafe { mesh.destroy(&self.device.logical) };
        Ok(())
    }

    pub fn mesh_bounds(&self, id: MeshId) -> Option<Bounds> {
        self.meshes.get(id).map(|m| m.bounds)
    }

    pub fn upload_texture(&mut self, data: &ImageData) -> Result<TextureId> {
        if self.textures.len() == self.textures.capacity() {
            return Err(FrameMisuse::TextureTableFull(self.textures.capacity()).into());
        }
        let texture = unsafe { Texture::upload(&self.device, data)? };
        let levels = texture.mip_levels();
        // Sets may be bound by in-flight frames.
        if let Err(e) = self.device.wait_idle() {
            unsafe { texture.destroy(&self.device.logical) };
            return Err(e);
        }
        let slot = match self.textures.insert(texture) {
            Ok(slot) => slot,
            Err(texture) => {
                unsafe { texture.destroy(&self.device.logical) };
                return Err(FrameMisuse::TextureTableFull(self.textures.capacity()).into());
            }
        };
        if let Err(e) = unsafe { self.write_texture_array() } {
            if let Some(texture) = self.textures.remove(slot) {
                unsafe { texture.destroy(&self.device.logical) };
            }
            return Err(e);
        }
        info!(
            "texture {} uploaded: {}x{}, {} mip levels",
            slot,
            data.width(),
            data.height(),
            levels
        );
        Ok(TextureId(slot))
    }

    pub fn load_texture(&mut self, path: &Path) -> Result<TextureId> {
        let data = prism_assets::load_image(path)?;
        self.upload_texture(&data)
    }

    pub fn destroy_texture(&mut self, id: TextureId) -> Result<()> {
        let texture = retire(
            "texture",
            self.textures.get(id.0).is_some(),
            || self.device.wait_idle(),
            || self.textures.remove(id.0),
        )?;
        let rewritten = unsafe { self.write_texture_array() };
        unsafe { texture.destroy(&self.device.logical) };
        rewritten
    }

    pub fn texture_mip_levels(&self, id: TextureId) -> Option<u32> {
        self.textures.get(id.0).map(Texture::mip_levels)
    }
}

/// Takes a resource out of its table only after `wait` succeeds, so a failed
/// wait leaves it tracked for `Drop`.
fn retire<T>(
    what: &'static str,
    present: bool,
    wait: impl FnOnce() -> Result<()>,
    remove: impl FnOnce() -> Option<T>,
) -> Result<T> {
    if !present {
        return Err(FrameMisuse::UnknownHandle(what).into());
    }
    wait()?;
    remove().ok_or(Error::Misuse(FrameMisuse::UnknownHandle(what)))
}

impl FrameBackend for VkBackend {
    type Error = Error;
    type CommandBuffer = vk::CommandBuffer;
    type Pipeline = PipelineId;
    type Mesh = MeshId;

    fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        let fence = self.slot(slot)?.in_flight;
        unsafe {
            self.device
                .logical
                .wait_for_fences(&[fence], true, u64::MAX)
                .context("wait_for_fences")
        }
    }

    fn acquire_image(&mut self, slot: usize) -> Result<Acquire> {
        let semaphore = self.slot(slot)?.image_acquired;
        let swapchain = self.chain()?.swapchain().handle;
        let acquired = unsafe {
            self.device.swapchain_loader.acquire_next_image(
                swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };
        match acquired {
            Ok((index, suboptimal)) => Ok(Acquire::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquire::OutOfDate),
            Err(result) => Err(Error::Vulkan {
                op: "acquire_next_image",
                result,
            }),
        }
    }

    fn reset_slot(&mut self, slot: usize) -> Result<()> {
        let fence = self.slot(slot)?.in_flight;
        unsafe { self.device.logical.reset_fences(&[fence]) }.context("reset_fences")
    }

    fn begin_pass(&mut self, slot: usize, image_index: u32) -> Result<()> {
        let cmd = self.slot(slot)?.command_buffer;
        let chain = self.chain()?;
        let framebuffer = *chain.framebuffer(image_index).ok_or(Error::SurfaceLost)?;
        let render_pass = *chain.render_target();
        let extent = chain.swapchain().extent;
        let d = &self.device.logical;

        let clears = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: [0.0, 0.0, 0.0, 1.0],
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        unsafe {
            d.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .context("reset_command_buffer")?;
            let bi = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                ..Default::default()
            };
            d.begin_command_buffer(cmd, &bi)
                .context("begin_command_buffer")?;

            let rp_begin = vk::RenderPassBeginInfo {
                s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
                render_pass,
                framebuffer,
                render_area: area,
                clear_value_count: clears.len() as u32,
                p_clear_values: clears.as_ptr(),
                ..Default::default()
            };
            d.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);

            let viewport = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            d.cmd_set_viewport(cmd, 0, &[viewport]);
            d.cmd_set_scissor(cmd, 0, &[area]);
        }
        Ok(())
    }

    fn end_pass(&mut self, slot: usize) -> Result<()> {
        let cmd = self.slot(slot)?.command_buffer;
        unsafe {
            self.device.logical.cmd_end_render_pass(cmd);
            self.device
                .logical
                .end_command_buffer(cmd)
                .context("end_command_buffer")
        }
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        let s = self.slot(slot)?;
        let wait_stage = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
        let si = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &s.image_acquired,
            p_wait_dst_stage_mask: &wait_stage,
            command_buffer_count: 1,
            p_command_buffers: &s.command_buffer,
            signal_semaphore_count: 1,
            p_signal_semaphores: &s.render_complete,
            ..Default::default()
        };
        unsafe {
            self.device
                .logical
                .queue_submit(
                    self.device.graphics_queue,
                    std::slice::from_ref(&si),
                    s.in_flight,
                )
                .context("queue_submit")
        }
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<Present> {
        let render_complete = self.slot(slot)?.render_complete;
        let swapchain = self.chain()?.swapchain().handle;
        let pi = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &render_complete,
            swapchain_count: 1,
            p_swapchains: &swapchain,
            p_image_indices: &image_index,
            ..Default::default()
        };
        let presented = unsafe {
            self.device
                .swapchain_loader
                .queue_present(self.device.present_queue, &pi)
        };
        match presented {
            Ok(false) => Ok(Present::Done),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Present::Stale),
            Err(result) => Err(Error::Vulkan {
                op: "queue_present",
                result,
            }),
        }
    }

    fn rebuild_surface(&mut self) -> Result<RebuildOutcome> {
        let chain = self.chain.take().ok_or(Error::SurfaceLost)?;
        let (chain, outcome) = chain.rebuild(&mut self.device, self.window)?;
        self.chain = Some(chain);
        if outcome == (RebuildOutcome::Rebuilt { format_changed: true }) {
            unsafe { self.recreate_pipelines()? };
        }
        Ok(outcome)
    }

    fn uniform_memory(&mut self, slot: usize) -> Result<&mut [u8]> {
        self.slots
            .get_mut(slot)
            .and_then(FrameSlot::uniform_bytes)
            .ok_or(Error::Misuse(FrameMisuse::UnknownHandle("frame slot")))
    }

    fn command_buffer(&self, slot: usize) -> vk::CommandBuffer {
        self.slots
            .get(slot)
            .map_or(vk::CommandBuffer::null(), |s| s.command_buffer)
    }

    fn bind_pipeline(&mut self, slot: usize, pipeline: PipelineId) -> Result<()> {
        let cmd = self.slot(slot)?.command_buffer;
        let p = self.pipeline(pipeline)?.pipeline;
        unsafe {
            self.device
                .logical
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, p)
        };
        Ok(())
    }

    fn push_constants(&mut self, slot: usize, pipeline: PipelineId, bytes: &[u8]) -> Result<()> {
        let cmd = self.slot(slot)?.command_buffer;
        let p = self.pipeline(pipeline)?;
        let capacity = p.desc.push_constant_size as usize;
        if bytes.len() > capacity {
            return Err(FrameMisuse::PayloadTooLarge {
                size: bytes.len(),
                capacity,
            }
            .into());
        }
        unsafe {
            self.device.logical.cmd_push_constants(
                cmd,
                p.layout,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                0,
                bytes,
            )
        };
        Ok(())
    }

    fn clear_depth(&mut self, slot: usize) -> Result<()> {
        let cmd = self.slot(slot)?.command_buffer;
        let extent = self.chain()?.swapchain().extent;
        let attachment = vk::ClearAttachment {
            aspect_mask: vk::ImageAspectFlags::DEPTH,
            color_attachment: 0,
            clear_value: vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        };
        let rect = vk::ClearRect {
            rect: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
            base_array_layer: 0,
            layer_count: 1,
        };
        unsafe {
            self.device
                .logical
                .cmd_clear_attachments(cmd, &[attachment], &[rect])
        };
        Ok(())
    }

    fn draw_mesh(&mut self, slot: usize, pipeline: PipelineId, mesh: MeshId) -> Result<()> {
        let cmd = self.slot(slot)?.command_buffer;
        let layout = self.pipeline(pipeline)?.layout;
        let set = self.registry()?.set(slot);
        let m = self
            .meshes
            .get(mesh)
            .ok_or(Error::Misuse(FrameMisuse::UnknownHandle("mesh")))?;
        let d = &self.device.logical;
        unsafe {
            d.cmd_bind_vertex_buffers(cmd, 0, &[m.vertices.buffer], &[0]);
            d.cmd_bind_index_buffer(cmd, m.indices.buffer, 0, vk::IndexType::UINT32);
            d.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                0,
                &[set],
                &[],
            );
            d.cmd_draw_indexed(cmd, m.index_count, 1, 0, 0, 0);
        }
        Ok(())
    }
}

impl Drop for VkBackend {
    // STRICT TEARDOWN ORDER:
    // 1) wait idle; nothing in flight may reference what follows
    // 2) pipelines, then the cache (saved first)
    // 3) meshes, textures, fallback
    // 4) descriptor pool + layout, frame slots
    // 5) surface chain
    // device and instance drop after this, in field order
    fn drop(&mut self) {
        let d = &self.device.logical;
        unsafe {
            d.device_wait_idle().ok();
            for (_, p) in self.pipelines.drain() {
                p.destroy(d);
            }
            if let Some(cache) = self.pipeline_cache.take() {
                cache.save(d);
                cache.destroy(d);
            }
            for (_, m) in self.meshes.drain() {
                m.destroy(d);
            }
            for t in self.textures.drain() {
                t.destroy(d);
            }
            if let Some(t) = self.fallback.take() {
                t.destroy(d);
            }
            if let Some(mut registry) = self.descriptors.take() {
                registry.destroy(d);
            }
            for mut slot in self.slots.drain(..) {
                slot.destroy(&self.device);
            }
        }
        if let Some(chain) = self.chain.take() {
            chain.destroy(&mut self.device);
        }
        info!("renderer destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_wait_keeps_the_resource_tracked() {
        let mut meshes: SlotMap<MeshId, u32> = SlotMap::with_key();
        let id = meshes.insert(7);

        let lost = retire(
            "mesh",
            meshes.contains_key(id),
            || {
                Err(Error::Vulkan {
                    op: "device_wait_idle",
                    result: vk::Result::ERROR_DEVICE_LOST,
                })
            },
            || meshes.remove(id),
        );
        assert!(matches!(lost, Err(Error::Vulkan { .. })));
        assert_eq!(meshes.get(id), Some(&7));

        let taken = retire("mesh", meshes.contains_key(id), || Ok(()), || meshes.remove(id));
        assert_eq!(taken.unwrap(), 7);
        assert!(meshes.is_empty());
    }

    #[test]
    fn unknown_handle_skips_the_wait() {
        let mut textures = TextureSlots::<u32>::new(2);
        let mut waited = false;
        let r = retire(
            "texture",
            textures.get(1).is_some(),
            || {
                waited = true;
                Ok(())
            },
            || textures.remove(1),
        );
        assert!(matches!(
            r,
            Err(Error::Misuse(FrameMisuse::UnknownHandle("texture")))
        ));
        assert!(!waited);
    }
}

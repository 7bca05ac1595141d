// SPDX-License-Identifier: CEPL-1.0
//! ash/Vulkan backend and the [`VkRenderer`] facade scene code drives.
mod backend;
mod descriptors;
mod device;
mod error;
mod instance;
mod memory;
mod pipeline;
mod resources;
mod surface;
mod sync;
mod upload;

use std::path::{Path, PathBuf};

pub use ash::vk;
use prism_render::{
    Bounds, FrameMisuse, FrameStatus, Frontend, ImageData, MeshData, PushConstants, RenderSize,
    Uniforms, MAX_TEXTURES,
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::info;

pub use backend::VkBackend;
pub use error::{Error, Result};
pub use pipeline::PipelineDesc;
pub use resources::{MeshId, PipelineId, TextureId};

#[derive(Clone, Debug)]
pub struct RendererConfig {
    pub app_name: String,
    /// Enable the Khronos validation layer and route its messages to tracing.
    pub validation: bool,
    /// Directory for the pipeline cache blob; `None` keeps it in memory.
    pub pipeline_cache: Option<PathBuf>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            app_name: "prism".into(),
            validation: cfg!(debug_assertions),
            pipeline_cache: Some(PathBuf::from(".")),
        }
    }
}

pub struct VkRenderer {
    frontend: Frontend<VkBackend>,
    standard: PipelineId,
    overlay: PipelineId,
}

impl VkRenderer {
    /// `window` must outlive the renderer.
    pub fn new<W>(window: &W, size: RenderSize, cfg: &RendererConfig) -> Result<Self>
    where
        W: HasWindowHandle + HasDisplayHandle,
    {
        let mut backend = unsafe { VkBackend::new(window, window, size, cfg)? };
        let standard = backend.create_pipeline(PipelineDesc::standard()?)?;
        let overlay = backend
            .create_pipeline(PipelineDesc::standard()?.with_cull_mode(vk::CullModeFlags::NONE))?;
        info!("vk renderer initialized ({}x{})", size.width, size.height);
        Ok(Self {
            frontend: Frontend::new(backend),
            standard,
            overlay,
        })
    }

    fn idle(&self, op: &'static str) -> Result<()> {
        if self.frontend.is_recording() {
            return Err(FrameMisuse::InsideFrame(op).into());
        }
        Ok(())
    }

    /// Records the new framebuffer size; the chain is rebuilt at the next
    /// frame boundary.
    pub fn resize(&mut self, size: RenderSize) {
        self.frontend.backend_mut().set_window_size(size);
        self.frontend.request_rebuild();
    }

    pub fn surface_size(&self) -> RenderSize {
        self.frontend.backend().surface_size()
    }

    pub fn standard_pipeline(&self) -> PipelineId {
        self.standard
    }

    /// Standard shaders with culling off, for geometry seen from inside.
    pub fn overlay_pipeline(&self) -> PipelineId {
        self.overlay
    }

    pub fn create_pipeline(&mut self, desc: PipelineDesc) -> Result<PipelineId> {
        self.idle("create_pipeline")?;
        self.frontend.backend_mut().create_pipeline(desc)
    }

    pub fn destroy_pipeline(&mut self, id: PipelineId) -> Result<()> {
        self.idle("destroy_pipeline")?;
        self.frontend.backend_mut().destroy_pipeline(id)
    }

    pub fn load_mesh(&mut self, path: impl AsRef<Path>) -> Result<MeshId> {
        self.idle("load_mesh")?;
        self.frontend.backend_mut().load_mesh(path.as_ref())
    }

    pub fn upload_mesh(&mut self, data: &MeshData) -> Result<MeshId> {
        self.idle("upload_mesh")?;
        self.frontend.backend_mut().upload_mesh(data)
    }

    pub fn destroy_mesh(&mut self, id: MeshId) -> Result<()> {
        self.idle("destroy_mesh")?;
        self.frontend.backend_mut().destroy_mesh(id)
    }

    pub fn mesh_bounds(&self, id: MeshId) -> Option<Bounds> {
        self.frontend.backend().mesh_bounds(id)
    }

    pub fn load_texture(&mut self, path: impl AsRef<Path>) -> Result<TextureId> {
        self.idle("load_texture")?;
        self.frontend.backend_mut().load_texture(path.as_ref())
    }

    pub fn upload_texture(&mut self, data: &ImageData) -> Result<TextureId> {
        self.idle("upload_texture")?;
        self.frontend.backend_mut().upload_texture(data)
    }

    pub fn destroy_texture(&mut self, id: TextureId) -> Result<()> {
        self.idle("destroy_texture")?;
        self.frontend.backend_mut().destroy_texture(id)
    }

    pub fn texture_mip_levels(&self, id: TextureId) -> Option<u32> {
        self.frontend.backend().texture_mip_levels(id)
    }

    pub fn frame_index(&self) -> usize {
        self.frontend.frame_index()
    }

    pub fn begin_frame(&mut self) -> Result<FrameStatus> {
        self.frontend.begin_frame()
    }

    pub fn bind_pipeline(&mut self, pipeline: PipelineId) -> Result<()> {
        self.frontend.bind_pipeline(pipeline)
    }

    pub fn set_uniforms(&mut self, uniforms: &Uniforms) -> Result<()> {
        self.frontend.set_uniforms(uniforms)
    }

    pub fn set_push_constants(&mut self, push: &PushConstants) -> Result<()> {
        if push.texture_index as usize >= MAX_TEXTURES {
            return Err(FrameMisuse::UnknownHandle("texture").into());
        }
        self.frontend.set_push_constants(push)
    }

    pub fn clear_depth(&mut self) -> Result<()> {
        self.frontend.clear_depth()
    }

    pub fn draw_mesh(&mut self, mesh: MeshId) -> Result<()> {
        self.frontend.draw_mesh(mesh)
    }

    /// The active slot's command buffer, open inside the render pass.
    pub fn command_buffer(&self) -> Result<vk::CommandBuffer> {
        self.frontend.command_buffer()
    }

    pub fn end_frame(&mut self) -> Result<()> {
        self.frontend.end_frame()
    }
}

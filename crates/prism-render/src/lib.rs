// SPDX-License-Identifier: CEPL-1.0
//! Backend-agnostic half of the renderer: the CPU-side data model, the
//! frame-slot state machine and the surface-chain rebuild protocol. Backends
//! plug in through [`FrameBackend`] and [`ChainBackend`].

pub mod bindings;
pub mod chain;
pub mod frame;
pub mod image;
pub mod mesh;
pub mod payload;
pub mod textures;

pub use bindings::{Binding, BindingKind, BindingTable, ShaderStages};
pub use chain::{ChainBackend, RebuildOutcome, SurfaceChain, SwapchainParts};
pub use frame::{Acquire, FrameBackend, FrameMisuse, FrameStatus, Frontend, Present};
pub use image::{mip_chain, mip_level_count, ImageData, MipStep};
pub use mesh::{Bounds, MeshBuilder, MeshData, Vertex};
pub use payload::{PushConstants, ShaderFlags, Uniforms};
pub use textures::TextureSlots;

/// Number of frame slots recorded ahead of the GPU.
pub const FRAMES_IN_FLIGHT: usize = 2;

/// Capacity of the sampler array every descriptor set binds.
pub const MAX_TEXTURES: usize = 16;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimized window reports a zero-area framebuffer.
    pub fn is_zero(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

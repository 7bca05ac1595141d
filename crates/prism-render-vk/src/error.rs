// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use prism_render::FrameMisuse;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to load the Vulkan library: {0}")]
    Loader(#[from] ash::LoadingError),
    #[error("window handle unavailable: {0}")]
    Window(#[from] raw_window_handle::HandleError),
    #[error("no adapter satisfies the renderer's requirements")]
    NoSuitableAdapter,
    #[error("{op} failed: {result}")]
    Vulkan {
        op: &'static str,
        result: vk::Result,
    },
    #[error("unsupported image layout transition {from:?} -> {to:?}")]
    UnsupportedLayoutTransition {
        from: vk::ImageLayout,
        to: vk::ImageLayout,
    },
    #[error("format {0:?} cannot be blitted with linear filtering, mip chain not possible")]
    LinearFilterUnsupported(vk::Format),
    #[error("mesh has no triangles")]
    EmptyMesh,
    #[error("index count {0} is not a whole number of triangles")]
    PartialTriangle(usize),
    #[error("index {index} points past the last of {vertices} vertices")]
    IndexOutOfRange { index: u32, vertices: usize },
    #[error("no memory type with {0:?}")]
    NoMemoryType(vk::MemoryPropertyFlags),
    #[error("invalid SPIR-V: {0}")]
    Spirv(#[source] std::io::Error),
    #[error("surface chain unavailable after a failed rebuild")]
    SurfaceLost,
    #[error(transparent)]
    Asset(#[from] prism_assets::AssetError),
    #[error(transparent)]
    Misuse(#[from] FrameMisuse),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Names the failing call on a raw `vk::Result`.
pub(crate) trait VkContext<T> {
    fn context(self, op: &'static str) -> Result<T>;
}

impl<T> VkContext<T> for ash::prelude::VkResult<T> {
    fn context(self, op: &'static str) -> Result<T> {
        self.map_err(|result| Error::Vulkan { op, result })
    }
}


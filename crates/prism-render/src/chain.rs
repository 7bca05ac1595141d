// SPDX-License-Identifier: CEPL-1.0
//! Ownership graph of the presentable image chain and its rebuild protocol.
//!
//! The chain owns, in creation order: the swapchain, one view per image, the
//! render-target description, one depth attachment and one framebuffer per
//! view. Teardown runs in reverse: framebuffers, depth, views, render target,
//! swapchain. The graph has no `Drop`; it is released with
//! [`SurfaceChain::destroy`] against the backend that created it.
use std::fmt::Debug;

use tracing::{debug, info};

use crate::RenderSize;

/// What a backend's swapchain object must report back to the chain.
pub trait SwapchainParts {
    type Image: Copy;
    type Format: Copy + PartialEq + Debug;

    /// Presentable images, owned by the platform compositor.
    fn images(&self) -> &[Self::Image];
    fn format(&self) -> Self::Format;
    fn size(&self) -> RenderSize;
}

/// Creation and destruction of every object in the chain graph.
pub trait ChainBackend {
    type Error;
    type Swapchain: SwapchainParts;
    type View;
    type RenderTarget;
    type Depth;
    type Framebuffer;

    /// Blocks until no submitted work can reference the chain.
    fn wait_idle(&mut self) -> Result<(), Self::Error>;

    /// `window` is the live framebuffer size, used when the surface leaves
    /// the extent up to the application.
    fn create_swapchain(&mut self, window: RenderSize) -> Result<Self::Swapchain, Self::Error>;
    fn create_view(
        &mut self,
        swapchain: &Self::Swapchain,
        image: <Self::Swapchain as SwapchainParts>::Image,
    ) -> Result<Self::View, Self::Error>;
    fn create_render_target(
        &mut self,
        swapchain: &Self::Swapchain,
    ) -> Result<Self::RenderTarget, Self::Error>;
    fn create_depth(&mut self, swapchain: &Self::Swapchain) -> Result<Self::Depth, Self::Error>;
    fn create_framebuffer(
        &mut self,
        target: &Self::RenderTarget,
        view: &Self::View,
        depth: &Self::Depth,
        size: RenderSize,
    ) -> Result<Self::Framebuffer, Self::Error>;

    fn destroy_framebuffer(&mut self, framebuffer: Self::Framebuffer);
    fn destroy_depth(&mut self, depth: Self::Depth);
    fn destroy_view(&mut self, view: Self::View);
    fn destroy_render_target(&mut self, target: Self::RenderTarget);
    fn destroy_swapchain(&mut self, swapchain: Self::Swapchain);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RebuildOutcome {
    /// A new chain is live. Pipelines built against the old color format
    /// must be recreated when `format_changed` is set.
    Rebuilt { format_changed: bool },
    /// The window has no area; the old chain is kept and the request stays
    /// pending.
    Deferred,
}

pub struct SurfaceChain<B: ChainBackend> {
    swapchain: B::Swapchain,
    views: Vec<B::View>,
    render_target: B::RenderTarget,
    depth: B::Depth,
    framebuffers: Vec<B::Framebuffer>,
}

impl<B: ChainBackend> SurfaceChain<B> {
    /// Builds the whole graph. On failure everything created so far is
    /// destroyed before the error is returned.
    pub fn build(backend: &mut B, window: RenderSize) -> Result<Self, B::Error> {
        let swapchain = backend.create_swapchain(window)?;
        let count = swapchain.images().len();
        let mut views = Vec::with_capacity(count);
        let mut framebuffers = Vec::with_capacity(count);

        match Self::attach(backend, &swapchain, &mut views, &mut framebuffers) {
            Ok((render_target, depth)) => {
                let size = swapchain.size();
                info!(
                    "surface chain ready ({}x{}, {} images, {:?})",
                    size.width,
                    size.height,
                    count,
                    swapchain.format()
                );
                Ok(Self {
                    swapchain,
                    views,
                    render_target,
                    depth,
                    framebuffers,
                })
            }
            Err(e) => {
                for view in views.drain(..) {
                    backend.destroy_view(view);
                }
                backend.destroy_swapchain(swapchain);
                Err(e)
            }
        }
    }

    // Views go into `views` as they are made; on error the caller owns
    // cleaning those up, everything else is released here.
    fn attach(
        backend: &mut B,
        swapchain: &B::Swapchain,
        views: &mut Vec<B::View>,
        framebuffers: &mut Vec<B::Framebuffer>,
    ) -> Result<(B::RenderTarget, B::Depth), B::Error> {
        for &image in swapchain.images() {
            views.push(backend.create_view(swapchain, image)?);
        }

        let render_target = backend.create_render_target(swapchain)?;
        let depth = match backend.create_depth(swapchain) {
            Ok(depth) => depth,
            Err(e) => {
                backend.destroy_render_target(render_target);
                return Err(e);
            }
        };

        for view in views.iter() {
            match backend.create_framebuffer(&render_target, view, &depth, swapchain.size()) {
                Ok(fb) => framebuffers.push(fb),
                Err(e) => {
                    for fb in framebuffers.drain(..) {
                        backend.destroy_framebuffer(fb);
                    }
                    backend.destroy_depth(depth);
                    backend.destroy_render_target(render_target);
                    return Err(e);
                }
            }
        }
        Ok((render_target, depth))
    }

    /// Waits for the device, tears the graph down and builds a fresh one.
    /// A zero-area `window` defers the rebuild and hands the old chain back.
    /// If the new build fails the old chain is already gone.
    pub fn rebuild(
        self,
        backend: &mut B,
        window: RenderSize,
    ) -> Result<(Self, RebuildOutcome), B::Error> {
        if window.is_zero() {
            debug!("rebuild deferred, window is {}x{}", window.width, window.height);
            return Ok((self, RebuildOutcome::Deferred));
        }

        if let Err(e) = backend.wait_idle() {
            self.destroy(backend);
            return Err(e);
        }
        let old_format = self.swapchain.format();
        self.destroy(backend);

        let chain = Self::build(backend, window)?;
        let format_changed = chain.swapchain.format() != old_format;
        if format_changed {
            info!(
                "surface format changed {:?} -> {:?}",
                old_format,
                chain.swapchain.format()
            );
        }
        Ok((chain, RebuildOutcome::Rebuilt { format_changed }))
    }

    pub fn destroy(self, backend: &mut B) {
        for fb in self.framebuffers {
            backend.destroy_framebuffer(fb);
        }
        backend.destroy_depth(self.depth);
        for view in self.views {
            backend.destroy_view(view);
        }
        backend.destroy_render_target(self.render_target);
        backend.destroy_swapchain(self.swapchain);
    }

    pub fn swapchain(&self) -> &B::Swapchain {
        &self.swapchain
    }

    pub fn render_target(&self) -> &B::RenderTarget {
        &self.render_target
    }

    pub fn depth(&self) -> &B::Depth {
        &self.depth
    }

    pub fn views(&self) -> &[B::View] {
        &self.views
    }

    pub fn framebuffers(&self) -> &[B::Framebuffer] {
        &self.framebuffers
    }

    pub fn framebuffer(&self, image_index: u32) -> Option<&B::Framebuffer> {
        self.framebuffers.get(image_index as usize)
    }

    pub fn image_count(&self) -> usize {
        self.swapchain.images().len()
    }

    pub fn size(&self) -> RenderSize {
        self.swapchain.size()
    }

    pub fn format(&self) -> <B::Swapchain as SwapchainParts>::Format {
        self.swapchain.format()
    }
}

// SPDX-License-Identifier: CEPL-1.0
pub use winit;

use prism_render::RenderSize;
use winit::window::Window;

/// Current framebuffer size of `window` in physical pixels. May be 0x0 while
/// the window is minimized.
pub fn render_size(window: &Window) -> RenderSize {
    let size = window.inner_size();
    RenderSize::new(size.width, size.height)
}

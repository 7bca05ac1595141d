// SPDX-License-Identifier: CEPL-1.0
//! Per-frame data scene logic hands to the GPU. Layouts match the std140 /
//! push-constant blocks in the standard shaders.
use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;

/// Contents of binding 0: one copy per frame slot.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Uniforms {
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
}

impl Uniforms {
    pub fn new(view: Mat4, proj: Mat4) -> Self {
        Self {
            view: view.to_cols_array_2d(),
            proj: proj.to_cols_array_2d(),
        }
    }
}

impl Default for Uniforms {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, Mat4::IDENTITY)
    }
}

bitflags! {
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ShaderFlags: u32 {
        /// Ignore the texture array and shade with a flat color.
        const UNTEXTURED = 1 << 0;
        /// Visualize texture coordinates instead of sampling.
        const SHOW_UV = 1 << 1;
    }
}

/// Pushed before each draw. 80 bytes, under the 128-byte guaranteed minimum.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct PushConstants {
    pub model: [[f32; 4]; 4],
    pub texture_index: u32,
    /// 0 shades normally, 1 draws edges only; values in between blend.
    pub wireframe: f32,
    pub flags: u32,
    _pad: u32,
}

impl PushConstants {
    pub fn new(model: Mat4, texture_index: u32) -> Self {
        Self {
            model: model.to_cols_array_2d(),
            texture_index,
            wireframe: 0.0,
            flags: 0,
            _pad: 0,
        }
    }

    pub fn with_wireframe(mut self, blend: f32) -> Self {
        self.wireframe = blend.clamp(0.0, 1.0);
        self
    }

    pub fn with_flags(mut self, flags: ShaderFlags) -> Self {
        self.flags = flags.bits();
        self
    }

    pub fn shader_flags(&self) -> ShaderFlags {
        ShaderFlags::from_bits_truncate(self.flags)
    }
}

impl Default for PushConstants {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn sizes_match_shader_blocks() {
        assert_eq!(std::mem::size_of::<Uniforms>(), 128);
        assert_eq!(std::mem::size_of::<PushConstants>(), 80);
    }

    #[test]
    fn wireframe_is_clamped() {
        let pc = PushConstants::default().with_wireframe(1.7);
        assert_relative_eq!(pc.wireframe, 1.0);
        let pc = pc.with_wireframe(-0.2);
        assert_relative_eq!(pc.wireframe, 0.0);
    }

    #[test]
    fn flags_round_through_bits() {
        let pc = PushConstants::default().with_flags(ShaderFlags::SHOW_UV);
        assert_eq!(pc.flags, 2);
        assert_eq!(pc.shader_flags(), ShaderFlags::SHOW_UV);
    }

    #[test]
    fn model_is_column_major() {
        let m = Mat4::from_translation(glam::Vec3::new(1.0, 2.0, 3.0));
        let pc = PushConstants::new(m, 4);
        assert_eq!(pc.model[3], [1.0, 2.0, 3.0, 1.0]);
        assert_eq!(pc.texture_index, 4);
    }
}

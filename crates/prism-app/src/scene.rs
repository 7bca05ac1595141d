// SPDX-License-Identifier: CEPL-1.0
//! Viewer state: spin, camera, overlay toggles and the wireframe fade.
use glam::{Mat4, Vec3};
use prism_render::{Bounds, PushConstants, ShaderFlags, Uniforms};
use prism_render_vk::TextureId;

use crate::config::SceneCfg;

/// Seconds for a full solid <-> wireframe transition.
pub const WIREFRAME_FADE: f32 = 0.5;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Fade {
    on: bool,
    value: f32,
}

impl Fade {
    pub fn toggle(&mut self) {
        self.on = !self.on;
    }

    pub fn update(&mut self, dt: f32) {
        let step = dt / WIREFRAME_FADE;
        self.value = if self.on {
            (self.value + step).min(1.0)
        } else {
            (self.value - step).max(0.0)
        };
    }

    pub fn value(&self) -> f32 {
        self.value
    }
}

pub struct Scene {
    angle: f32,
    spin_speed: f32,
    fov_degrees: f32,
    camera_distance: f32,
    /// Maps the mesh's bounds to a unit-sized box at the origin.
    normalize: Mat4,
    wireframe: Fade,
    show_bounds: bool,
    textures: Vec<TextureId>,
    current: usize,
}

impl Scene {
    pub fn new(cfg: &SceneCfg, bounds: Bounds, textures: Vec<TextureId>) -> Self {
        let size = bounds.extent().max_element();
        let scale = if size > f32::EPSILON { 1.5 / size } else { 1.0 };
        Self {
            angle: 0.0,
            spin_speed: cfg.spin_speed,
            fov_degrees: cfg.fov_degrees,
            camera_distance: cfg.camera_distance,
            normalize: Mat4::from_scale(Vec3::splat(scale))
                * Mat4::from_translation(-bounds.center()),
            wireframe: Fade::default(),
            show_bounds: false,
            textures,
            current: 0,
        }
    }

    pub fn update(&mut self, dt: f32) {
        self.angle = (self.angle + self.spin_speed * dt) % std::f32::consts::TAU;
        self.wireframe.update(dt);
    }

    pub fn toggle_wireframe(&mut self) {
        self.wireframe.toggle();
    }

    pub fn toggle_bounds(&mut self) {
        self.show_bounds = !self.show_bounds;
    }

    pub fn show_bounds(&self) -> bool {
        self.show_bounds
    }

    /// Next loaded texture, wrapping. Returns the one now shown.
    pub fn cycle_texture(&mut self) -> Option<TextureId> {
        if self.textures.is_empty() {
            return None;
        }
        self.current = (self.current + 1) % self.textures.len();
        self.texture()
    }

    pub fn texture(&self) -> Option<TextureId> {
        self.textures.get(self.current).copied()
    }

    pub fn model(&self) -> Mat4 {
        Mat4::from_rotation_y(self.angle) * self.normalize
    }

    pub fn view(&self) -> Mat4 {
        let eye = Vec3::new(0.0, self.camera_distance * 0.35, self.camera_distance);
        Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y)
    }

    /// Vulkan clip space: depth 0..1, +Y down.
    pub fn projection(&self, aspect: f32) -> Mat4 {
        let mut proj = Mat4::perspective_rh(self.fov_degrees.to_radians(), aspect, 0.05, 100.0);
        proj.y_axis.y *= -1.0;
        proj
    }

    pub fn uniforms(&self, aspect: f32) -> Uniforms {
        Uniforms::new(self.view(), self.projection(aspect))
    }

    pub fn push_constants(&self) -> PushConstants {
        let push = match self.texture() {
            Some(t) => PushConstants::new(self.model(), t.index()),
            None => PushConstants::new(self.model(), 0).with_flags(ShaderFlags::UNTEXTURED),
        };
        push.with_wireframe(self.wireframe.value())
    }

    /// Bounding box drawn as edges only, on top of the model.
    pub fn bounds_push_constants(&self) -> PushConstants {
        PushConstants::new(self.model(), 0)
            .with_flags(ShaderFlags::UNTEXTURED)
            .with_wireframe(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn scene(textures: Vec<TextureId>) -> Scene {
        let bounds = Bounds {
            min: Vec3::new(-1.0, 0.0, -1.0),
            max: Vec3::new(1.0, 4.0, 1.0),
        };
        Scene::new(&SceneCfg::default(), bounds, textures)
    }

    #[test]
    fn fade_takes_half_a_second() {
        let mut f = Fade::default();
        f.toggle();
        f.update(0.25);
        assert_relative_eq!(f.value(), 0.5);
        f.update(1.0);
        assert_relative_eq!(f.value(), 1.0);
        f.toggle();
        f.update(0.125);
        assert_relative_eq!(f.value(), 0.75);
        f.update(10.0);
        assert_relative_eq!(f.value(), 0.0);
    }

    #[test]
    fn model_is_centered_and_normalized() {
        let s = scene(Vec::new());
        let top = s.model().transform_point3(Vec3::new(0.0, 4.0, 0.0));
        let bottom = s.model().transform_point3(Vec3::new(0.0, 0.0, 0.0));
        assert_relative_eq!(top.y, 0.75, epsilon = 1e-6);
        assert_relative_eq!(bottom.y, -0.75, epsilon = 1e-6);
    }

    #[test]
    fn projection_flips_y() {
        let s = scene(Vec::new());
        let p = s.projection(1.0);
        let up = p.project_point3(Vec3::new(0.0, 1.0, -5.0));
        assert!(up.y < 0.0);
        assert!(up.z > 0.0 && up.z < 1.0);
    }

    #[test]
    fn untextured_without_textures() {
        let mut s = scene(Vec::new());
        assert_eq!(s.cycle_texture(), None);
        let pc = s.push_constants();
        assert!(pc.shader_flags().contains(ShaderFlags::UNTEXTURED));
    }

    #[test]
    fn textures_cycle_and_wrap() {
        let mut s = scene(vec![TextureId(3), TextureId(5)]);
        assert_eq!(s.texture(), Some(TextureId(3)));
        assert_eq!(s.push_constants().texture_index, 3);
        assert_eq!(s.cycle_texture(), Some(TextureId(5)));
        assert_eq!(s.cycle_texture(), Some(TextureId(3)));
        assert!(s.push_constants().shader_flags().is_empty());
    }

    #[test]
    fn bounds_overlay_is_edges_only() {
        let mut s = scene(Vec::new());
        assert!(!s.show_bounds());
        s.toggle_bounds();
        assert!(s.show_bounds());
        assert_relative_eq!(s.bounds_push_constants().wireframe, 1.0);
    }
}

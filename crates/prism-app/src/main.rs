// SPDX-License-Identifier: CEPL-1.0
mod config;
mod scene;

use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use glam::Vec3;
use prism_core::init_tracing;
use prism_platform::render_size;
use prism_platform::winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{Key, NamedKey},
    window::{Window, WindowId},
};
use prism_render::{Bounds, FrameStatus, MeshData, RenderSize};
use prism_render_vk::{MeshId, VkRenderer};
use tracing::{error, info, warn};

use config::{AppCfg, Args};
use scene::Scene;

/// GPU-side objects the viewer draws every frame.
struct Loaded {
    mesh: MeshId,
    bounds: Option<MeshId>,
    scene: Scene,
}

// Field order matters: the renderer must drop before the window it
// presents to.
struct App {
    cfg: AppCfg,
    renderer: Option<VkRenderer>,
    loaded: Option<Loaded>,
    window: Option<Window>,
    exiting: bool,
    last_frame: Instant,
    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn new(cfg: AppCfg) -> Self {
        let now = Instant::now();
        Self {
            cfg,
            renderer: None,
            loaded: None,
            window: None,
            exiting: false,
            last_frame: now,
            frames: 0,
            last_fps_instant: now,
        }
    }

    fn start(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attrs = Window::default_attributes()
            .with_title(self.cfg.window.title.clone())
            .with_inner_size(LogicalSize::new(
                self.cfg.window.width,
                self.cfg.window.height,
            ));
        let window = event_loop
            .create_window(attrs)
            .context("create_window")?;
        let size = render_size(&window);

        let mut renderer = VkRenderer::new(&window, size, &self.cfg.renderer_config())
            .context("vulkan renderer init")?;

        let scene_cfg = &self.cfg.scene;
        let mesh = match &scene_cfg.mesh {
            Some(path) => renderer
                .load_mesh(path)
                .with_context(|| format!("loading mesh {}", path.display()))?,
            None => renderer.upload_mesh(&MeshData::bounds_box(Bounds {
                min: Vec3::splat(-0.5),
                max: Vec3::splat(0.5),
            }))?,
        };
        let bounds = renderer.mesh_bounds(mesh).unwrap_or_default();
        let bounds_mesh = match renderer.upload_mesh(&MeshData::bounds_box(bounds)) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("no bounds overlay: {e}");
                None
            }
        };

        let mut textures = Vec::new();
        for path in &scene_cfg.textures {
            match renderer.load_texture(path) {
                Ok(id) => textures.push(id),
                Err(e) => warn!("skipping texture {}: {e}", path.display()),
            }
        }
        info!(
            "scene: {} texture(s), bounds {:?}..{:?}",
            textures.len(),
            bounds.min,
            bounds.max
        );

        self.loaded = Some(Loaded {
            mesh,
            bounds: bounds_mesh,
            scene: Scene::new(scene_cfg, bounds, textures),
        });
        self.renderer = Some(renderer);
        window.request_redraw();
        self.window = Some(window);
        self.last_frame = Instant::now();
        Ok(())
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        self.loaded = None;
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }

    fn key(&mut self, event: &KeyEvent) -> bool {
        if event.state != ElementState::Pressed || event.repeat {
            return false;
        }
        let Some(loaded) = &mut self.loaded else {
            return false;
        };
        match &event.logical_key {
            Key::Named(NamedKey::Escape) => return true,
            Key::Character(c) => match c.to_lowercase().as_str() {
                "w" => loaded.scene.toggle_wireframe(),
                "b" => loaded.scene.toggle_bounds(),
                "t" => {
                    if let Some(t) = loaded.scene.cycle_texture() {
                        info!("texture slot {}", t.index());
                    }
                }
                _ => {}
            },
            _ => {}
        }
        false
    }

    fn render(&mut self) -> Result<()> {
        let now = Instant::now();
        let dt = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;

        let (Some(renderer), Some(loaded)) = (&mut self.renderer, &mut self.loaded) else {
            return Ok(());
        };
        loaded.scene.update(dt);

        if renderer.begin_frame()? == FrameStatus::Skipped {
            return Ok(());
        }
        let scene = &loaded.scene;
        let aspect = renderer.surface_size().aspect();
        let standard = renderer.standard_pipeline();

        renderer.bind_pipeline(standard)?;
        renderer.set_uniforms(&scene.uniforms(aspect))?;
        renderer.set_push_constants(&scene.push_constants())?;
        renderer.draw_mesh(loaded.mesh)?;

        if let (true, Some(bounds)) = (scene.show_bounds(), loaded.bounds) {
            let overlay = renderer.overlay_pipeline();
            renderer.clear_depth()?;
            renderer.bind_pipeline(overlay)?;
            renderer.set_push_constants(&scene.bounds_push_constants())?;
            renderer.draw_mesh(bounds)?;
        }

        renderer.end_frame()?;
        self.frames = self.frames.saturating_add(1);
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() || self.exiting {
            return;
        }
        if let Err(e) = self.start(event_loop) {
            error!("startup failed: {e:#}");
            self.shutdown(event_loop);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                let size = RenderSize::new(new_size.width, new_size.height);
                info!("Resized → {}x{}", size.width, size.height);
                if let Some(renderer) = &mut self.renderer {
                    renderer.resize(size);
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if self.key(&event) {
                    self.shutdown(event_loop);
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting {
                    return;
                }
                if let Err(e) = self.render() {
                    error!("frame loop aborted: {e:#}");
                    self.shutdown(event_loop);
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }

        // Minimized: nothing to present to, sleep until the next event.
        let minimized = self
            .window
            .as_ref()
            .map_or(true, |w| render_size(w).is_zero());
        if minimized {
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let mut cfg = AppCfg::load(&args.config);
    cfg.apply_args(&args);

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg);
    event_loop.run_app(&mut app)?;
    Ok(())
}

// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use clap::Parser;
use prism_render_vk::RendererConfig;
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// OBJ mesh to display (default: a textured cube)
    #[arg(long)]
    pub mesh: Option<PathBuf>,
    /// Texture to load; repeat to cycle through several with `T`
    #[arg(long = "texture")]
    pub textures: Vec<PathBuf>,
    /// TOML config file
    #[arg(long, default_value = "prism.toml")]
    pub config: PathBuf,
    /// Enable the Vulkan validation layer
    #[arg(long)]
    pub validation: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        Self {
            title: "prism".into(),
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SceneCfg {
    pub mesh: Option<PathBuf>,
    pub textures: Vec<PathBuf>,
    /// Radians per second around +Y.
    pub spin_speed: f32,
    pub fov_degrees: f32,
    pub camera_distance: f32,
}

impl Default for SceneCfg {
    fn default() -> Self {
        Self {
            mesh: None,
            textures: Vec::new(),
            spin_speed: 0.6,
            fov_degrees: 60.0,
            camera_distance: 3.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RenderCfg {
    pub validation: bool,
    /// Directory for the pipeline cache blob; omit to keep it in memory.
    pub pipeline_cache: Option<PathBuf>,
}

impl Default for RenderCfg {
    fn default() -> Self {
        let lib = RendererConfig::default();
        Self {
            validation: lib.validation,
            pipeline_cache: lib.pipeline_cache,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub scene: SceneCfg,
    pub render: RenderCfg,
}

impl AppCfg {
    pub fn parse(src: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(src)
    }

    /// A missing file means defaults; an unreadable or malformed one is
    /// reported and also falls back to defaults.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(src) => Self::parse(&src).unwrap_or_else(|e| {
                warn!("ignoring {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("no config at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                warn!("cannot read {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Command-line values win over the file.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(mesh) = &args.mesh {
            self.scene.mesh = Some(mesh.clone());
        }
        if !args.textures.is_empty() {
            self.scene.textures = args.textures.clone();
        }
        self.render.validation |= args.validation;
    }

    pub fn renderer_config(&self) -> RendererConfig {
        RendererConfig {
            app_name: self.window.title.clone(),
            validation: self.render.validation,
            pipeline_cache: self.render.pipeline_cache.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg = AppCfg::parse(
            r#"
            [window]
            title = "viewer"

            [scene]
            spin_speed = 1.5
            textures = ["a.png", "b.ppm"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.window.title, "viewer");
        assert_eq!(cfg.window.width, 1280);
        assert_eq!(cfg.scene.spin_speed, 1.5);
        assert_eq!(cfg.scene.textures.len(), 2);
        assert_eq!(cfg.scene.fov_degrees, 60.0);
        assert_eq!(cfg.render, RenderCfg::default());
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(AppCfg::parse("[window]\nwidth = \"wide\"").is_err());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let cfg = AppCfg::load(Path::new("/nonexistent/prism.toml"));
        assert_eq!(cfg, AppCfg::default());
    }

    #[test]
    fn args_override_file() {
        let mut cfg = AppCfg::parse(
            r#"
            [scene]
            mesh = "from_file.obj"
            textures = ["file.png"]
            [render]
            validation = false
            "#,
        )
        .unwrap();
        let args = Args::parse_from([
            "prism",
            "--mesh",
            "cli.obj",
            "--texture",
            "one.png",
            "--texture",
            "two.png",
            "--validation",
        ]);
        cfg.apply_args(&args);
        assert_eq!(cfg.scene.mesh, Some(PathBuf::from("cli.obj")));
        assert_eq!(
            cfg.scene.textures,
            vec![PathBuf::from("one.png"), PathBuf::from("two.png")]
        );
        assert!(cfg.renderer_config().validation);
    }

    #[test]
    fn empty_args_leave_file_values() {
        let mut cfg = AppCfg::parse("[scene]\ntextures = [\"keep.png\"]").unwrap();
        cfg.apply_args(&Args::parse_from(["prism"]));
        assert_eq!(cfg.scene.textures, vec![PathBuf::from("keep.png")]);
        assert_eq!(Args::parse_from(["prism"]).config, PathBuf::from("prism.toml"));
    }
}

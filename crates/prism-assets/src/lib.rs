// SPDX-License-Identifier: CEPL-1.0
//! File formats the renderer consumes: a Wavefront OBJ subset for meshes,
//! plain-text PPM and anything `image` decodes for textures.
use std::fs;
use std::path::{Path, PathBuf};

use prism_render::{ImageData, MeshData};
use thiserror::Error;
use tracing::debug;

pub mod obj;
pub mod ppm;

pub use obj::parse_obj;
pub use ppm::parse_ppm;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("obj line {line}: {message}")]
    Obj { line: usize, message: String },
    #[error("ppm: {0}")]
    Ppm(String),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error("image {width}x{height} has no pixels")]
    EmptyImage { width: u32, height: u32 },
}

pub type Result<T> = std::result::Result<T, AssetError>;

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| AssetError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load_mesh(path: impl AsRef<Path>) -> Result<MeshData> {
    let path = path.as_ref();
    let mesh = parse_obj(&read_text(path)?)?;
    debug!(
        "parsed {}: {} vertices, {} triangles",
        path.display(),
        mesh.vertices.len(),
        mesh.triangle_count()
    );
    Ok(mesh)
}

/// `.ppm` goes through the text parser, everything else through `image`.
pub fn load_image(path: impl AsRef<Path>) -> Result<ImageData> {
    let path = path.as_ref();
    let is_ppm = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("ppm"));
    if is_ppm {
        return parse_ppm(&read_text(path)?);
    }

    let rgba = image::open(path)?.to_rgba8();
    let (width, height) = rgba.dimensions();
    ImageData::from_rgba8(width, height, rgba.into_raw())
        .ok_or(AssetError::EmptyImage { width, height })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("prism-assets-{}-{name}", std::process::id()));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn loads_ppm_by_extension() {
        let path = temp_file("tiny.PPM", "P3\n1 1\n255\n10 20 30\n");
        let img = load_image(&path).unwrap();
        assert_eq!(img.pixels(), &[10, 20, 30, 255]);
        fs::remove_file(path).ok();
    }

    #[test]
    fn same_path_loads_identical_pixels() {
        let path = temp_file("twice.ppm", "P3\n2 1\n255\n1 2 3 4 5 6\n");
        let a = load_image(&path).unwrap();
        let b = load_image(&path).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.mip_levels(), b.mip_levels());
        fs::remove_file(path).ok();
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_mesh("/definitely/not/here.obj").unwrap_err();
        assert!(matches!(err, AssetError::Io { .. }));
        assert!(err.to_string().contains("not/here.obj"));
    }

    #[test]
    fn loads_obj_from_disk() {
        let path = temp_file("tri.obj", "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n");
        let mesh = load_mesh(&path).unwrap();
        assert_eq!(mesh.vertices.len(), 3);
        assert_eq!(mesh.indices, vec![0, 1, 2]);
        fs::remove_file(path).ok();
    }
}

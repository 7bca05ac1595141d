// SPDX-License-Identifier: CEPL-1.0
//! Device-resident meshes and textures.
use ash::vk;
use prism_render::{Bounds, ImageData, MeshData};

use crate::device::Device;
use crate::error::{Error, Result, VkContext};
use crate::memory::{GpuBuffer, GpuImage};
use crate::upload::{upload_buffer, upload_image};

slotmap::new_key_type! {
    pub struct MeshId;
    pub struct PipelineId;
}

/// Slot in the shader-visible texture array; pass it as `texture_index`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

impl TextureId {
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Static geometry: uploaded once, never written again.
pub struct Mesh {
    pub vertices: GpuBuffer,
    pub indices: GpuBuffer,
    pub index_count: u32,
    pub bounds: Bounds,
}

/// Indices must form whole triangles and stay inside the vertex buffer;
/// the draw reads them unchecked.
pub fn check_indices(vertex_count: usize, indices: &[u32]) -> Result<()> {
    if indices.is_empty() {
        return Err(Error::EmptyMesh);
    }
    if indices.len() % 3 != 0 {
        return Err(Error::PartialTriangle(indices.len()));
    }
    match indices.iter().find(|&&i| i as usize >= vertex_count) {
        Some(&index) => Err(Error::IndexOutOfRange {
            index,
            vertices: vertex_count,
        }),
        None => Ok(()),
    }
}

impl Mesh {
    pub unsafe fn upload(device: &Device, data: &MeshData) -> Result<Self> {
        check_indices(data.vertices.len(), &data.indices)?;
        let vertices = upload_buffer(
            device,
            bytemuck::cast_slice(&data.vertices),
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        let indices = match upload_buffer(
            device,
            bytemuck::cast_slice(&data.indices),
            vk::BufferUsageFlags::INDEX_BUFFER,
        ) {
            Ok(b) => b,
            Err(e) => {
                vertices.destroy(&device.logical);
                return Err(e);
            }
        };
        Ok(Self {
            vertices,
            indices,
            index_count: data.indices.len() as u32,
            bounds: data.bounds,
        })
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        self.indices.destroy(device);
        self.vertices.destroy(device);
    }
}

pub struct Texture {
    pub image: GpuImage,
    pub sampler: vk::Sampler,
}

/// Trilinear, repeat-addressed, anisotropy at the adapter limit, every mip
/// level reachable.
pub fn sampler_info(mip_levels: u32, max_anisotropy: f32) -> vk::SamplerCreateInfo<'static> {
    vk::SamplerCreateInfo {
        s_type: vk::StructureType::SAMPLER_CREATE_INFO,
        mag_filter: vk::Filter::LINEAR,
        min_filter: vk::Filter::LINEAR,
        mipmap_mode: vk::SamplerMipmapMode::LINEAR,
        address_mode_u: vk::SamplerAddressMode::REPEAT,
        address_mode_v: vk::SamplerAddressMode::REPEAT,
        address_mode_w: vk::SamplerAddressMode::REPEAT,
        anisotropy_enable: vk::TRUE,
        max_anisotropy,
        compare_op: vk::CompareOp::ALWAYS,
        min_lod: 0.0,
        max_lod: mip_levels as f32,
        border_color: vk::BorderColor::INT_OPAQUE_BLACK,
        ..Default::default()
    }
}

impl Texture {
    pub unsafe fn upload(device: &Device, data: &ImageData) -> Result<Self> {
        let image = upload_image(device, data)?;
        let ci = sampler_info(
            image.spec.mip_levels,
            device.properties.limits.max_sampler_anisotropy,
        );
        match device.logical.create_sampler(&ci, None).context("create_sampler") {
            Ok(sampler) => Ok(Self { image, sampler }),
            Err(e) => {
                image.destroy(&device.logical);
                Err(e)
            }
        }
    }

    pub fn mip_levels(&self) -> u32 {
        self.image.spec.mip_levels
    }

    pub fn descriptor(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: self.sampler,
            image_view: self.image.view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_sampler(self.sampler, None);
        self.image.destroy(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_must_form_triangles_inside_the_vertex_buffer() {
        assert!(check_indices(3, &[0, 1, 2, 2, 1, 0]).is_ok());
        assert!(matches!(check_indices(3, &[]), Err(Error::EmptyMesh)));
        assert!(matches!(
            check_indices(3, &[0, 1, 2, 0]),
            Err(Error::PartialTriangle(4))
        ));
        assert!(matches!(
            check_indices(1, &[0, 5, 9]),
            Err(Error::IndexOutOfRange {
                index: 5,
                vertices: 1
            })
        ));
        assert!(matches!(
            check_indices(0, &[0, 0, 0]),
            Err(Error::IndexOutOfRange { index: 0, .. })
        ));
    }

    #[test]
    fn sampler_reaches_every_mip() {
        let ci = sampler_info(10, 16.0);
        assert_eq!(ci.max_lod, 10.0);
        assert_eq!(ci.min_lod, 0.0);
        assert_eq!(ci.max_anisotropy, 16.0);
        assert_eq!(ci.anisotropy_enable, vk::TRUE);
        assert_eq!(ci.mipmap_mode, vk::SamplerMipmapMode::LINEAR);
        assert_eq!(ci.address_mode_u, vk::SamplerAddressMode::REPEAT);
    }
}

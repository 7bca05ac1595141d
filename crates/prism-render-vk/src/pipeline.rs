// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use ash::util::read_spv;
use ash::vk;
use prism_render::{PushConstants, Vertex};
use tracing::{debug, info, warn};

use crate::error::{Error, Result, VkContext};

static STANDARD_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/standard.vert.spv"));
static STANDARD_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/standard.frag.spv"));

/// Everything needed to (re)create a graphics pipeline against the current
/// render pass.
#[derive(Clone, Debug)]
pub struct PipelineDesc {
    pub vertex_spv: Vec<u32>,
    pub fragment_spv: Vec<u32>,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub depth_test: bool,
    pub depth_write: bool,
    /// Bytes visible to both stages; 0 for no push-constant range.
    pub push_constant_size: u32,
}

impl PipelineDesc {
    pub fn from_spirv(vertex: &[u8], fragment: &[u8]) -> Result<Self> {
        Ok(Self {
            vertex_spv: read_spv(&mut Cursor::new(vertex)).map_err(Error::Spirv)?,
            fragment_spv: read_spv(&mut Cursor::new(fragment)).map_err(Error::Spirv)?,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            depth_test: true,
            depth_write: true,
            push_constant_size: std::mem::size_of::<PushConstants>() as u32,
        })
    }

    /// Built-in textured shader pair with barycentric wireframe blending.
    pub fn standard() -> Result<Self> {
        Self::from_spirv(STANDARD_VERT, STANDARD_FRAG)
    }

    pub fn with_cull_mode(mut self, cull_mode: vk::CullModeFlags) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    pub fn with_polygon_mode(mut self, polygon_mode: vk::PolygonMode) -> Self {
        self.polygon_mode = polygon_mode;
        self
    }

    pub fn with_depth(mut self, test: bool, write: bool) -> Self {
        self.depth_test = test;
        self.depth_write = write;
        self
    }
}

pub struct GpuPipeline {
    pub desc: PipelineDesc,
    pub layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
}

impl GpuPipeline {
    pub unsafe fn new(
        device: &ash::Device,
        cache: vk::PipelineCache,
        render_pass: vk::RenderPass,
        set_layout: vk::DescriptorSetLayout,
        desc: PipelineDesc,
        fill_mode_non_solid: bool,
    ) -> Result<Self> {
        let range = vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            offset: 0,
            size: desc.push_constant_size,
        };
        let layout_info = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            set_layout_count: 1,
            p_set_layouts: &set_layout,
            push_constant_range_count: u32::from(desc.push_constant_size > 0),
            p_push_constant_ranges: &range,
            ..Default::default()
        };
        let layout = device
            .create_pipeline_layout(&layout_info, None)
            .context("create_pipeline_layout")?;
        match create_pipeline(device, cache, render_pass, layout, &desc, fill_mode_non_solid) {
            Ok(pipeline) => Ok(Self {
                desc,
                layout,
                pipeline,
            }),
            Err(e) => {
                device.destroy_pipeline_layout(layout, None);
                Err(e)
            }
        }
    }

    /// New pipeline object for a changed render pass; the layout survives.
    pub unsafe fn recreate(
        &mut self,
        device: &ash::Device,
        cache: vk::PipelineCache,
        render_pass: vk::RenderPass,
        fill_mode_non_solid: bool,
    ) -> Result<()> {
        let pipeline = create_pipeline(
            device,
            cache,
            render_pass,
            self.layout,
            &self.desc,
            fill_mode_non_solid,
        )?;
        device.destroy_pipeline(self.pipeline, None);
        self.pipeline = pipeline;
        Ok(())
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_pipeline(self.pipeline, None);
        device.destroy_pipeline_layout(self.layout, None);
    }
}

unsafe fn shader_module(device: &ash::Device, code: &[u32]) -> Result<vk::ShaderModule> {
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        p_code: code.as_ptr(),
        code_size: code.len() * 4,
        ..Default::default()
    };
    device
        .create_shader_module(&ci, None)
        .context("create_shader_module")
}

unsafe fn create_pipeline(
    device: &ash::Device,
    cache: vk::PipelineCache,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    desc: &PipelineDesc,
    fill_mode_non_solid: bool,
) -> Result<vk::Pipeline> {
    // STRICT: the render pass must match the chain's current color format.
    // On a format change every pipeline is recreated before recording.
    let vs = shader_module(device, &desc.vertex_spv)?;
    let fs = match shader_module(device, &desc.fragment_spv) {
        Ok(fs) => fs,
        Err(e) => {
            device.destroy_shader_module(vs, None);
            return Err(e);
        }
    };
    let entry = c"main";

    let stages = [
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::VERTEX,
            module: vs,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::FRAGMENT,
            module: fs,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
    ];

    let vb = vk::VertexInputBindingDescription {
        binding: 0,
        stride: std::mem::size_of::<Vertex>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    };
    let va = [
        vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: std::mem::offset_of!(Vertex, position) as u32,
        },
        vk::VertexInputAttributeDescription {
            location: 1,
            binding: 0,
            format: vk::Format::R32G32_SFLOAT,
            offset: std::mem::offset_of!(Vertex, uv) as u32,
        },
    ];
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        vertex_binding_description_count: 1,
        p_vertex_binding_descriptions: &vb,
        vertex_attribute_description_count: va.len() as u32,
        p_vertex_attribute_descriptions: va.as_ptr(),
        ..Default::default()
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        ..Default::default()
    };
    let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
        dynamic_state_count: dyn_states.len() as u32,
        p_dynamic_states: dyn_states.as_ptr(),
        ..Default::default()
    };
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
        viewport_count: 1,
        scissor_count: 1,
        ..Default::default()
    };

    let polygon_mode = if desc.polygon_mode != vk::PolygonMode::FILL && !fill_mode_non_solid {
        warn!(
            "{:?} needs fillModeNonSolid, falling back to FILL",
            desc.polygon_mode
        );
        vk::PolygonMode::FILL
    } else {
        desc.polygon_mode
    };
    let raster = vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        polygon_mode,
        cull_mode: desc.cull_mode,
        front_face: vk::FrontFace::COUNTER_CLOCKWISE,
        line_width: 1.0,
        ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        rasterization_samples: vk::SampleCountFlags::TYPE_1,
        ..Default::default()
    };
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
        depth_test_enable: vk::Bool32::from(desc.depth_test),
        depth_write_enable: vk::Bool32::from(desc.depth_write),
        depth_compare_op: vk::CompareOp::LESS_OR_EQUAL,
        ..Default::default()
    };
    // Alpha blending so the wireframe fade can discard or mix edges.
    let color_blend_att = vk::PipelineColorBlendAttachmentState {
        color_write_mask: vk::ColorComponentFlags::RGBA,
        blend_enable: vk::TRUE,
        src_color_blend_factor: vk::BlendFactor::SRC_ALPHA,
        dst_color_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        color_blend_op: vk::BlendOp::ADD,
        src_alpha_blend_factor: vk::BlendFactor::ONE,
        dst_alpha_blend_factor: vk::BlendFactor::ZERO,
        alpha_blend_op: vk::BlendOp::ADD,
    };
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color_blend_att,
        ..Default::default()
    };

    let pipeline_info = vk::GraphicsPipelineCreateInfo {
        s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
        stage_count: stages.len() as u32,
        p_stages: stages.as_ptr(),
        p_vertex_input_state: &vertex_input,
        p_input_assembly_state: &input_assembly,
        p_viewport_state: &viewport_state,
        p_rasterization_state: &raster,
        p_multisample_state: &multisample,
        p_depth_stencil_state: &depth_stencil,
        p_color_blend_state: &color_blend,
        p_dynamic_state: &dynamic_state,
        layout,
        render_pass,
        subpass: 0,
        ..Default::default()
    };

    let created =
        device.create_graphics_pipelines(cache, std::slice::from_ref(&pipeline_info), None);
    device.destroy_shader_module(vs, None);
    device.destroy_shader_module(fs, None);
    match created {
        Ok(pipelines) => pipelines
            .first()
            .copied()
            .ok_or(Error::Vulkan {
                op: "create_graphics_pipelines",
                result: vk::Result::ERROR_UNKNOWN,
            }),
        Err((_, result)) => Err(Error::Vulkan {
            op: "create_graphics_pipelines",
            result,
        }),
    }
}

fn hex_bytes(b: &[u8]) -> String {
    use std::fmt::Write as _;
    b.iter().fold(String::with_capacity(b.len() * 2), |mut s, x| {
        let _ = write!(s, "{x:02x}");
        s
    })
}

/// Cache blobs are only valid for the exact device and driver build.
pub fn cache_file_name(props: &vk::PhysicalDeviceProperties) -> String {
    format!(
        "vk_pipeline_cache_{:04x}_{:04x}_{:08x}_{}.bin",
        props.vendor_id,
        props.device_id,
        props.driver_version,
        hex_bytes(&props.pipeline_cache_uuid)
    )
}

pub struct PipelineCache {
    pub handle: vk::PipelineCache,
    path: Option<PathBuf>,
}

impl PipelineCache {
    /// Seeds the cache from `dir` when a blob for this device exists there.
    /// With no `dir` the cache lives in memory only.
    pub unsafe fn load(
        device: &ash::Device,
        props: &vk::PhysicalDeviceProperties,
        dir: Option<&Path>,
    ) -> Result<Self> {
        let path = dir.map(|d| d.join(cache_file_name(props)));
        let data = path.as_ref().and_then(|p| fs::read(p).ok()).unwrap_or_default();
        let ci = vk::PipelineCacheCreateInfo {
            s_type: vk::StructureType::PIPELINE_CACHE_CREATE_INFO,
            initial_data_size: data.len(),
            p_initial_data: data.as_ptr().cast(),
            ..Default::default()
        };
        let handle = match device.create_pipeline_cache(&ci, None) {
            Ok(h) => h,
            // A stale or corrupt blob is rejected by some drivers; start empty.
            Err(_) if !data.is_empty() => {
                warn!("pipeline cache blob rejected, starting empty");
                let empty = vk::PipelineCacheCreateInfo::default();
                device
                    .create_pipeline_cache(&empty, None)
                    .context("create_pipeline_cache")?
            }
            Err(result) => {
                return Err(Error::Vulkan {
                    op: "create_pipeline_cache",
                    result,
                })
            }
        };
        if let Some(p) = &path {
            debug!("pipeline cache {} ({} bytes)", p.display(), data.len());
        }
        Ok(Self { handle, path })
    }

    /// Best effort; failures are logged.
    pub unsafe fn save(&self, device: &ash::Device) {
        let Some(path) = &self.path else { return };
        match device.get_pipeline_cache_data(self.handle) {
            Ok(bytes) => {
                if let Some(parent) = path.parent() {
                    let _ = fs::create_dir_all(parent);
                }
                match fs::write(path, &bytes) {
                    Ok(()) => info!("saved pipeline cache ({} bytes)", bytes.len()),
                    Err(e) => warn!("could not write {}: {e}", path.display()),
                }
            }
            Err(e) => warn!("get_pipeline_cache_data failed: {e}"),
        }
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_pipeline_cache(self.handle, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_name_encodes_device_identity() {
        let mut props = vk::PhysicalDeviceProperties {
            vendor_id: 0x10de,
            device_id: 0x2684,
            driver_version: 0x0220_0000,
            ..Default::default()
        };
        props.pipeline_cache_uuid[0] = 0xab;
        props.pipeline_cache_uuid[15] = 0x01;
        let name = cache_file_name(&props);
        assert_eq!(
            name,
            "vk_pipeline_cache_10de_2684_02200000_ab000000000000000000000000000001.bin"
        );
    }

    #[test]
    fn standard_shaders_are_valid_spirv() {
        let desc = PipelineDesc::standard().unwrap();
        assert_eq!(desc.vertex_spv[0], 0x0723_0203);
        assert_eq!(desc.fragment_spv[0], 0x0723_0203);
        assert_eq!(desc.push_constant_size, 80);
        assert!(desc.depth_test && desc.depth_write);
    }

    #[test]
    fn misaligned_spirv_is_rejected() {
        assert!(matches!(
            PipelineDesc::from_spirv(&[1, 2, 3], &[]),
            Err(Error::Spirv(_))
        ));
    }
}

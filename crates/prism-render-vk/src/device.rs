// SPDX-License-Identifier: CEPL-1.0
//! Adapter negotiation and the logical device.
//!
//! Adapters are judged in enumeration order and the first one meeting every
//! requirement wins; there is no scoring.
use std::ffi::{c_char, CStr};

use ash::khr::{surface, swapchain};
use ash::vk;
use tracing::{info, warn};

use crate::error::{Error, Result, VkContext};
use crate::instance::InstanceContext;

/// Extensions every adapter must expose.
const REQUIRED_EXTENSIONS: [&CStr; 2] = [
    swapchain::NAME,
    ash::khr::fragment_shader_barycentric::NAME,
];

/// Queue capabilities of one family, as far as selection cares.
#[derive(Clone, Copy, Debug)]
pub struct FamilyCaps {
    pub flags: vk::QueueFlags,
    pub present: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
    pub transfer: u32,
}

impl QueueFamilies {
    /// Graphics prefers a family that can also present. Transfer work
    /// includes mip blits, so it needs a graphics-capable family; a second
    /// one is used when available, else the graphics family itself.
    pub fn find(families: &[FamilyCaps]) -> Option<Self> {
        let graphics_capable = |f: &FamilyCaps| f.flags.contains(vk::QueueFlags::GRAPHICS);
        let indexed = || families.iter().enumerate().map(|(i, f)| (i as u32, f));

        let graphics = indexed()
            .find(|(_, f)| graphics_capable(f) && f.present)
            .or_else(|| indexed().find(|(_, f)| graphics_capable(f)))?
            .0;
        let present = if families[graphics as usize].present {
            graphics
        } else {
            indexed().find(|(_, f)| f.present)?.0
        };
        let transfer = indexed()
            .find(|&(i, f)| i != graphics && graphics_capable(f))
            .map_or(graphics, |(i, _)| i);

        Some(Self {
            graphics,
            present,
            transfer,
        })
    }

    /// Distinct families, one queue each.
    pub fn unique(&self) -> Vec<u32> {
        let mut v = vec![self.graphics, self.present, self.transfer];
        v.sort_unstable();
        v.dedup();
        v
    }
}

/// Everything adapter selection looks at, gathered up front so the
/// decision itself is pure.
#[derive(Clone, Debug)]
pub struct AdapterReport {
    pub name: String,
    pub anisotropy: bool,
    pub barycentric: bool,
    /// The standard fragment shader indexes its sampler array with a push
    /// constant.
    pub dynamic_sampler_indexing: bool,
    pub missing_extensions: Vec<String>,
    pub families: Option<QueueFamilies>,
    pub surface_formats: usize,
    pub present_modes: usize,
}

impl AdapterReport {
    /// Why the adapter cannot be used, or `None` if it can.
    pub fn rejection(&self) -> Option<String> {
        if !self.missing_extensions.is_empty() {
            return Some(format!("missing extensions {:?}", self.missing_extensions));
        }
        if !self.anisotropy {
            return Some("no anisotropic sampling".into());
        }
        if !self.barycentric {
            return Some("no fragment shader barycentrics".into());
        }
        if !self.dynamic_sampler_indexing {
            return Some("no dynamic indexing of sampler arrays".into());
        }
        if self.families.is_none() {
            return Some("no graphics + present queue families".into());
        }
        if self.surface_formats == 0 {
            return Some("surface reports no formats".into());
        }
        if self.present_modes == 0 {
            return Some("surface reports no present modes".into());
        }
        None
    }
}

unsafe fn report_adapter(ctx: &InstanceContext, phys: vk::PhysicalDevice) -> Result<AdapterReport> {
    let instance = &ctx.instance;
    let props = instance.get_physical_device_properties(phys);
    let name = props
        .device_name_as_c_str()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "<unnamed>".into());

    let available = instance
        .enumerate_device_extension_properties(phys)
        .context("enumerate_device_extension_properties")?;
    let missing_extensions = REQUIRED_EXTENSIONS
        .iter()
        .filter(|want| {
            !available
                .iter()
                .any(|e| e.extension_name_as_c_str().is_ok_and(|n| n == **want))
        })
        .map(|n| n.to_string_lossy().into_owned())
        .collect();

    let mut bary = vk::PhysicalDeviceFragmentShaderBarycentricFeaturesKHR::default();
    let mut features2 = vk::PhysicalDeviceFeatures2::default().push_next(&mut bary);
    instance.get_physical_device_features2(phys, &mut features2);
    let anisotropy = features2.features.sampler_anisotropy == vk::TRUE;
    let dynamic_sampler_indexing =
        features2.features.shader_sampled_image_array_dynamic_indexing == vk::TRUE;
    let barycentric = bary.fragment_shader_barycentric == vk::TRUE;

    let mut caps = Vec::new();
    for (i, family) in instance
        .get_physical_device_queue_family_properties(phys)
        .iter()
        .enumerate()
    {
        let present = ctx
            .surface_loader
            .get_physical_device_surface_support(phys, i as u32, ctx.surface)
            .context("get_physical_device_surface_support")?;
        caps.push(FamilyCaps {
            flags: family.queue_flags,
            present,
        });
    }

    let surface_formats = ctx
        .surface_loader
        .get_physical_device_surface_formats(phys, ctx.surface)
        .context("get_physical_device_surface_formats")?
        .len();
    let present_modes = ctx
        .surface_loader
        .get_physical_device_surface_present_modes(phys, ctx.surface)
        .context("get_physical_device_surface_present_modes")?
        .len();

    Ok(AdapterReport {
        name,
        anisotropy,
        barycentric,
        dynamic_sampler_indexing,
        missing_extensions,
        families: QueueFamilies::find(&caps),
        surface_formats,
        present_modes,
    })
}

/// Logical device, its queues and command pools. Owned by the renderer for
/// its whole life and dropped after every object created from it.
pub struct Device {
    pub(crate) instance: ash::Instance,
    pub(crate) physical: vk::PhysicalDevice,
    pub(crate) properties: vk::PhysicalDeviceProperties,
    pub(crate) memory: vk::PhysicalDeviceMemoryProperties,
    pub(crate) families: QueueFamilies,
    pub(crate) logical: ash::Device,
    pub(crate) graphics_queue: vk::Queue,
    pub(crate) present_queue: vk::Queue,
    pub(crate) transfer_queue: vk::Queue,
    /// Transient pool for one-shot upload command buffers.
    pub(crate) transfer_pool: vk::CommandPool,
    /// Resettable pool for the per-slot render command buffers.
    pub(crate) render_pool: vk::CommandPool,
    pub(crate) swapchain_loader: swapchain::Device,
    pub(crate) surface_loader: surface::Instance,
    pub(crate) surface: vk::SurfaceKHR,
    pub(crate) depth_format: vk::Format,
    pub(crate) fill_mode_non_solid: bool,
}

unsafe fn pick_depth_format(instance: &ash::Instance, phys: vk::PhysicalDevice) -> vk::Format {
    let candidates = [
        vk::Format::D32_SFLOAT,
        vk::Format::D32_SFLOAT_S8_UINT,
        vk::Format::D24_UNORM_S8_UINT,
    ];
    for &fmt in &candidates {
        let props = instance.get_physical_device_format_properties(phys, fmt);
        if props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        {
            return fmt;
        }
    }
    vk::Format::D32_SFLOAT // fallback; most desktop GPUs support it
}

impl Device {
    pub unsafe fn open(ctx: &InstanceContext) -> Result<Self> {
        let instance = &ctx.instance;
        let adapters = instance
            .enumerate_physical_devices()
            .context("enumerate_physical_devices")?;

        let mut chosen = None;
        for phys in adapters {
            let report = report_adapter(ctx, phys)?;
            match (report.rejection(), report.families) {
                (None, Some(families)) => {
                    info!("adapter: {} ({:?})", report.name, families);
                    chosen = Some((phys, families));
                    break;
                }
                (reason, _) => warn!(
                    "skipping adapter {}: {}",
                    report.name,
                    reason.unwrap_or_default()
                ),
            }
        }
        let (physical, families) = chosen.ok_or(Error::NoSuitableAdapter)?;

        let priority = [1.0f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&priority)
            })
            .collect();

        let available = instance
            .enumerate_device_extension_properties(physical)
            .context("enumerate_device_extension_properties")?;
        let mut extensions: Vec<*const c_char> =
            REQUIRED_EXTENSIONS.iter().map(|n| n.as_ptr()).collect();
        // Portability implementations (MoltenVK) require it enabled when listed.
        if available.iter().any(|e| {
            e.extension_name_as_c_str()
                .is_ok_and(|n| n == ash::khr::portability_subset::NAME)
        }) {
            extensions.push(ash::khr::portability_subset::NAME.as_ptr());
        }

        let supported = instance.get_physical_device_features(physical);
        let fill_mode_non_solid = supported.fill_mode_non_solid == vk::TRUE;
        let features = vk::PhysicalDeviceFeatures {
            sampler_anisotropy: vk::TRUE,
            fill_mode_non_solid: supported.fill_mode_non_solid,
            // texture_index indexes the sampler array from a push constant
            shader_sampled_image_array_dynamic_indexing: vk::TRUE,
            ..Default::default()
        };
        let mut bary = vk::PhysicalDeviceFragmentShaderBarycentricFeaturesKHR {
            fragment_shader_barycentric: vk::TRUE,
            ..Default::default()
        };
        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features)
            .push_next(&mut bary);
        let logical = instance
            .create_device(physical, &create_info, None)
            .context("create_device")?;

        let mut device = Self {
            instance: instance.clone(),
            physical,
            properties: instance.get_physical_device_properties(physical),
            memory: instance.get_physical_device_memory_properties(physical),
            families,
            graphics_queue: logical.get_device_queue(families.graphics, 0),
            present_queue: logical.get_device_queue(families.present, 0),
            transfer_queue: logical.get_device_queue(families.transfer, 0),
            transfer_pool: vk::CommandPool::null(),
            render_pool: vk::CommandPool::null(),
            swapchain_loader: swapchain::Device::new(instance, &logical),
            surface_loader: ctx.surface_loader.clone(),
            surface: ctx.surface,
            depth_format: pick_depth_format(instance, physical),
            fill_mode_non_solid,
            logical,
        };

        let transfer_pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: families.transfer,
            flags: vk::CommandPoolCreateFlags::TRANSIENT,
            ..Default::default()
        };
        device.transfer_pool = device
            .logical
            .create_command_pool(&transfer_pool_info, None)
            .context("create_command_pool(transfer)")?;
        let render_pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: families.graphics,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        device.render_pool = device
            .logical
            .create_command_pool(&render_pool_info, None)
            .context("create_command_pool(render)")?;

        info!("device ready, depth format {:?}", device.depth_format);
        Ok(device)
    }

    /// Sharing for resources written on the transfer queue and read on the
    /// graphics queue.
    pub(crate) fn resource_sharing(&self) -> (vk::SharingMode, Vec<u32>) {
        if self.families.transfer == self.families.graphics {
            (vk::SharingMode::EXCLUSIVE, Vec::new())
        } else {
            (
                vk::SharingMode::CONCURRENT,
                vec![self.families.graphics, self.families.transfer],
            )
        }
    }

    pub(crate) unsafe fn supports_linear_blit(&self, format: vk::Format) -> bool {
        self.instance
            .get_physical_device_format_properties(self.physical, format)
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.logical.device_wait_idle() }.context("device_wait_idle")
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            self.logical.device_wait_idle().ok();
            if self.render_pool != vk::CommandPool::null() {
                self.logical.destroy_command_pool(self.render_pool, None);
            }
            if self.transfer_pool != vk::CommandPool::null() {
                self.logical.destroy_command_pool(self.transfer_pool, None);
            }
            self.logical.destroy_device(None);
        }
    }
}

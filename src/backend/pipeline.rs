// Graphics pipeline creation and management
//
// The graphics pipeline defines how vertices are processed and rasterized.
// It includes: vertex input, shaders, rasterization, depth/stencil, blending.

use anyhow::{Context, Result};
use ash::vk;
use std::ffi::c_char;
use std::mem::size_of;
use std::path::Path;

use super::descriptor::{SAMPLER_BINDING, UBO_BINDING};
use super::shader::load_shader_module;
use super::VulkanDevice;
use crate::scene::{PushConstant, Vertex};

/// Create a render pass for basic color attachment rendering with depth
pub fn create_render_pass(
    device: &VulkanDevice,
    color_format: vk::Format,
    depth_format: vk::Format,
) -> Result<vk::RenderPass> {
    // Color attachment (the swapchain image)
    let color_attachment = vk::AttachmentDescription::builder()
        .format(color_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build();

    let depth_attachment = vk::AttachmentDescription::builder()
        .format(depth_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::DONT_CARE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        .build();

    let color_attachment_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };

    let depth_attachment_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };

    let color_attachments = &[color_attachment_ref];
    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(color_attachments)
        .depth_stencil_attachment(&depth_attachment_ref)
        .build();

    let attachment_stages =
        vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(attachment_stages)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(attachment_stages)
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        )
        .build();

    let attachments = &[color_attachment, depth_attachment];
    let subpasses = &[subpass];
    let dependencies = &[dependency];

    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(attachments)
        .subpasses(subpasses)
        .dependencies(dependencies);

    unsafe { device.device.create_render_pass(&render_pass_info, None) }
        .context("Failed to create render pass")
}

/// One framebuffer per swapchain image, all sharing the depth view
pub fn create_framebuffers(
    device: &VulkanDevice,
    image_views: &[vk::ImageView],
    depth_image_view: vk::ImageView,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
) -> Result<Vec<vk::Framebuffer>> {
    let mut framebuffers = Vec::with_capacity(image_views.len());

    for &image_view in image_views {
        let attachments = &[image_view, depth_image_view];
        let framebuffer_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        match unsafe { device.device.create_framebuffer(&framebuffer_info, None) } {
            Ok(framebuffer) => framebuffers.push(framebuffer),
            Err(e) => {
                destroy_framebuffers(device, &framebuffers);
                return Err(e).context("Failed to create framebuffer");
            }
        }
    }

    Ok(framebuffers)
}

pub fn destroy_framebuffers(device: &VulkanDevice, framebuffers: &[vk::Framebuffer]) {
    for &framebuffer in framebuffers {
        unsafe { device.device.destroy_framebuffer(framebuffer, None) };
    }
}

/// Uniform buffer at binding 0, combined image sampler at binding 1
pub fn descriptor_bindings() -> [vk::DescriptorSetLayoutBinding; 2] {
    [
        vk::DescriptorSetLayoutBinding::builder()
            .binding(UBO_BINDING)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::ALL_GRAPHICS)
            .build(),
        vk::DescriptorSetLayoutBinding::builder()
            .binding(SAMPLER_BINDING)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::ALL_GRAPHICS)
            .build(),
    ]
}

pub fn create_descriptor_set_layout(device: &VulkanDevice) -> Result<vk::DescriptorSetLayout> {
    let bindings = descriptor_bindings();
    let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);

    unsafe { device.device.create_descriptor_set_layout(&layout_info, None) }
        .context("Failed to create descriptor set layout")
}

/// View-projection matrix pushed once per draw
pub fn push_constant_range() -> vk::PushConstantRange {
    vk::PushConstantRange {
        stage_flags: vk::ShaderStageFlags::VERTEX,
        offset: 0,
        size: size_of::<PushConstant>() as u32,
    }
}

pub fn create_pipeline_layout(
    device: &VulkanDevice,
    set_layout: vk::DescriptorSetLayout,
) -> Result<vk::PipelineLayout> {
    let set_layouts = [set_layout];
    let push_constant_ranges = [push_constant_range()];

    let layout_info = vk::PipelineLayoutCreateInfo::builder()
        .set_layouts(&set_layouts)
        .push_constant_ranges(&push_constant_ranges);

    unsafe { device.device.create_pipeline_layout(&layout_info, None) }
        .context("Failed to create pipeline layout")
}

/// Build the pyramid pipeline from SPIR-V files on disk.
///
/// Shader modules only live for the duration of this call. When
/// `capture_executables` is set the driver keeps statistics and internal
/// representations for [`dump_pipeline_executables`].
pub fn create_graphics_pipeline(
    device: &VulkanDevice,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    vertex_shader: &Path,
    fragment_shader: &Path,
    capture_executables: bool,
) -> Result<vk::Pipeline> {
    let vert_module = load_shader_module(device, vertex_shader)?;
    let frag_module = match load_shader_module(device, fragment_shader) {
        Ok(module) => module,
        Err(e) => {
            unsafe { device.device.destroy_shader_module(vert_module, None) };
            return Err(e);
        }
    };

    let result = build_pipeline(
        device,
        render_pass,
        layout,
        vert_module,
        frag_module,
        capture_executables,
    );

    unsafe {
        device.device.destroy_shader_module(vert_module, None);
        device.device.destroy_shader_module(frag_module, None);
    }

    result
}

fn build_pipeline(
    device: &VulkanDevice,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    vert_module: vk::ShaderModule,
    frag_module: vk::ShaderModule,
    capture_executables: bool,
) -> Result<vk::Pipeline> {
    let entry_point = c"main";

    let shader_stages = [
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vert_module)
            .name(entry_point)
            .build(),
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(frag_module)
            .name(entry_point)
            .build(),
    ];

    let bindings = [Vertex::binding_description()];
    let attributes = Vertex::attribute_descriptions();
    let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    // Viewport and scissor are set per frame
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewport_count(1)
        .scissor_count(1);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

    let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .depth_bias_enable(false);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(true)
        .depth_write_enable(true)
        .depth_compare_op(vk::CompareOp::LESS)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(false)
        .build();

    let color_blend_attachments = &[color_blend_attachment];
    let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .attachments(color_blend_attachments);

    let flags = if capture_executables {
        vk::PipelineCreateFlags::CAPTURE_STATISTICS_KHR
            | vk::PipelineCreateFlags::CAPTURE_INTERNAL_REPRESENTATIONS_KHR
    } else {
        vk::PipelineCreateFlags::empty()
    };

    let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
        .flags(flags)
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input_info)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisampling)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blending)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0)
        .build();

    let pipelines = unsafe {
        device
            .device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    }
    .map_err(|(_, e)| e)
    .context("Failed to create graphics pipeline")?;

    pipelines
        .into_iter()
        .next()
        .context("Driver returned no graphics pipeline")
}

/// Log executable properties, statistics and internal representation
/// names. No-op unless the device was created with the extension.
pub fn dump_pipeline_executables(device: &VulkanDevice, pipeline: vk::Pipeline) -> Result<()> {
    let Some(loader) = device.pipeline_executable_properties.as_ref() else {
        return Ok(());
    };

    let pipeline_info = vk::PipelineInfoKHR::builder().pipeline(pipeline);
    let executables = unsafe { loader.get_pipeline_executable_properties(&pipeline_info) }
        .context("Failed to query pipeline executable properties")?;

    log::info!("Pipeline has {} executable(s)", executables.len());

    for (index, executable) in executables.iter().enumerate() {
        log::info!(
            "Executable {}: {} ({}) stages={:?} subgroup={}",
            index,
            fixed_str(&executable.name),
            fixed_str(&executable.description),
            executable.stages,
            executable.subgroup_size
        );

        let executable_info = vk::PipelineExecutableInfoKHR::builder()
            .pipeline(pipeline)
            .executable_index(index as u32);

        let statistics = unsafe { loader.get_pipeline_executable_statistics(&executable_info) }
            .context("Failed to query pipeline executable statistics")?;
        for statistic in &statistics {
            log::info!(
                "  {} = {} ({})",
                fixed_str(&statistic.name),
                format_statistic(statistic),
                fixed_str(&statistic.description)
            );
        }

        let representations = unsafe {
            loader.get_pipeline_executable_internal_representations(&executable_info)
        }
        .context("Failed to query pipeline internal representations")?;
        for representation in &representations {
            log::info!(
                "  IR: {} ({}), {} bytes{}",
                fixed_str(&representation.name),
                fixed_str(&representation.description),
                representation.data_size,
                if representation.is_text == vk::TRUE {
                    ", text"
                } else {
                    ""
                }
            );
        }
    }

    Ok(())
}

fn format_statistic(statistic: &vk::PipelineExecutableStatisticKHR) -> String {
    // The union member is selected by `format`
    unsafe {
        match statistic.format {
            vk::PipelineExecutableStatisticFormatKHR::BOOL32 => {
                (statistic.value.b32 == vk::TRUE).to_string()
            }
            vk::PipelineExecutableStatisticFormatKHR::INT64 => statistic.value.i64.to_string(),
            vk::PipelineExecutableStatisticFormatKHR::UINT64 => statistic.value.u64.to_string(),
            vk::PipelineExecutableStatisticFormatKHR::FLOAT64 => statistic.value.f64.to_string(),
            other => format!("<{:?}>", other),
        }
    }
}

/// NUL-terminated fixed-size driver string to a Rust string
fn fixed_str(chars: &[c_char]) -> String {
    let bytes: Vec<u8> = chars
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_constant_covers_view_projection() {
        let range = push_constant_range();
        assert_eq!(range.offset, 0);
        assert_eq!(range.size, 64);
        assert_eq!(range.stage_flags, vk::ShaderStageFlags::VERTEX);
    }

    #[test]
    fn layout_bindings_match_shaders() {
        let [ubo, sampler] = descriptor_bindings();
        assert_eq!(ubo.binding, 0);
        assert_eq!(ubo.descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sampler.binding, 1);
        assert_eq!(
            sampler.descriptor_type,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
        assert!(sampler
            .stage_flags
            .contains(vk::ShaderStageFlags::FRAGMENT));
    }

    #[test]
    fn fixed_str_stops_at_nul() {
        let mut chars = [0 as c_char; 16];
        for (dst, &src) in chars.iter_mut().zip(b"Fragment") {
            *dst = src as c_char;
        }
        assert_eq!(fixed_str(&chars), "Fragment");
        assert_eq!(fixed_str(&[0; 4]), "");
    }

    #[test]
    fn statistics_format_by_kind() {
        let statistic = vk::PipelineExecutableStatisticKHR {
            format: vk::PipelineExecutableStatisticFormatKHR::UINT64,
            value: vk::PipelineExecutableStatisticValueKHR { u64: 42 },
            ..Default::default()
        };
        assert_eq!(format_statistic(&statistic), "42");

        let statistic = vk::PipelineExecutableStatisticKHR {
            format: vk::PipelineExecutableStatisticFormatKHR::BOOL32,
            value: vk::PipelineExecutableStatisticValueKHR { b32: vk::TRUE },
            ..Default::default()
        };
        assert_eq!(format_statistic(&statistic), "true");
    }
}

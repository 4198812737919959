// =============================================================================
// RENDERER - Owns every GPU object and drives the frame loop
// =============================================================================
//
// Long-lived objects register their destructor in a deletion queue right
// after creation. Objects that get replaced at runtime (swapchain targets,
// the pipeline on shader reload, per-frame uniform buffers that are
// written every frame) are owned directly and destroyed before the queue
// is flushed.
//
// FRAME FLOW (per frame slot f):
// 1. Wait for fence f
// 2. Acquire swapchain image (signals image_available f)
// 3. Reset fence f and command buffer f
// 4. Write uniform buffer f, record the draw
// 5. Submit (waits image_available f, signals render_finished f + fence f)
// 6. Present (waits render_finished f)
// 7. f = (f + 1) % frames in flight

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::MemoryLocation;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::mem::size_of;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::backend::buffer::Buffer;
use crate::backend::command::CommandPool;
use crate::backend::deletion::DeletionQueue;
use crate::backend::descriptor::FrameDescriptors;
use crate::backend::device::DeviceSettings;
use crate::backend::image::{self, Image};
use crate::backend::pipeline;
use crate::backend::shader::ShaderWatcher;
use crate::backend::sync::{next_frame_slot, FrameSync};
use crate::backend::{Swapchain, VulkanDevice};
use crate::config::Config;
use crate::scene::{
    self, PushConstant, UniformBufferObject, PYRAMID_INDICES, PYRAMID_VERTICES,
};
use crate::texture::TextureData;

/// Everything that has to be rebuilt when the window size changes
struct SwapchainTargets {
    swapchain: Swapchain,
    depth: Image,
    framebuffers: Vec<vk::Framebuffer>,
}

impl SwapchainTargets {
    fn new(
        device: &Arc<VulkanDevice>,
        commands: &CommandPool,
        swapchain: Swapchain,
        render_pass: vk::RenderPass,
        depth_format: vk::Format,
    ) -> Result<Self> {
        let depth = Image::new(
            device,
            "depth",
            depth_format,
            swapchain.extent,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
        )?;

        let transitioned = commands.one_time_submit(device, |cmd| {
            image::cmd_transition_layout(
                &device.device,
                cmd,
                depth.image,
                depth_format,
                vk::ImageAspectFlags::DEPTH,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            )
        });

        let framebuffers = transitioned.and_then(|()| {
            pipeline::create_framebuffers(
                device,
                &swapchain.image_views,
                depth.view,
                render_pass,
                swapchain.extent,
            )
        });

        match framebuffers {
            Ok(framebuffers) => Ok(Self {
                swapchain,
                depth,
                framebuffers,
            }),
            Err(e) => {
                depth.destroy(device);
                Err(e)
            }
        }
    }

    fn destroy(self, device: &VulkanDevice) {
        pipeline::destroy_framebuffers(device, &self.framebuffers);
        self.depth.destroy(device);
        // Swapchain and its views go on drop
    }
}

/// Resources owned by one frame in flight
struct FrameResources {
    sync: FrameSync,
    command_buffer: vk::CommandBuffer,
    uniform: Buffer,
    descriptor_set: vk::DescriptorSet,
}

pub struct Renderer {
    // Replaced at runtime, destroyed by hand
    frames: Vec<FrameResources>,
    targets: Option<SwapchainTargets>,
    pipeline: vk::Pipeline,

    // Created once, destroyed by the deletion queue
    commands: CommandPool,
    render_pass: vk::RenderPass,
    depth_format: vk::Format,
    pipeline_layout: vk::PipelineLayout,
    vertex_buffer: vk::Buffer,
    index_buffer: vk::Buffer,

    deletion_queue: DeletionQueue<VulkanDevice>,
    device: Arc<VulkanDevice>,

    // Settings
    present_mode: vk::PresentModeKHR,
    clear_color: [f32; 4],
    vertex_shader: PathBuf,
    fragment_shader: PathBuf,
    dump_pipeline_executables: bool,
    shader_watcher: Option<ShaderWatcher>,

    // State
    window_extent: vk::Extent2D,
    current_frame: usize,
    needs_resize: bool,
    is_minimized: bool,
    start_time: Instant,
}

impl Renderer {
    /// Create the device and every resource needed to draw.
    ///
    /// On failure, whatever was already created is destroyed before the
    /// error is returned.
    pub fn new(
        config: &Config,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        log::info!("Initializing renderer...");

        let settings = DeviceSettings {
            app_name: &config.window.title,
            enable_validation: config.debug.validation_layers,
            capture_pipeline_executables: config.debug.dump_pipeline_executables,
        };
        let device = VulkanDevice::new(&settings, display_handle, window_handle)?;

        let mut renderer = Self {
            frames: Vec::new(),
            targets: None,
            pipeline: vk::Pipeline::null(),
            commands: CommandPool {
                pool: vk::CommandPool::null(),
            },
            render_pass: vk::RenderPass::null(),
            depth_format: vk::Format::UNDEFINED,
            pipeline_layout: vk::PipelineLayout::null(),
            vertex_buffer: vk::Buffer::null(),
            index_buffer: vk::Buffer::null(),
            deletion_queue: DeletionQueue::new(),
            device,
            present_mode: config.get_present_mode(),
            clear_color: config.graphics.clear_color,
            vertex_shader: config.assets.vertex_shader.clone(),
            fragment_shader: config.assets.fragment_shader.clone(),
            dump_pipeline_executables: config.debug.dump_pipeline_executables,
            shader_watcher: None,
            window_extent: vk::Extent2D { width, height },
            current_frame: 0,
            needs_resize: false,
            is_minimized: width == 0 || height == 0,
            start_time: Instant::now(),
        };

        // Drop cleans up a partially initialized renderer
        renderer.init(config)?;

        log::info!("Renderer initialized");
        Ok(renderer)
    }

    fn init(&mut self, config: &Config) -> Result<()> {
        let device = Arc::clone(&self.device);

        // ─────────────────────────────────────────────────────────────────────
        // Commands and presentation
        // ─────────────────────────────────────────────────────────────────────
        let commands = CommandPool::new(&device, device.queue_families.graphics)?;
        self.deletion_queue
            .push("command pool", move |d: &VulkanDevice| commands.destroy(d));
        self.commands = commands;

        self.depth_format = image::find_depth_format(&device)?;
        log::info!("Depth format: {:?}", self.depth_format);

        let swapchain = Swapchain::new(
            Arc::clone(&device),
            self.window_extent.width,
            self.window_extent.height,
            self.present_mode,
        )?;

        let render_pass = pipeline::create_render_pass(&device, swapchain.format, self.depth_format)?;
        self.deletion_queue
            .push("render pass", move |d: &VulkanDevice| unsafe {
                d.device.destroy_render_pass(render_pass, None)
            });
        self.render_pass = render_pass;

        self.targets = Some(SwapchainTargets::new(
            &device,
            &self.commands,
            swapchain,
            render_pass,
            self.depth_format,
        )?);

        // ─────────────────────────────────────────────────────────────────────
        // Pipeline
        // ─────────────────────────────────────────────────────────────────────
        let set_layout = pipeline::create_descriptor_set_layout(&device)?;
        self.deletion_queue
            .push("descriptor set layout", move |d: &VulkanDevice| unsafe {
                d.device.destroy_descriptor_set_layout(set_layout, None)
            });

        let pipeline_layout = pipeline::create_pipeline_layout(&device, set_layout)?;
        self.deletion_queue
            .push("pipeline layout", move |d: &VulkanDevice| unsafe {
                d.device.destroy_pipeline_layout(pipeline_layout, None)
            });
        self.pipeline_layout = pipeline_layout;

        self.pipeline = self.build_pipeline()?;

        // ─────────────────────────────────────────────────────────────────────
        // Scene data
        // ─────────────────────────────────────────────────────────────────────
        let texture_data = TextureData::from_file(&config.assets.texture)?;
        let texture_view = self.upload_scene(&texture_data)?;

        let sampler = image::create_sampler(&device)?;
        self.deletion_queue
            .push("sampler", move |d: &VulkanDevice| unsafe {
                d.device.destroy_sampler(sampler, None)
            });

        // ─────────────────────────────────────────────────────────────────────
        // Per-frame resources
        // ─────────────────────────────────────────────────────────────────────
        let frame_count = config.graphics.max_frames_in_flight.max(1);
        self.create_frames(frame_count, set_layout, texture_view, sampler)?;

        if config.debug.hot_reload_shaders {
            match ShaderWatcher::new(&[self.vertex_shader.clone(), self.fragment_shader.clone()]) {
                Ok(watcher) => self.shader_watcher = Some(watcher),
                Err(e) => log::warn!("Shader hot reload disabled: {:#}", e),
            }
        }

        Ok(())
    }

    fn build_pipeline(&self) -> Result<vk::Pipeline> {
        let pipeline = pipeline::create_graphics_pipeline(
            &self.device,
            self.render_pass,
            self.pipeline_layout,
            &self.vertex_shader,
            &self.fragment_shader,
            self.dump_pipeline_executables,
        )?;

        if self.dump_pipeline_executables {
            if let Err(e) = pipeline::dump_pipeline_executables(&self.device, pipeline) {
                log::warn!("Pipeline executable dump failed: {:#}", e);
            }
        }

        Ok(pipeline)
    }

    /// Copy vertices, indices and the texture to device-local memory with a
    /// single one-time submission. Returns the texture view.
    fn upload_scene(&mut self, texture_data: &TextureData) -> Result<vk::ImageView> {
        let device = Arc::clone(&self.device);

        // Staging buffers die as soon as the upload has been waited on
        let mut staging: DeletionQueue<VulkanDevice> = DeletionQueue::new();
        let result = self.record_upload(&device, texture_data, &mut staging);
        staging.flush(&device);
        result
    }

    fn record_upload(
        &mut self,
        device: &Arc<VulkanDevice>,
        texture_data: &TextureData,
        staging: &mut DeletionQueue<VulkanDevice>,
    ) -> Result<vk::ImageView> {
        let vertex_bytes: &[u8] = bytemuck::cast_slice(&PYRAMID_VERTICES);
        let index_bytes: &[u8] = bytemuck::cast_slice(&PYRAMID_INDICES);

        let vertex_staging = Buffer::new_staging(device, "vertex staging", vertex_bytes)?;
        let vertex_staging_handle = vertex_staging.buffer;
        let vertex_size = vertex_staging.size;
        staging.push("vertex staging", move |d: &VulkanDevice| vertex_staging.destroy(d));

        let index_staging = Buffer::new_staging(device, "index staging", index_bytes)?;
        let index_staging_handle = index_staging.buffer;
        let index_size = index_staging.size;
        staging.push("index staging", move |d: &VulkanDevice| index_staging.destroy(d));

        let texture_staging =
            Buffer::new_staging(device, "texture staging", &texture_data.pixels)?;
        let texture_staging_handle = texture_staging.buffer;
        staging.push("texture staging", move |d: &VulkanDevice| texture_staging.destroy(d));

        let vertex_buffer = Buffer::new(
            device,
            "vertex buffer",
            vertex_size,
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
        )?;
        self.vertex_buffer = vertex_buffer.buffer;
        self.deletion_queue
            .push("vertex buffer", move |d: &VulkanDevice| vertex_buffer.destroy(d));

        let index_buffer = Buffer::new(
            device,
            "index buffer",
            index_size,
            vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
        )?;
        self.index_buffer = index_buffer.buffer;
        self.deletion_queue
            .push("index buffer", move |d: &VulkanDevice| index_buffer.destroy(d));

        let texture_extent = vk::Extent2D {
            width: texture_data.width,
            height: texture_data.height,
        };
        let texture = Image::new(
            device,
            "texture",
            vk::Format::R8G8B8A8_SRGB,
            texture_extent,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            vk::ImageAspectFlags::COLOR,
        )?;
        let texture_image = texture.image;
        let texture_view = texture.view;
        self.deletion_queue
            .push("texture", move |d: &VulkanDevice| texture.destroy(d));

        let (vertex_dst, index_dst) = (self.vertex_buffer, self.index_buffer);
        self.commands.one_time_submit(device, |cmd| {
            let copy = |src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize| unsafe {
                let region = vk::BufferCopy {
                    src_offset: 0,
                    dst_offset: 0,
                    size,
                };
                device.device.cmd_copy_buffer(cmd, src, dst, &[region]);
            };
            copy(vertex_staging_handle, vertex_dst, vertex_size);
            copy(index_staging_handle, index_dst, index_size);

            image::cmd_transition_layout(
                &device.device,
                cmd,
                texture_image,
                vk::Format::R8G8B8A8_SRGB,
                vk::ImageAspectFlags::COLOR,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            )?;
            image::cmd_copy_buffer_to_image(
                &device.device,
                cmd,
                texture_staging_handle,
                texture_image,
                texture_extent,
            );
            image::cmd_transition_layout(
                &device.device,
                cmd,
                texture_image,
                vk::Format::R8G8B8A8_SRGB,
                vk::ImageAspectFlags::COLOR,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )
        })?;

        log::info!(
            "Uploaded {} vertices, {} indices, {}x{} texture",
            PYRAMID_VERTICES.len(),
            PYRAMID_INDICES.len(),
            texture_data.width,
            texture_data.height
        );

        Ok(texture_view)
    }

    fn create_frames(
        &mut self,
        frame_count: usize,
        set_layout: vk::DescriptorSetLayout,
        texture_view: vk::ImageView,
        sampler: vk::Sampler,
    ) -> Result<()> {
        let device = Arc::clone(&self.device);

        let descriptors = FrameDescriptors::new(&device, set_layout, frame_count as u32)?;
        let owned = descriptors.clone();
        self.deletion_queue
            .push("descriptor pool", move |d: &VulkanDevice| owned.destroy(d));

        let command_buffers = self.commands.allocate(&device, frame_count as u32)?;
        let ubo_size = size_of::<UniformBufferObject>() as vk::DeviceSize;

        for (index, command_buffer) in command_buffers.into_iter().enumerate() {
            let sync = FrameSync::new(&device)?;
            self.deletion_queue
                .push("frame sync", move |d: &VulkanDevice| sync.destroy(d));

            let descriptor_set = descriptors.set(index)?;
            let uniform = Buffer::new(
                &device,
                "uniform buffer",
                ubo_size,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                MemoryLocation::CpuToGpu,
            )?;
            let uniform_buffer = uniform.buffer;

            // Renderer Drop frees it from here on
            self.frames.push(FrameResources {
                sync,
                command_buffer,
                uniform,
                descriptor_set,
            });

            descriptors.write(&device, index, uniform_buffer, ubo_size, texture_view, sampler)?;
        }

        log::info!("Created {} frames in flight", self.frames.len());
        Ok(())
    }

    // =========================================================================
    // WINDOW STATE
    // =========================================================================

    pub fn resize(&mut self, width: u32, height: u32) {
        self.window_extent = vk::Extent2D { width, height };
        self.is_minimized = width == 0 || height == 0;
        if !self.is_minimized {
            self.needs_resize = true;
        }
    }

    /// Force a swapchain rebuild on the next frame (fullscreen toggle)
    pub fn request_resize(&mut self) {
        self.needs_resize = true;
    }

    fn recreate_targets(&mut self) -> Result<()> {
        if self.is_minimized {
            return Ok(());
        }

        self.device.wait_idle()?;

        if let Some(old) = self.targets.take() {
            old.destroy(&self.device);
        }

        let swapchain = Swapchain::new(
            Arc::clone(&self.device),
            self.window_extent.width,
            self.window_extent.height,
            self.present_mode,
        )?;
        self.targets = Some(SwapchainTargets::new(
            &self.device,
            &self.commands,
            swapchain,
            self.render_pass,
            self.depth_format,
        )?);

        self.needs_resize = false;
        Ok(())
    }

    /// Rebuild the pipeline if a watched shader changed. A broken shader
    /// keeps the current pipeline.
    fn reload_shaders_if_changed(&mut self) -> Result<()> {
        let changed = self
            .shader_watcher
            .as_ref()
            .is_some_and(|watcher| watcher.poll_changed());
        if !changed {
            return Ok(());
        }

        self.device.wait_idle()?;

        match self.build_pipeline() {
            Ok(pipeline) => {
                unsafe { self.device.device.destroy_pipeline(self.pipeline, None) };
                self.pipeline = pipeline;
                log::info!("Pipeline rebuilt from updated shaders");
            }
            Err(e) => log::error!("Shader reload failed, keeping current pipeline: {:#}", e),
        }

        Ok(())
    }

    // =========================================================================
    // FRAME LOOP
    // =========================================================================

    /// Render one frame. Returns `false` when the frame was skipped.
    pub fn render_frame(&mut self) -> Result<bool> {
        if self.is_minimized {
            return Ok(false);
        }

        self.reload_shaders_if_changed()?;

        let frame = self
            .frames
            .get(self.current_frame)
            .context("No resources for current frame")?;
        let sync = frame.sync;
        let cmd = frame.command_buffer;
        let descriptor_set = frame.descriptor_set;

        sync.wait(&self.device, u64::MAX)?;

        // Fence is still signaled, so skipping leaves the slot reusable
        if self.needs_resize {
            self.recreate_targets()?;
            return Ok(false);
        }

        let targets = self.targets.as_ref().context("Swapchain not initialized")?;
        let Some((image_index, suboptimal)) =
            targets.swapchain.acquire_next_image(u64::MAX, sync.image_available)?
        else {
            self.needs_resize = true;
            self.recreate_targets()?;
            return Ok(false);
        };
        if suboptimal {
            self.needs_resize = true;
        }

        sync.reset(&self.device)?;
        unsafe {
            self.device
                .device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
        }
        .context("Failed to reset command buffer")?;

        let seconds = self.start_time.elapsed().as_secs_f32();
        let aspect = targets.swapchain.aspect_ratio();
        let ubo = UniformBufferObject {
            model: scene::model_matrix(seconds),
        };
        let push = PushConstant {
            view_proj: scene::view_proj(aspect),
        };

        self.record_draw(cmd, image_index, descriptor_set, &push)?;
        self.frames[self.current_frame].uniform.write(&[ubo])?;

        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [cmd];
        let signal_semaphores = [sync.render_finished];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info],
                sync.in_flight_fence,
            )
        }
        .context("Failed to submit draw command buffer")?;

        let targets = self.targets.as_ref().context("Swapchain not initialized")?;
        if targets.swapchain.present(image_index, &signal_semaphores)? {
            self.needs_resize = true;
        }

        self.current_frame = next_frame_slot(self.current_frame, self.frames.len());
        Ok(true)
    }

    fn record_draw(
        &self,
        cmd: vk::CommandBuffer,
        image_index: u32,
        descriptor_set: vk::DescriptorSet,
        push: &PushConstant,
    ) -> Result<()> {
        let device = &self.device.device;
        let targets = self.targets.as_ref().context("Swapchain not initialized")?;
        let framebuffer = *targets
            .framebuffers
            .get(image_index as usize)
            .with_context(|| format!("No framebuffer for swapchain image {}", image_index))?;
        let extent = targets.swapchain.extent;

        let begin_info = vk::CommandBufferBeginInfo::builder();
        unsafe { device.begin_command_buffer(cmd, &begin_info) }
            .context("Failed to begin command buffer")?;

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];

        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };

        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.render_pass)
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(&clear_values);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        unsafe {
            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
            device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer], &[0]);
            device.cmd_bind_index_buffer(cmd, self.index_buffer, 0, vk::IndexType::UINT16);
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[render_area]);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline_layout,
                0,
                &[descriptor_set],
                &[],
            );
            device.cmd_push_constants(
                cmd,
                self.pipeline_layout,
                vk::ShaderStageFlags::VERTEX,
                0,
                bytemuck::bytes_of(push),
            );
            device.cmd_draw_indexed(cmd, PYRAMID_INDICES.len() as u32, 1, 0, 0, 0);
            device.cmd_end_render_pass(cmd);
        }

        unsafe { device.end_command_buffer(cmd) }.context("Failed to end command buffer")
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Cleaning up renderer...");

        if let Err(e) = self.device.wait_idle() {
            log::error!("Device wait failed during cleanup: {:#}", e);
        }

        for frame in self.frames.drain(..) {
            frame.uniform.destroy(&self.device);
        }

        if self.pipeline != vk::Pipeline::null() {
            unsafe { self.device.device.destroy_pipeline(self.pipeline, None) };
        }

        if let Some(targets) = self.targets.take() {
            targets.destroy(&self.device);
        }

        self.deletion_queue.flush(&self.device);

        log::info!("Renderer cleanup complete");
    }
}

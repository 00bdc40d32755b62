// =============================================================================
// APPLICATION - owns every resource and drives the frame loop
// =============================================================================
//
// FRAME FLOW:
// 1. Poll window events
// 2. Move the viewer, update the camera
// 3. Rebuild the pipeline if a shader changed on disk
// 4. begin_frame -> write this frame's uniform buffer -> record -> end_frame

use anyhow::Result;
use ash::vk;
use glam::Vec3;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backend::buffer::HostBuffer;
use crate::backend::descriptors::{
    DescriptorPool, DescriptorPoolBuilder, DescriptorSetLayout, DescriptorSetLayoutBuilder,
    DescriptorWriter,
};
use crate::backend::VulkanDevice;
use crate::camera::Camera;
use crate::config::Config;
use crate::controller::KeyboardMovementController;
use crate::frame::{FrameInfo, MAX_FRAMES_IN_FLIGHT};
use crate::game_object::{GameObjectId, World};
use crate::hot_reload::ShaderWatcher;
use crate::model::{Model, ModelBuilder};
use crate::render_system::{GlobalUbo, SimpleRenderSystem};
use crate::renderer::Renderer;
use crate::window::{AppWindow, WindowSurface};

/// Longest step fed to movement, so a stall does not teleport the viewer.
const MAX_FRAME_TIME: f32 = 0.25;

/// Main application struct holding all resources.
///
/// IMPORTANT: Field order matters for Drop! Everything holding an
/// `Arc<VulkanDevice>` comes before `device`, and the window goes last
/// because the surface inside the device refers to it.
pub struct App {
    game_objects: World,
    viewer_id: GameObjectId,
    render_system: SimpleRenderSystem,
    global_descriptor_sets: Vec<vk::DescriptorSet>,
    ubo_buffers: Vec<HostBuffer>,
    _global_set_layout: DescriptorSetLayout,
    _global_pool: DescriptorPool,
    renderer: Renderer,
    shader_watcher: Option<ShaderWatcher>,
    device: Arc<VulkanDevice>,
    window: AppWindow,
    config: Config,
}

impl App {
    pub fn new(config: Config) -> Result<Self> {
        log::info!("Initializing renderer...");

        let mut window = AppWindow::new(&config.window)?;

        // Validation layers only in debug builds
        let enable_validation = cfg!(debug_assertions) && config.debug.validation_layers;
        let device = VulkanDevice::new(&config.window.title, enable_validation, window.window())?;

        let renderer = Renderer::new(
            device.clone(),
            &mut window,
            config.present_mode(),
            config.graphics.clear_color,
        )?;

        let global_pool = DescriptorPoolBuilder::new()
            .max_sets(MAX_FRAMES_IN_FLIGHT as u32)
            .add_pool_size(vk::DescriptorType::UNIFORM_BUFFER, MAX_FRAMES_IN_FLIGHT as u32)
            .build(device.clone())?;

        let ubo_buffers = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|i| {
                HostBuffer::new(
                    device.clone(),
                    &format!("global ubo {}", i),
                    std::mem::size_of::<GlobalUbo>() as vk::DeviceSize,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let global_set_layout = DescriptorSetLayoutBuilder::new()
            .add_binding(
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::ShaderStageFlags::ALL_GRAPHICS,
                1,
            )
            .build(device.clone())?;

        let global_descriptor_sets = ubo_buffers
            .iter()
            .map(|buffer| {
                DescriptorWriter::new(&global_set_layout, &global_pool)
                    .write_buffer(0, buffer.descriptor_info())
                    .build()
            })
            .collect::<Result<Vec<_>>>()?;

        let render_system = SimpleRenderSystem::new(
            device.clone(),
            renderer.swapchain_render_pass(),
            global_set_layout.handle(),
            &config.shaders.vertex,
            &config.shaders.fragment,
        )?;

        let shader_watcher = if config.debug.hot_reload_shaders {
            match ShaderWatcher::new(&render_system.shader_paths()) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    log::warn!("Shader hot-reload disabled: {:#}", e);
                    None
                }
            }
        } else {
            None
        };

        let mut game_objects = World::new();
        load_game_objects(&device, &mut game_objects)?;
        let viewer_id = game_objects.create_game_object().id();

        log::info!("Renderer initialized with {} game objects", game_objects.len());

        Ok(Self {
            game_objects,
            viewer_id,
            render_system,
            global_descriptor_sets,
            ubo_buffers,
            _global_set_layout: global_set_layout,
            _global_pool: global_pool,
            renderer,
            shader_watcher,
            device,
            window,
            config,
        })
    }

    pub fn run(&mut self) -> Result<()> {
        let mut camera = Camera::new();
        let controller = KeyboardMovementController::default();
        let mut fps = FpsCounter::new(Duration::from_secs(1));
        let mut current_time = Instant::now();

        while !self.window.should_close() {
            self.window.poll_events();

            let now = Instant::now();
            let frame_time = now.duration_since(current_time).as_secs_f32().min(MAX_FRAME_TIME);
            current_time = now;

            if let Some(viewer) = self.game_objects.get_mut(self.viewer_id) {
                controller.move_in_plane_xz(self.window.input(), frame_time, viewer);
                camera.set_view_yxz(viewer.transform.translation, viewer.transform.rotation);
            }
            camera.set_perspective_projection(
                50f32.to_radians(),
                self.renderer.aspect_ratio(),
                0.1,
                10.0,
            );

            self.reload_shaders_if_changed()?;

            let Some(command_buffer) = self.renderer.begin_frame(&mut self.window)? else {
                continue;
            };
            let frame_index = self.renderer.frame_index();

            let ubo = GlobalUbo {
                projection_view: camera.projection_view(),
                ..GlobalUbo::default()
            };
            self.ubo_buffers[frame_index].write(&ubo)?;

            let frame_info = FrameInfo {
                frame_index,
                frame_time,
                command_buffer,
                camera: &camera,
                global_descriptor_set: self.global_descriptor_sets[frame_index],
                game_objects: &self.game_objects,
            };

            self.renderer.begin_swapchain_render_pass(command_buffer);
            self.render_system.render_game_objects(&frame_info);
            self.renderer.end_swapchain_render_pass(command_buffer);
            self.renderer.end_frame(&mut self.window)?;

            if let Some((rate, frame_ms)) = fps.tick(now) {
                log::trace!("{:.0} FPS ({:.2}ms)", rate, frame_ms);
                if self.config.debug.show_fps {
                    self.window.set_title(&format!(
                        "{} - {:.0} FPS ({:.2}ms)",
                        self.config.window.title, rate, frame_ms
                    ));
                }
            }
        }

        log::info!("Close requested, shutting down...");
        self.device.wait_idle()
    }

    fn reload_shaders_if_changed(&mut self) -> Result<()> {
        let Some(watcher) = &self.shader_watcher else {
            return Ok(());
        };
        if !watcher.poll_changed() {
            return Ok(());
        }

        // The old pipeline may still be referenced by frames in flight
        self.device.wait_idle()?;
        let render_pass = self.renderer.swapchain_render_pass();
        if let Err(e) = self.render_system.reload_pipeline(render_pass) {
            log::warn!("Shader reload failed, keeping previous pipeline: {:#}", e);
        }
        Ok(())
    }
}

impl Drop for App {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");
        if let Err(e) = self.device.wait_idle() {
            log::error!("Device wait failed during cleanup: {:?}", e);
        }
    }
}

fn load_game_objects(device: &Arc<VulkanDevice>, world: &mut World) -> Result<()> {
    let cube = Rc::new(Model::new(device.clone(), &ModelBuilder::cube(Vec3::ZERO))?);

    let center = world.create_game_object();
    center.model = Some(cube.clone());
    center.transform.translation = Vec3::new(0.0, 0.0, 2.5);
    center.transform.scale = Vec3::splat(0.5);

    let side = world.create_game_object();
    side.model = Some(cube);
    side.transform.translation = Vec3::new(1.0, 0.25, 3.0);
    side.transform.scale = Vec3::new(0.5, 0.25, 0.5);
    side.transform.rotation.y = 0.6;

    Ok(())
}

/// Averages frames over a window of wall time.
#[derive(Debug)]
struct FpsCounter {
    interval: Duration,
    window_start: Option<Instant>,
    frames: u32,
}

impl FpsCounter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            window_start: None,
            frames: 0,
        }
    }

    /// Count a frame finished at `now`. Once per interval returns
    /// (frames per second, milliseconds per frame).
    fn tick(&mut self, now: Instant) -> Option<(f32, f32)> {
        let start = *self.window_start.get_or_insert(now);
        self.frames += 1;

        let elapsed = now.duration_since(start);
        if elapsed < self.interval {
            return None;
        }

        let seconds = elapsed.as_secs_f32();
        let rate = self.frames as f32 / seconds;
        self.window_start = Some(now);
        self.frames = 0;
        Some((rate, 1000.0 / rate))
    }
}

// Forward rendering of game objects with one pipeline.
//
// Shader interface (see `shaders/simple_shader.vert`):
// - set 0, binding 0: `GlobalUbo`, written once per frame
// - push constants: `SimplePushConstantData`, written per object

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

use crate::backend::pipeline::{Pipeline, PipelineConfig};
use crate::backend::VulkanDevice;
use crate::frame::FrameInfo;
use crate::game_object::TransformComponent;

/// Per-frame uniform data.
///
/// # Memory Layout
///
/// - Offset 0: projection * view (64 bytes)
/// - Offset 64: light direction, w unused (16 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct GlobalUbo {
    pub projection_view: Mat4,
    pub light_direction: Vec4,
}

impl Default for GlobalUbo {
    fn default() -> Self {
        Self {
            projection_view: Mat4::IDENTITY,
            light_direction: Vec3::new(1.0, -3.0, -1.0).normalize().extend(0.0),
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct SimplePushConstantData {
    pub model_matrix: Mat4,
    /// Only the upper 3x3 is read by the shader.
    pub normal_matrix: Mat4,
}

impl SimplePushConstantData {
    pub fn from_transform(transform: &TransformComponent) -> Self {
        Self {
            model_matrix: transform.mat4(),
            normal_matrix: Mat4::from_mat3(transform.normal_matrix()),
        }
    }
}

const PUSH_CONSTANT_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
    vk::ShaderStageFlags::VERTEX.as_raw() | vk::ShaderStageFlags::FRAGMENT.as_raw(),
);

pub struct SimpleRenderSystem {
    pipeline: Pipeline,
    pipeline_layout: vk::PipelineLayout,
    vert_path: PathBuf,
    frag_path: PathBuf,
    device: Arc<VulkanDevice>,
}

impl SimpleRenderSystem {
    pub fn new(
        device: Arc<VulkanDevice>,
        render_pass: vk::RenderPass,
        global_set_layout: vk::DescriptorSetLayout,
        vert_path: &Path,
        frag_path: &Path,
    ) -> Result<Self> {
        let pipeline_layout = create_pipeline_layout(&device, global_set_layout)?;

        let pipeline = match create_pipeline(&device, pipeline_layout, render_pass, vert_path, frag_path) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                unsafe { device.device.destroy_pipeline_layout(pipeline_layout, None) };
                return Err(e);
            }
        };

        Ok(Self {
            pipeline,
            pipeline_layout,
            vert_path: vert_path.to_path_buf(),
            frag_path: frag_path.to_path_buf(),
            device,
        })
    }

    /// Rebuild the pipeline from the shader files on disk against
    /// `render_pass`, which must be the swapchain's current one: recreating
    /// the swapchain destroys the pass the pipeline was first built with.
    ///
    /// The caller must make sure the GPU no longer uses the old pipeline. On
    /// error the old pipeline stays in place.
    pub fn reload_pipeline(&mut self, render_pass: vk::RenderPass) -> Result<()> {
        let pipeline = create_pipeline(
            &self.device,
            self.pipeline_layout,
            render_pass,
            &self.vert_path,
            &self.frag_path,
        )?;
        self.pipeline = pipeline;
        log::info!("Reloaded pipeline from {:?} + {:?}", self.vert_path, self.frag_path);
        Ok(())
    }

    pub fn shader_paths(&self) -> [&Path; 2] {
        [&self.vert_path, &self.frag_path]
    }

    /// Record draws for every object that has a model.
    pub fn render_game_objects(&self, frame_info: &FrameInfo<'_>) {
        let cmd = frame_info.command_buffer;
        let device = &self.device.device;

        self.pipeline.bind(cmd);

        unsafe {
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline_layout,
                0,
                &[frame_info.global_descriptor_set],
                &[],
            );
        }

        for object in frame_info.game_objects.iter() {
            let Some(model) = &object.model else {
                continue;
            };

            let push = SimplePushConstantData::from_transform(&object.transform);
            unsafe {
                device.cmd_push_constants(
                    cmd,
                    self.pipeline_layout,
                    PUSH_CONSTANT_STAGES,
                    0,
                    bytemuck::bytes_of(&push),
                );
            }

            model.bind(cmd);
            model.draw(cmd);
        }
    }
}

impl Drop for SimpleRenderSystem {
    fn drop(&mut self) {
        unsafe {
            self.device
                .device
                .destroy_pipeline_layout(self.pipeline_layout, None);
        }
    }
}

fn create_pipeline_layout(
    device: &VulkanDevice,
    global_set_layout: vk::DescriptorSetLayout,
) -> Result<vk::PipelineLayout> {
    let push_constant_ranges = [vk::PushConstantRange {
        stage_flags: PUSH_CONSTANT_STAGES,
        offset: 0,
        size: std::mem::size_of::<SimplePushConstantData>() as u32,
    }];
    let set_layouts = [global_set_layout];

    let layout_info = vk::PipelineLayoutCreateInfo::builder()
        .set_layouts(&set_layouts)
        .push_constant_ranges(&push_constant_ranges);

    unsafe { device.device.create_pipeline_layout(&layout_info, None) }
        .context("Failed to create pipeline layout")
}

fn create_pipeline(
    device: &Arc<VulkanDevice>,
    pipeline_layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,
    vert_path: &Path,
    frag_path: &Path,
) -> Result<Pipeline> {
    let config = pipeline_config(pipeline_layout, render_pass);
    Pipeline::new(device.clone(), vert_path, frag_path, &config)
}

fn pipeline_config(pipeline_layout: vk::PipelineLayout, render_pass: vk::RenderPass) -> PipelineConfig {
    PipelineConfig {
        pipeline_layout,
        render_pass,
        ..PipelineConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layouts_match_shader_blocks() {
        assert_eq!(std::mem::size_of::<GlobalUbo>(), 80);
        // Vulkan only guarantees 128 bytes of push constants
        assert_eq!(std::mem::size_of::<SimplePushConstantData>(), 128);
    }

    #[test]
    fn default_light_points_down_and_has_no_w() {
        let ubo = GlobalUbo::default();
        assert!((ubo.light_direction.truncate().length() - 1.0).abs() < 1e-6);
        assert!(ubo.light_direction.y < 0.0);
        assert_eq!(ubo.light_direction.w, 0.0);
    }

    #[test]
    fn push_data_comes_from_transform() {
        let transform = TransformComponent {
            translation: Vec3::new(0.0, 0.5, 2.5),
            scale: Vec3::new(0.5, 0.5, 0.5),
            ..Default::default()
        };
        let push = SimplePushConstantData::from_transform(&transform);

        assert_eq!(push.model_matrix, transform.mat4());
        // Normal matrix carries no translation and an inverse scale
        assert_eq!(push.normal_matrix.w_axis, Vec4::W);
        assert_eq!(push.normal_matrix.x_axis, Vec4::new(2.0, 0.0, 0.0, 0.0));
    }

    #[test]
    fn pipeline_is_built_against_the_given_render_pass() {
        use ash::vk::Handle;

        let layout = vk::PipelineLayout::from_raw(7);
        let first = vk::RenderPass::from_raw(1);
        let recreated = vk::RenderPass::from_raw(2);

        assert_eq!(pipeline_config(layout, first).render_pass, first);
        let config = pipeline_config(layout, recreated);
        assert_eq!(config.render_pass, recreated);
        assert_eq!(config.pipeline_layout, layout);
    }

    #[test]
    fn push_stages_cover_both_shaders() {
        assert!(PUSH_CONSTANT_STAGES.contains(vk::ShaderStageFlags::VERTEX));
        assert!(PUSH_CONSTANT_STAGES.contains(vk::ShaderStageFlags::FRAGMENT));
    }
}

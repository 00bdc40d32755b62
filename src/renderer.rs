// =============================================================================
// RENDERER - Frame lifecycle on top of the swapchain
// =============================================================================
//
// FRAME FLOW:
// 1. begin_frame: wait for the frame slot, acquire an image, begin recording
// 2. begin_swapchain_render_pass: clear, set viewport and scissor
// 3. (render systems record draw commands)
// 4. end_swapchain_render_pass
// 5. end_frame: submit, present, recreate the swapchain if it went stale
//
// The state checks live in FrameProtocol; this type does the Vulkan calls.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use crate::backend::swapchain::SwapchainFormats;
use crate::backend::{Swapchain, VulkanDevice};
use crate::frame::{BeginOutcome, FrameProtocol, MAX_FRAMES_IN_FLIGHT};
use crate::window::{wait_for_presentable_extent, WindowSurface};

pub struct Renderer {
    protocol: FrameProtocol,
    /// Only `None` while a recreation is in progress (or after one failed).
    swapchain: Option<Swapchain>,
    present_mode: vk::PresentModeKHR,
    clear_color: [f32; 4],
    device: Arc<VulkanDevice>,
}

impl Renderer {
    pub fn new<W: WindowSurface + ?Sized>(
        device: Arc<VulkanDevice>,
        window: &mut W,
        present_mode: vk::PresentModeKHR,
        clear_color: [f32; 4],
    ) -> Result<Self> {
        let extent = wait_for_presentable_extent(window)
            .context("Window closed before the first swapchain was created")?;
        let swapchain = Swapchain::new(device.clone(), extent, present_mode, None)?;
        let command_buffers = allocate_command_buffers(&device)?;

        Ok(Self {
            protocol: FrameProtocol::new(command_buffers),
            swapchain: Some(swapchain),
            present_mode,
            clear_color,
            device,
        })
    }

    fn swapchain(&self) -> &Swapchain {
        self.swapchain
            .as_ref()
            .unwrap_or_else(|| panic!("Renderer used after a failed swapchain recreation"))
    }

    fn swapchain_mut(&mut self) -> &mut Swapchain {
        self.swapchain
            .as_mut()
            .unwrap_or_else(|| panic!("Renderer used after a failed swapchain recreation"))
    }

    /// Rebuild the swapchain for the window's current size.
    ///
    /// Blocks while the window is minimized. The new swapchain must keep the
    /// old color and depth formats, since pipelines were built against the
    /// old render pass.
    pub fn recreate_swapchain<W: WindowSurface + ?Sized>(&mut self, window: &mut W) -> Result<()> {
        let Some(extent) = wait_for_presentable_extent(window) else {
            log::info!("Window closing, skipping swapchain recreation");
            return Ok(());
        };

        self.device.wait_idle()?;

        let previous = self.swapchain.take();
        let previous_shape = previous
            .as_ref()
            .map(|old| (old.formats(), old.image_count()));

        log::info!("Recreating swapchain for {}x{}", extent.width, extent.height);
        let swapchain = Swapchain::new(self.device.clone(), extent, self.present_mode, previous)?;

        let reallocate =
            command_buffers_stale(previous_shape, (swapchain.formats(), swapchain.image_count()))?;
        if reallocate {
            log::debug!(
                "Image count changed to {}, reallocating command buffers",
                swapchain.image_count()
            );
            let fresh = allocate_command_buffers(&self.device)?;
            let stale = self.protocol.replace_command_buffers(fresh);
            unsafe {
                self.device
                    .device
                    .free_command_buffers(self.device.command_pool, &stale);
            }
        }

        self.swapchain = Some(swapchain);
        Ok(())
    }

    /// Start a frame. `None` means the swapchain was out of date and has been
    /// rebuilt; skip this frame.
    ///
    /// # Panics
    /// If a frame is already in progress.
    pub fn begin_frame<W: WindowSurface + ?Sized>(
        &mut self,
        window: &mut W,
    ) -> Result<Option<vk::CommandBuffer>> {
        assert!(
            !self.protocol.is_frame_started(),
            "Can't call begin_frame while already in progress"
        );

        let swapchain = self.swapchain_mut();
        let (image_index, status) = swapchain.acquire_next_image()?;
        let image_count = swapchain.image_count();

        match self.protocol.begin(image_index, status, image_count) {
            BeginOutcome::Recreate => {
                log::debug!("Swapchain out of date on acquire");
                self.recreate_swapchain(window)?;
                Ok(None)
            }
            BeginOutcome::Started(command_buffer) => {
                let begin_info = vk::CommandBufferBeginInfo::builder();
                unsafe {
                    self.device
                        .device
                        .begin_command_buffer(command_buffer, &begin_info)
                }
                .context("Failed to begin recording command buffer")?;
                Ok(Some(command_buffer))
            }
        }
    }

    /// Submit and present the frame.
    ///
    /// # Panics
    /// If no frame is in progress.
    pub fn end_frame<W: WindowSurface + ?Sized>(&mut self, window: &mut W) -> Result<()> {
        assert!(
            self.protocol.is_frame_started(),
            "Can't call end_frame while frame is not in progress"
        );
        let command_buffer = self.protocol.current_command_buffer();
        let image_index = self.protocol.image_index();

        unsafe { self.device.device.end_command_buffer(command_buffer) }
            .context("Failed to record command buffer")?;

        let status = self
            .swapchain_mut()
            .submit_command_buffers(&[command_buffer], image_index)?;

        if self.protocol.end(status, window.was_resized()) {
            log::debug!("Recreating after present ({:?})", status);
            window.reset_resized_flag();
            self.recreate_swapchain(window)?;
        }
        Ok(())
    }

    /// # Panics
    /// If no frame is in progress or `command_buffer` is not the current one.
    pub fn begin_swapchain_render_pass(&self, command_buffer: vk::CommandBuffer) {
        self.protocol
            .check_command_buffer(command_buffer, "begin render pass");

        let swapchain = self.swapchain();
        let extent = swapchain.extent();
        let clear_values = clear_values(self.clear_color);

        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(swapchain.render_pass())
            .framebuffer(swapchain.framebuffer(self.protocol.image_index() as usize))
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);

        let (viewport, scissor) = full_viewport(extent);

        unsafe {
            let device = &self.device.device;
            device.cmd_begin_render_pass(
                command_buffer,
                &render_pass_info,
                vk::SubpassContents::INLINE,
            );
            device.cmd_set_viewport(command_buffer, 0, &[viewport]);
            device.cmd_set_scissor(command_buffer, 0, &[scissor]);
        }
    }

    /// # Panics
    /// If no frame is in progress or `command_buffer` is not the current one.
    pub fn end_swapchain_render_pass(&self, command_buffer: vk::CommandBuffer) {
        self.protocol
            .check_command_buffer(command_buffer, "end render pass");
        unsafe {
            self.device.device.cmd_end_render_pass(command_buffer);
        }
    }

    pub fn swapchain_render_pass(&self) -> vk::RenderPass {
        self.swapchain().render_pass()
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.swapchain().extent_aspect_ratio()
    }

    pub fn is_frame_in_progress(&self) -> bool {
        self.protocol.is_frame_started()
    }

    /// # Panics
    /// If no frame is in progress.
    pub fn frame_index(&self) -> usize {
        self.protocol.frame_index()
    }

    /// # Panics
    /// If no frame is in progress.
    pub fn current_command_buffer(&self) -> vk::CommandBuffer {
        self.protocol.current_command_buffer()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::error!("Device wait failed while dropping renderer: {:?}", e);
        }
        unsafe {
            self.device
                .device
                .free_command_buffers(self.device.command_pool, self.protocol.command_buffers());
        }
    }
}

/// Decide what a recreated swapchain means for the rest of the renderer.
///
/// Fails if the color or depth format changed, since pipelines were built
/// against the old render pass. Otherwise returns whether the command
/// buffers must be freed and reallocated (image count changed).
fn command_buffers_stale(
    previous: Option<(SwapchainFormats, usize)>,
    current: (SwapchainFormats, usize),
) -> Result<bool> {
    let Some((previous_formats, previous_count)) = previous else {
        return Ok(true);
    };
    let (formats, count) = current;
    anyhow::ensure!(
        formats.compatible_with(&previous_formats),
        "Swapchain image or depth format has changed"
    );
    Ok(count != previous_count)
}

fn allocate_command_buffers(device: &VulkanDevice) -> Result<Vec<vk::CommandBuffer>> {
    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(device.command_pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(MAX_FRAMES_IN_FLIGHT as u32);

    unsafe { device.device.allocate_command_buffers(&alloc_info) }
        .context("Failed to allocate command buffers")
}

/// Color attachment first, then depth
fn clear_values(color: [f32; 4]) -> [vk::ClearValue; 2] {
    [
        vk::ClearValue {
            color: vk::ClearColorValue { float32: color },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        },
    ]
}

fn full_viewport(extent: vk::Extent2D) -> (vk::Viewport, vk::Rect2D) {
    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    let scissor = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    };
    (viewport, scissor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clears_color_then_far_depth() {
        let values = clear_values([0.01, 0.01, 0.01, 1.0]);
        unsafe {
            assert_eq!(values[0].color.float32, [0.01, 0.01, 0.01, 1.0]);
            assert_eq!(values[1].depth_stencil.depth, 1.0);
            assert_eq!(values[1].depth_stencil.stencil, 0);
        }
    }

    const FORMATS: SwapchainFormats = SwapchainFormats {
        color: vk::Format::B8G8R8A8_SRGB,
        depth: vk::Format::D32_SFLOAT,
    };

    #[test]
    fn same_shape_keeps_command_buffers() {
        assert!(!command_buffers_stale(Some((FORMATS, 3)), (FORMATS, 3)).unwrap());
    }

    #[test]
    fn image_count_change_reallocates_command_buffers() {
        assert!(command_buffers_stale(Some((FORMATS, 3)), (FORMATS, 2)).unwrap());
        assert!(command_buffers_stale(None, (FORMATS, 3)).unwrap());
    }

    #[test]
    fn format_change_is_an_error() {
        let new_depth = SwapchainFormats {
            depth: vk::Format::D24_UNORM_S8_UINT,
            ..FORMATS
        };
        let new_color = SwapchainFormats {
            color: vk::Format::R8G8B8A8_UNORM,
            ..FORMATS
        };

        let err = command_buffers_stale(Some((FORMATS, 3)), (new_depth, 3)).unwrap_err();
        assert!(err.to_string().contains("format has changed"));
        // Even when the count changes too, formats are checked first
        assert!(command_buffers_stale(Some((FORMATS, 3)), (new_color, 2)).is_err());
    }

    #[test]
    fn viewport_covers_whole_extent() {
        let extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let (viewport, scissor) = full_viewport(extent);

        assert_eq!((viewport.width, viewport.height), (800.0, 600.0));
        assert_eq!((viewport.min_depth, viewport.max_depth), (0.0, 1.0));
        assert_eq!((scissor.offset.x, scissor.offset.y), (0, 0));
        assert_eq!(scissor.extent, extent);
    }
}

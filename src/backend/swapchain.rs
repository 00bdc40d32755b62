// Swapchain - Window presentation
//
// Owns the presentable images and everything sized to them: image views,
// depth buffers, the render pass, framebuffers, and the per-frame sync
// objects that bound how far the CPU runs ahead of the GPU.

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;
use std::sync::Arc;

use super::buffer::create_depth_buffer;
use super::pipeline::{create_framebuffers, create_render_pass};
use super::sync::{FrameSync, InFlightFrames};
use super::VulkanDevice;
use crate::frame::{PresentStatus, MAX_FRAMES_IN_FLIGHT};

/// Depth formats in order of preference
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Color and depth formats of a swapchain's attachments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainFormats {
    pub color: vk::Format,
    pub depth: vk::Format,
}

impl SwapchainFormats {
    /// Equal formats mean compatible render passes
    pub fn compatible_with(&self, previous: &SwapchainFormats) -> bool {
        self == previous
    }
}

struct DepthAttachment {
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
}

pub struct Swapchain {
    swapchain: vk::SwapchainKHR,
    swapchain_loader: khr::Swapchain,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    depth_attachments: Vec<DepthAttachment>,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    formats: SwapchainFormats,
    extent: vk::Extent2D,
    frame_sync: Vec<FrameSync>,
    in_flight: InFlightFrames<vk::Fence>,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    /// Create a swapchain for `window_extent`.
    ///
    /// Passing the `previous` swapchain lets the driver hand its resources
    /// over; it is destroyed once the new one exists.
    pub fn new(
        device: Arc<VulkanDevice>,
        window_extent: vk::Extent2D,
        preferred_present_mode: vk::PresentModeKHR,
        previous: Option<Swapchain>,
    ) -> Result<Self> {
        let support = device.swapchain_support()?;

        let surface_format = choose_surface_format(&support.formats)
            .context("No suitable surface format")?;
        let present_mode = choose_present_mode(&support.present_modes, preferred_present_mode);
        let extent = choose_extent(&support.capabilities, window_extent);
        let image_count = choose_image_count(&support.capabilities);

        log::info!(
            "Creating swapchain: {}x{}, {:?}, {:?}",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode
        );

        let queue_families = device.queue_families;
        let family_indices = [queue_families.graphics, queue_families.present];
        let (sharing_mode, shared_families): (_, &[u32]) = if queue_families.is_shared() {
            (vk::SharingMode::EXCLUSIVE, &[])
        } else {
            (vk::SharingMode::CONCURRENT, &family_indices)
        };

        let old_swapchain = previous
            .as_ref()
            .map_or(vk::SwapchainKHR::null(), |p| p.swapchain);

        let swapchain_loader = khr::Swapchain::new(&device.instance, &device.device);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(device.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(shared_families)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;

        // The retired swapchain goes away as soon as the new one exists
        drop(previous);

        // The implementation may give us more images than requested
        let images = unsafe { swapchain_loader.get_swapchain_images(swapchain) }
            .context("Failed to get swapchain images")?;

        log::info!("Created swapchain with {} images", images.len());

        let image_views = images
            .iter()
            .map(|&image| create_image_view(&device, image, surface_format.format))
            .collect::<Result<Vec<_>>>()?;

        let depth_format = device.find_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )?;
        let formats = SwapchainFormats {
            color: surface_format.format,
            depth: depth_format,
        };

        let render_pass = create_render_pass(&device, formats.color, formats.depth)?;

        let depth_attachments = images
            .iter()
            .map(|_| {
                create_depth_buffer(&device, extent, depth_format)
                    .map(|(image, memory, view)| DepthAttachment { image, memory, view })
            })
            .collect::<Result<Vec<_>>>()?;

        let attachments: Vec<[vk::ImageView; 2]> = image_views
            .iter()
            .zip(&depth_attachments)
            .map(|(&color, depth)| [color, depth.view])
            .collect();
        let framebuffers = create_framebuffers(&device, &attachments, render_pass, extent)?;

        let frame_sync = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| FrameSync::new(&device))
            .collect::<Result<Vec<_>>>()?;
        let in_flight = InFlightFrames::new(
            frame_sync.iter().map(|sync| sync.in_flight_fence).collect(),
            images.len(),
        );

        Ok(Self {
            swapchain,
            swapchain_loader,
            images,
            image_views,
            depth_attachments,
            render_pass,
            framebuffers,
            formats,
            extent,
            frame_sync,
            in_flight,
            device,
        })
    }

    /// Wait for the current frame slot, then acquire the next image.
    ///
    /// The index is meaningless when the status is `OutOfDate`.
    pub fn acquire_next_image(&mut self) -> Result<(u32, PresentStatus)> {
        let fence = self.in_flight.current_fence();
        unsafe {
            self.device
                .device
                .wait_for_fences(&[fence], true, u64::MAX)
                .context("Failed to wait for in-flight fence")?;
        }

        let sync = &self.frame_sync[self.in_flight.current_frame()];
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                sync.image_available,
                vk::Fence::null(),
            )
        };

        let (index, status) =
            PresentStatus::from_vk(result).context("Failed to acquire swapchain image")?;
        log::trace!("Acquired image {:?} ({:?})", index, status);
        Ok((index.unwrap_or(0), status))
    }

    /// Submit `buffers` for `image_index` and queue the image for presentation.
    pub fn submit_command_buffers(
        &mut self,
        buffers: &[vk::CommandBuffer],
        image_index: u32,
    ) -> Result<PresentStatus> {
        let device = &self.device.device;

        // A previous frame may still be rendering into this image
        if let Some(owner) = self.in_flight.claim_image(image_index as usize) {
            unsafe { device.wait_for_fences(&[owner], true, u64::MAX) }
                .context("Failed to wait for image fence")?;
        }

        let sync = &self.frame_sync[self.in_flight.current_frame()];
        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [sync.render_finished];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            device.reset_fences(&[sync.in_flight_fence])?;
            device
                .queue_submit(
                    self.device.graphics_queue,
                    &[submit_info.build()],
                    sync.in_flight_fence,
                )
                .context("Failed to submit draw command buffer")?;
        }

        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&signal_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.swapchain_loader
                .queue_present(self.device.present_queue, &present_info)
        };

        self.in_flight.advance();

        let (_, status) = PresentStatus::from_vk(result.map(|suboptimal| ((), suboptimal)))
            .context("Failed to present swapchain image")?;
        Ok(status)
    }

    pub fn formats(&self) -> SwapchainFormats {
        self.formats
    }

    pub fn framebuffer(&self, index: usize) -> vk::Framebuffer {
        self.framebuffers[index]
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn extent_aspect_ratio(&self) -> f32 {
        self.extent.width as f32 / self.extent.height as f32
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        let device = &self.device.device;
        unsafe {
            for &framebuffer in &self.framebuffers {
                device.destroy_framebuffer(framebuffer, None);
            }
            device.destroy_render_pass(self.render_pass, None);

            for depth in &self.depth_attachments {
                device.destroy_image_view(depth.view, None);
                device.destroy_image(depth.image, None);
                device.free_memory(depth.memory, None);
            }
            for &view in &self.image_views {
                device.destroy_image_view(view, None);
            }

            self.swapchain_loader.destroy_swapchain(self.swapchain, None);

            for sync in &self.frame_sync {
                sync.destroy(device);
            }
        }
    }
}

fn create_image_view(device: &VulkanDevice, image: vk::Image, format: vk::Format) -> Result<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    unsafe {
        device.device.create_image_view(&create_info, None)
            .context("Failed to create image view")
    }
}

/// Prefer 8-bit sRGB, otherwise whatever the surface lists first
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// Use `preferred` when offered, otherwise FIFO (always supported, vsync)
pub fn choose_present_mode(
    present_modes: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if present_modes.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// The surface's extent when it dictates one, else the window size clamped
/// to what the surface allows
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    window_extent: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: window_extent.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: window_extent.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// One more than the minimum, so we never wait on the driver for an image
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let image_count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 && image_count > capabilities.max_image_count {
        capabilities.max_image_count
    } else {
        image_count
    }
}

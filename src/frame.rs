// =============================================================================
// FRAME PROTOCOL - per-frame state and data
// =============================================================================
//
// A frame moves through two states:
//
//            begin (Success | Suboptimal)
//   Idle  ──────────────────────────────▶  FrameStarted
//    ▲  ╲                                      │
//    │   ╲ begin (OutOfDate): recreate,        │ end
//    │    ╲ stay Idle                          │
//    └─────────────────────────────────────────┘
//
// `FrameProtocol` holds that state, the per-frame command buffers and the
// frame counter. It does not talk to the GPU; `crate::renderer::Renderer`
// executes what it decides.

use ash::vk;

use crate::camera::Camera;
use crate::game_object::World;

/// Number of frames the CPU may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Result of acquiring or presenting a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStatus {
    Success,
    /// Usable, but the surface no longer matches the swapchain exactly.
    Suboptimal,
    /// Unusable; the swapchain must be recreated.
    OutOfDate,
}

impl PresentStatus {
    /// Map an `ash` acquire/present result.
    ///
    /// `ERROR_OUT_OF_DATE_KHR` is a status, not an error. Any other error is
    /// handed back to the caller.
    pub fn from_vk<T>(result: Result<(T, bool), vk::Result>) -> Result<(Option<T>, Self), vk::Result> {
        match result {
            Ok((value, false)) => Ok((Some(value), Self::Success)),
            Ok((value, true)) => Ok((Some(value), Self::Suboptimal)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok((None, Self::OutOfDate)),
            Err(e) => Err(e),
        }
    }

    pub fn needs_recreate(self) -> bool {
        matches!(self, Self::Suboptimal | Self::OutOfDate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    FrameStarted,
}

/// What `begin_frame` should do after an acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginOutcome {
    /// Record into this buffer.
    Started(vk::CommandBuffer),
    /// Swapchain is out of date: recreate it and skip the frame.
    Recreate,
}

/// Frame state machine.
#[derive(Debug)]
pub struct FrameProtocol {
    state: FrameState,
    command_buffers: Vec<vk::CommandBuffer>,
    frame_index: usize,
    image_index: u32,
}

impl FrameProtocol {
    pub fn new(command_buffers: Vec<vk::CommandBuffer>) -> Self {
        assert_eq!(
            command_buffers.len(),
            MAX_FRAMES_IN_FLIGHT,
            "Need one command buffer per frame in flight"
        );
        Self {
            state: FrameState::Idle,
            command_buffers,
            frame_index: 0,
            image_index: 0,
        }
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn is_frame_started(&self) -> bool {
        self.state == FrameState::FrameStarted
    }

    pub fn command_buffers(&self) -> &[vk::CommandBuffer] {
        &self.command_buffers
    }

    /// Swap in freshly allocated buffers; returns the old ones for freeing.
    pub fn replace_command_buffers(&mut self, command_buffers: Vec<vk::CommandBuffer>) -> Vec<vk::CommandBuffer> {
        assert!(!self.is_frame_started(), "Can't replace command buffers mid-frame");
        assert_eq!(command_buffers.len(), MAX_FRAMES_IN_FLIGHT);
        std::mem::replace(&mut self.command_buffers, command_buffers)
    }

    /// Apply an acquire result.
    ///
    /// # Panics
    /// If a frame is already in progress, or the acquired index is not below
    /// `image_count`.
    pub fn begin(&mut self, image_index: u32, status: PresentStatus, image_count: usize) -> BeginOutcome {
        assert!(
            !self.is_frame_started(),
            "Can't call begin_frame while already in progress"
        );

        if status == PresentStatus::OutOfDate {
            return BeginOutcome::Recreate;
        }

        assert!(
            (image_index as usize) < image_count,
            "Acquired image index {} out of range for {} images",
            image_index,
            image_count
        );

        self.image_index = image_index;
        self.state = FrameState::FrameStarted;
        BeginOutcome::Started(self.command_buffers[self.frame_index])
    }

    /// Apply a present result. Returns whether the swapchain must be rebuilt.
    ///
    /// # Panics
    /// If no frame is in progress.
    pub fn end(&mut self, status: PresentStatus, window_resized: bool) -> bool {
        assert!(
            self.is_frame_started(),
            "Can't call end_frame while frame is not in progress"
        );

        self.state = FrameState::Idle;
        self.frame_index = (self.frame_index + 1) % MAX_FRAMES_IN_FLIGHT;

        status.needs_recreate() || window_resized
    }

    /// # Panics
    /// If no frame is in progress.
    pub fn frame_index(&self) -> usize {
        assert!(
            self.is_frame_started(),
            "Cannot get frame index when frame not in progress"
        );
        self.frame_index
    }

    /// Counter without the in-progress check; for logging and tests.
    pub fn next_frame_index(&self) -> usize {
        self.frame_index
    }

    /// # Panics
    /// If no frame is in progress.
    pub fn image_index(&self) -> u32 {
        assert!(
            self.is_frame_started(),
            "Cannot get image index when frame not in progress"
        );
        self.image_index
    }

    /// # Panics
    /// If no frame is in progress.
    pub fn current_command_buffer(&self) -> vk::CommandBuffer {
        assert!(
            self.is_frame_started(),
            "Cannot get command buffer when frame not in progress"
        );
        self.command_buffers[self.frame_index]
    }

    /// Check `command_buffer` belongs to the frame being recorded.
    ///
    /// # Panics
    /// If no frame is in progress or the buffer is from another frame.
    pub fn check_command_buffer(&self, command_buffer: vk::CommandBuffer, operation: &str) {
        assert!(
            self.is_frame_started(),
            "Can't call {} if frame is not in progress",
            operation
        );
        assert!(
            command_buffer == self.command_buffers[self.frame_index],
            "Can't {} on command buffer from a different frame",
            operation
        );
    }
}

/// Everything a render system needs to record one frame.
///
/// Borrowed for a single frame; nothing here may be kept past `end_frame`.
pub struct FrameInfo<'a> {
    pub frame_index: usize,
    pub frame_time: f32,
    pub command_buffer: vk::CommandBuffer,
    pub camera: &'a Camera,
    pub global_descriptor_set: vk::DescriptorSet,
    pub game_objects: &'a World,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn buffers() -> Vec<vk::CommandBuffer> {
        (1..=MAX_FRAMES_IN_FLIGHT as u64)
            .map(vk::CommandBuffer::from_raw)
            .collect()
    }

    fn started(outcome: BeginOutcome) -> vk::CommandBuffer {
        match outcome {
            BeginOutcome::Started(cmd) => cmd,
            BeginOutcome::Recreate => panic!("frame did not start"),
        }
    }

    #[test]
    fn frame_counter_after_n_cycles() {
        let mut protocol = FrameProtocol::new(buffers());
        for n in 1..=9usize {
            let cmd = started(protocol.begin((n % 3) as u32, PresentStatus::Success, 3));
            assert_eq!(cmd, protocol.current_command_buffer());
            assert!(!protocol.end(PresentStatus::Success, false));
            assert_eq!(protocol.next_frame_index(), n % MAX_FRAMES_IN_FLIGHT);
        }
    }

    #[test]
    fn frames_alternate_command_buffers() {
        let mut protocol = FrameProtocol::new(buffers());
        let first = started(protocol.begin(0, PresentStatus::Success, 3));
        protocol.end(PresentStatus::Success, false);
        let second = started(protocol.begin(1, PresentStatus::Success, 3));
        protocol.end(PresentStatus::Success, false);
        let third = started(protocol.begin(2, PresentStatus::Success, 3));

        assert_ne!(first, second);
        assert_eq!(first, third);
    }

    #[test]
    fn suboptimal_acquire_still_starts_frame() {
        let mut protocol = FrameProtocol::new(buffers());
        started(protocol.begin(1, PresentStatus::Suboptimal, 2));
        assert_eq!(protocol.image_index(), 1);
        assert_eq!(protocol.state(), FrameState::FrameStarted);
    }

    #[test]
    fn out_of_date_acquire_requests_one_recreate_and_stays_idle() {
        let mut protocol = FrameProtocol::new(buffers());
        let outcome = protocol.begin(0, PresentStatus::OutOfDate, 3);

        assert_eq!(outcome, BeginOutcome::Recreate);
        assert_eq!(protocol.state(), FrameState::Idle);
        assert_eq!(protocol.next_frame_index(), 0);

        // The next attempt starts normally
        started(protocol.begin(0, PresentStatus::Success, 3));
    }

    #[test]
    #[should_panic(expected = "already in progress")]
    fn begin_twice_panics() {
        let mut protocol = FrameProtocol::new(buffers());
        protocol.begin(0, PresentStatus::Success, 3);
        protocol.begin(1, PresentStatus::Success, 3);
    }

    #[test]
    #[should_panic(expected = "not in progress")]
    fn end_without_begin_panics() {
        let mut protocol = FrameProtocol::new(buffers());
        protocol.end(PresentStatus::Success, false);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn acquired_index_must_be_below_image_count() {
        let mut protocol = FrameProtocol::new(buffers());
        protocol.begin(3, PresentStatus::Success, 3);
    }

    #[test]
    #[should_panic(expected = "different frame")]
    fn render_pass_on_foreign_buffer_panics() {
        let mut protocol = FrameProtocol::new(buffers());
        protocol.begin(0, PresentStatus::Success, 3);
        protocol.check_command_buffer(vk::CommandBuffer::from_raw(99), "begin render pass");
    }

    #[test]
    #[should_panic(expected = "different frame")]
    fn previous_frames_buffer_is_rejected() {
        let mut protocol = FrameProtocol::new(buffers());
        let old = started(protocol.begin(0, PresentStatus::Success, 3));
        protocol.end(PresentStatus::Success, false);
        protocol.begin(1, PresentStatus::Success, 3);
        protocol.check_command_buffer(old, "end render pass");
    }

    #[test]
    #[should_panic(expected = "not in progress")]
    fn render_pass_outside_frame_panics() {
        let protocol = FrameProtocol::new(buffers());
        protocol.check_command_buffer(vk::CommandBuffer::from_raw(1), "begin render pass");
    }

    #[test]
    fn end_reports_recreate_for_stale_surface_or_resize() {
        let mut protocol = FrameProtocol::new(buffers());
        for (status, resized, expected) in [
            (PresentStatus::Success, false, false),
            (PresentStatus::Success, true, true),
            (PresentStatus::Suboptimal, false, true),
            (PresentStatus::OutOfDate, false, true),
        ] {
            protocol.begin(0, PresentStatus::Success, 2);
            assert_eq!(protocol.end(status, resized), expected);
            assert_eq!(protocol.state(), FrameState::Idle);
        }
    }

    #[test]
    fn present_status_from_vk() {
        assert_eq!(PresentStatus::from_vk(Ok((2u32, false))), Ok((Some(2), PresentStatus::Success)));
        assert_eq!(PresentStatus::from_vk(Ok((1u32, true))), Ok((Some(1), PresentStatus::Suboptimal)));
        assert_eq!(
            PresentStatus::from_vk::<u32>(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)),
            Ok((None, PresentStatus::OutOfDate))
        );
        assert_eq!(
            PresentStatus::from_vk::<u32>(Err(vk::Result::ERROR_DEVICE_LOST)),
            Err(vk::Result::ERROR_DEVICE_LOST)
        );
    }

    #[test]
    fn replacing_buffers_returns_old_set() {
        let mut protocol = FrameProtocol::new(buffers());
        let fresh: Vec<_> = (10..10 + MAX_FRAMES_IN_FLIGHT as u64)
            .map(vk::CommandBuffer::from_raw)
            .collect();
        let old = protocol.replace_command_buffers(fresh.clone());
        assert_eq!(old, buffers());
        assert_eq!(protocol.command_buffers(), fresh.as_slice());
    }
}

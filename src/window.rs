// =============================================================================
// WINDOW - winit window driven by pumping, plus the surface contract the
// renderer relies on
// =============================================================================
//
// The renderer owns the frame loop, so events are pumped on demand instead of
// handing control to `EventLoop::run_app`:
//   poll_events  -> pump with a zero timeout (never blocks)
//   wait_events  -> pump with no timeout (blocks until something happens)

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};
use ash::vk;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::{Window, WindowAttributes, WindowId};

use crate::config::WindowConfig;

/// What the renderer needs from a window.
pub trait WindowSurface {
    /// Current framebuffer size in pixels; zero while minimized.
    fn extent(&self) -> vk::Extent2D;
    fn should_close(&self) -> bool;
    fn was_resized(&self) -> bool;
    fn reset_resized_flag(&mut self);
    /// Process pending events without blocking.
    fn poll_events(&mut self);
    /// Block until at least one event arrives, then process it.
    fn wait_events(&mut self);
}

/// Block until the window has a non-zero extent.
///
/// Returns `None` if the window is asked to close while waiting (a minimized
/// window can still be closed from the taskbar).
pub fn wait_for_presentable_extent<W: WindowSurface + ?Sized>(window: &mut W) -> Option<vk::Extent2D> {
    loop {
        let extent = window.extent();
        if extent.width != 0 && extent.height != 0 {
            return Some(extent);
        }
        if window.should_close() {
            return None;
        }
        log::debug!("Window has zero extent, waiting for events");
        window.wait_events();
    }
}

/// Keys currently held down.
#[derive(Debug, Default, Clone)]
pub struct InputState {
    pressed: HashSet<KeyCode>,
}

impl InputState {
    pub fn is_pressed(&self, key: KeyCode) -> bool {
        self.pressed.contains(&key)
    }

    pub fn set(&mut self, key: KeyCode, pressed: bool) {
        if pressed {
            self.pressed.insert(key);
        } else {
            self.pressed.remove(&key);
        }
    }

    /// Focus loss drops every key; releases would otherwise go unseen.
    pub fn clear(&mut self) {
        self.pressed.clear();
    }
}

/// Event sink handed to winit on each pump.
struct WindowState {
    attributes: WindowAttributes,
    created: Option<Window>,
    creation_error: Option<winit::error::OsError>,
    window_id: Option<WindowId>,
    size: PhysicalSize<u32>,
    resized: bool,
    close_requested: bool,
    input: InputState,
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        // Desktop platforms resume once; later resumes keep the same window
        if self.window_id.is_some() {
            return;
        }

        match event_loop.create_window(self.attributes.clone()) {
            Ok(window) => {
                self.window_id = Some(window.id());
                self.size = window.inner_size();
                self.created = Some(window);
            }
            Err(e) => self.creation_error = Some(e),
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, id: WindowId, event: WindowEvent) {
        if Some(id) != self.window_id {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested");
                self.close_requested = true;
            }
            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                self.size = size;
                self.resized = true;
            }
            WindowEvent::Focused(false) => self.input.clear(),
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(key) = event.physical_key {
                    let pressed = event.state == ElementState::Pressed;
                    if key == KeyCode::Escape && pressed {
                        log::info!("ESC pressed, exiting...");
                        self.close_requested = true;
                    }
                    self.input.set(key, pressed);
                }
            }
            _ => {}
        }
    }
}

/// A single OS window and the event loop that feeds it.
///
/// Field order matters: the window must be dropped before its event loop.
pub struct AppWindow {
    window: Window,
    state: WindowState,
    event_loop: EventLoop<()>,
}

impl AppWindow {
    pub fn new(config: &WindowConfig) -> Result<Self> {
        let mut event_loop = EventLoop::new().context("Failed to create event loop")?;

        let attributes = WindowAttributes::default()
            .with_title(&config.title)
            .with_inner_size(PhysicalSize::new(config.width, config.height));

        let mut state = WindowState {
            attributes,
            created: None,
            creation_error: None,
            window_id: None,
            size: PhysicalSize::new(config.width, config.height),
            resized: false,
            close_requested: false,
            input: InputState::default(),
        };

        // The window can only be created from inside the loop, on resume
        let window = loop {
            if let PumpStatus::Exit(code) = event_loop.pump_app_events(Some(Duration::ZERO), &mut state) {
                anyhow::bail!("Event loop exited with code {} before a window was created", code);
            }
            if let Some(e) = state.creation_error.take() {
                return Err(e).context("Failed to create window");
            }
            if let Some(window) = state.created.take() {
                break window;
            }
        };

        log::info!(
            "Created window '{}' ({}x{})",
            config.title,
            state.size.width,
            state.size.height
        );

        Ok(Self {
            window,
            state,
            event_loop,
        })
    }

    /// The native window, for surface creation.
    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn input(&self) -> &InputState {
        &self.state.input
    }

    pub fn set_title(&self, title: &str) {
        self.window.set_title(title);
    }

    fn pump(&mut self, timeout: Option<Duration>) {
        if let PumpStatus::Exit(code) = self.event_loop.pump_app_events(timeout, &mut self.state) {
            log::debug!("Event loop exited with code {}", code);
            self.state.close_requested = true;
        }
    }
}

impl WindowSurface for AppWindow {
    fn extent(&self) -> vk::Extent2D {
        let size = self.window.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }

    fn should_close(&self) -> bool {
        self.state.close_requested
    }

    fn was_resized(&self) -> bool {
        self.state.resized
    }

    fn reset_resized_flag(&mut self) {
        self.state.resized = false;
    }

    fn poll_events(&mut self) {
        self.pump(Some(Duration::ZERO));
    }

    fn wait_events(&mut self) {
        self.pump(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scripted window: reports each extent in turn, one per wait.
    struct MockWindow {
        extents: Vec<vk::Extent2D>,
        waits: usize,
        close_after_waits: Option<usize>,
        resized: bool,
    }

    impl MockWindow {
        fn new(extents: &[(u32, u32)]) -> Self {
            Self {
                extents: extents
                    .iter()
                    .map(|&(width, height)| vk::Extent2D { width, height })
                    .collect(),
                waits: 0,
                close_after_waits: None,
                resized: false,
            }
        }
    }

    impl WindowSurface for MockWindow {
        fn extent(&self) -> vk::Extent2D {
            let last = self.extents.len() - 1;
            self.extents[self.waits.min(last)]
        }

        fn should_close(&self) -> bool {
            self.close_after_waits.is_some_and(|n| self.waits >= n)
        }

        fn was_resized(&self) -> bool {
            self.resized
        }

        fn reset_resized_flag(&mut self) {
            self.resized = false;
        }

        fn poll_events(&mut self) {}

        fn wait_events(&mut self) {
            self.waits += 1;
        }
    }

    #[test]
    fn waits_while_minimized() {
        let mut window = MockWindow::new(&[(0, 0), (0, 0), (800, 600)]);

        let extent = wait_for_presentable_extent(&mut window).unwrap();
        assert_eq!((extent.width, extent.height), (800, 600));
        assert_eq!(window.waits, 2);
    }

    #[test]
    fn zero_width_alone_still_waits() {
        let mut window = MockWindow::new(&[(0, 600), (800, 600)]);
        wait_for_presentable_extent(&mut window).unwrap();
        assert_eq!(window.waits, 1);
    }

    #[test]
    fn presentable_extent_returns_immediately() {
        let mut window = MockWindow::new(&[(1280, 720)]);
        wait_for_presentable_extent(&mut window).unwrap();
        assert_eq!(window.waits, 0);
    }

    #[test]
    fn close_while_minimized_gives_up() {
        let mut window = MockWindow::new(&[(0, 0)]);
        window.close_after_waits = Some(3);

        assert!(wait_for_presentable_extent(&mut window).is_none());
        assert_eq!(window.waits, 3);
    }

    #[test]
    fn input_tracks_press_and_release() {
        let mut input = InputState::default();
        input.set(KeyCode::KeyW, true);
        input.set(KeyCode::KeyA, true);
        input.set(KeyCode::KeyW, false);

        assert!(!input.is_pressed(KeyCode::KeyW));
        assert!(input.is_pressed(KeyCode::KeyA));

        input.clear();
        assert!(!input.is_pressed(KeyCode::KeyA));
    }
}

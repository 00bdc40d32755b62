// =============================================================================
// SILK - minimal real-time 3D renderer on Vulkan
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  App (frame loop, game objects, camera, input)                  │
// │    └── SimpleRenderSystem (pipeline, push constants)            │
// │    └── Renderer (frame protocol, command buffers)               │
// │          └── Swapchain (images, depth, render pass, sync)       │
// │                └── VulkanDevice (instance, queues, allocator)   │
// └─────────────────────────────────────────────────────────────────┘

pub mod app;
pub mod backend;
pub mod camera;
pub mod config;
pub mod controller;
pub mod frame;
pub mod game_object;
pub mod hot_reload;
pub mod model;
pub mod render_system;
pub mod renderer;
pub mod window;

pub use app::App;
pub use config::Config;

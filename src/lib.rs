// frame-core - frame execution core of a Vulkan renderer
//
// Owns the swapchain, the frames-in-flight ring and the per-frame
// acquire/record/submit/present loop, plus the GPU resources those frames
// touch. Device bootstrap, pipelines and assets are supplied from outside.

pub mod backend;
pub mod config;
pub mod deletion;
pub mod engine;
pub mod frame;
pub mod scene;

pub use engine::{Engine, EngineConfig};

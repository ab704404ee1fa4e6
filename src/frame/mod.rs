// Frame module - per-frame execution on top of the backend
//
// ring: N slots of command buffer + sync primitives
// recorder: draw list -> command buffer
// scheduler: acquire / record / submit / present loop

pub mod recorder;
pub mod ring;
pub mod scheduler;

pub use recorder::{CommandRecorder, DrawItem, RenderTarget};
pub use ring::{FrameRing, FrameSlot};
pub use scheduler::{FrameReport, FrameScheduler, ResizeFlag, MAX_RECREATE_ATTEMPTS};

//! Vertex profiler bridge: implements render_api::RenderBackend on top of vertex-profiler-core.

mod plugin;
mod present;
mod scene_pass;
mod window_backend;

pub use plugin::ProfilerPlugin;
pub use present::PresentPass;
pub use scene_pass::{entity_color, ScenePass, SceneTargets, SCENE_COLOR_FORMAT};
pub use window_backend::ProfilerWindowBackend;

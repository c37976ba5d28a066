//! Shared render backend API.
//! Defines Extract types and the RenderBackend trait so the host can drive the
//! vertex profiler with the same code path (prepare + render_frame + end_of_frame).

mod extract;
mod backend;

pub use extract::{ExtractedMesh, ExtractedMeshes, ExtractedView, MeshGeometry, IDENTITY};
pub use backend::{RenderBackend, RenderBackendWindow};
pub use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

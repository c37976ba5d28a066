//! Vertex profiler core: wgpu-based vertex/pixel density accumulation, classification and async readback.

pub mod accumulator;
pub mod classifier;
pub mod collector;
pub mod config;
pub mod culler;
pub mod error;
pub mod export;
pub mod gpu;
pub mod overlay;
pub mod profiler;
pub mod readback;
pub mod resources;
pub mod sample;
pub mod tiles;

pub use accumulator::{build_accumulator, Accumulator, CounterKind, FrameContext};
pub use classifier::{Color, ColorRange, ColorRangeCache, ColorRangeSetting, Palette, ThresholdUnit, PALETTE_SIZE};
pub use collector::{GpuMesh, MeshHandle, RecordSummary, RendererCollector, RendererRecord, SceneDrawable};
pub use config::{CullMode, HeatMapConfig, Mode, ProfilerConfig, ThresholdPreset, ThresholdTables, UpdateType};
pub use culler::{cull_bounds, frustum_planes, Aabb, VisibilitySet};
pub use error::{ProfilerError, ProfilerResult};
pub use export::{CollectingSink, ExportSink, ProfilerExport};
pub use overlay::OverlayPass;
pub use profiler::{FrameInput, InactiveReason, ProfilerControls, ProfilerStatus, VertexProfiler};
pub use readback::{AssembledSamples, ExportTracker, LogKind, ReadbackPipeline, SessionId};
pub use resources::ResourcePool;
pub use sample::{BatchSample, MeshSample, ProfilerSample, SampleKind, SampleSet, TileSample};
pub use tiles::TileGrid;

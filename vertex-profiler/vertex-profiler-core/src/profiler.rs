//! `VertexProfiler`: the mode state machine and per-frame pass ordering.
//!
//! Per frame: rebuild the session if the mode changed, recollect renderers when
//! asked, cull, accumulate, record readback copies, composite. Readback
//! completions and screenshot captures are handled in [`VertexProfiler::end_of_frame`].

use glam::Mat4;

use crate::accumulator::{build_accumulator, counters_fit, Accumulator, FrameContext};
use crate::classifier::ColorRangeCache;
use crate::collector::{RendererCollector, SceneDrawable, RENDERER_PARAMS_BUFFER};
use crate::config::{Mode, ProfilerConfig, UpdateType};
use crate::culler::{cull_bounds, frustum_planes, Aabb, VisibilitySet};
use crate::error::{ProfilerError, ProfilerResult};
use crate::export::ExportSink;
use crate::overlay::{OverlayPass, COMPOSITE, COMPOSITE_FORMAT};
use crate::readback::{
    AssembledSamples, CaptureKind, ExportTracker, LogKind, ReadbackPipeline, SessionId, TrackerOutput,
};
use crate::resources::{PooledTexture, ResourcePool, TextureSignature};
use crate::sample::AssemblyContext;
use crate::tiles::TileGrid;

const SNAPSHOT: &str = "profiler_snapshot";
const COMPOSITE_SNAPSHOT: &str = "profiler_composite_snapshot";

/// One-shot requests from the host. Each flag is cleared once consumed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProfilerControls {
    pub recollect_renderers: bool,
    pub log_for_display: bool,
    pub log_and_export: bool,
}

impl Default for ProfilerControls {
    fn default() -> Self {
        Self {
            recollect_renderers: true,
            log_for_display: false,
            log_and_export: false,
        }
    }
}

impl ProfilerControls {
    /// Re-arm per-frame requests.
    pub fn arm(&mut self, update_type: UpdateType) {
        if update_type == UpdateType::EveryFrame {
            self.log_for_display = true;
        }
    }

    /// The request to issue this frame, export taking precedence.
    pub fn pending_log(&self) -> Option<LogKind> {
        if self.log_and_export {
            Some(LogKind::Export)
        } else if self.log_for_display {
            Some(LogKind::Display)
        } else {
            None
        }
    }

    pub fn consume(&mut self, kind: LogKind) {
        match kind {
            LogKind::Export => {
                self.log_and_export = false;
                // an export also refreshes the live samples
                self.log_for_display = false;
            }
            LogKind::Display => self.log_for_display = false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InactiveReason {
    ShadersUnavailable,
    NoVisibleRenderers,
    /// A counter buffer for this resolution and renderer count exceeds the device binding limit.
    CounterLimit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProfilerStatus {
    /// Mode `None`.
    Off,
    Active,
    Inactive(InactiveReason),
}

impl ProfilerStatus {
    pub fn evaluate(mode: Mode, shaders_ok: bool, visible: usize, counters_fit: bool) -> Self {
        if mode == Mode::None {
            ProfilerStatus::Off
        } else if !shaders_ok {
            ProfilerStatus::Inactive(InactiveReason::ShadersUnavailable)
        } else if visible == 0 {
            ProfilerStatus::Inactive(InactiveReason::NoVisibleRenderers)
        } else if !counters_fit {
            ProfilerStatus::Inactive(InactiveReason::CounterLimit)
        } else {
            ProfilerStatus::Active
        }
    }
}

/// Camera and targets of the frame being profiled.
pub struct FrameInput<'a> {
    pub view_proj: Mat4,
    pub width: u32,
    pub height: u32,
    /// Scene colour; needs `TEXTURE_BINDING | COPY_SRC`.
    pub scene_color: &'a wgpu::Texture,
    pub scene_view: &'a wgpu::TextureView,
    /// Read only when `recollect_renderers` is set.
    pub drawables: &'a [SceneDrawable],
}

pub struct VertexProfiler {
    config: ProfilerConfig,
    requested_mode: Mode,
    built_mode: Mode,
    rebuild: bool,
    session: Option<Box<dyn Accumulator>>,
    session_id: SessionId,
    status: ProfilerStatus,
    controls: ProfilerControls,
    collector: RendererCollector,
    pool: ResourcePool,
    color_ranges: ColorRangeCache,
    visibility: VisibilitySet,
    overlay: OverlayPass,
    readback: ReadbackPipeline,
    tracker: ExportTracker,
    export_sink: Option<Box<dyn ExportSink>>,
    latest: Option<AssembledSamples>,
}

impl VertexProfiler {
    pub fn new(device: &wgpu::Device, mut config: ProfilerConfig) -> ProfilerResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            requested_mode: Mode::None,
            built_mode: Mode::None,
            rebuild: false,
            session: None,
            session_id: SessionId::default(),
            status: ProfilerStatus::Off,
            controls: ProfilerControls::default(),
            collector: RendererCollector::default(),
            pool: ResourcePool::default(),
            color_ranges: ColorRangeCache::default(),
            visibility: VisibilitySet::default(),
            overlay: OverlayPass::new(device),
            readback: ReadbackPipeline::default(),
            tracker: ExportTracker::new(SessionId::default()),
            export_sink: None,
            latest: None,
        })
    }

    /// Takes effect at the start of the next frame.
    pub fn set_mode(&mut self, mode: Mode) {
        if mode != self.requested_mode {
            log::info!("vertex profiler mode requested: {:?} -> {:?}", self.requested_mode, mode);
        }
        self.requested_mode = mode;
    }

    pub fn mode(&self) -> Mode {
        self.built_mode
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    /// Replace the config. Rebuilds the session so baked state (heat ramp, cull mode) follows.
    pub fn set_config(&mut self, mut config: ProfilerConfig) -> ProfilerResult<()> {
        config.validate()?;
        self.config = config;
        self.color_ranges.mark_dirty();
        self.rebuild = true;
        Ok(())
    }

    pub fn controls(&self) -> &ProfilerControls {
        &self.controls
    }

    pub fn controls_mut(&mut self) -> &mut ProfilerControls {
        &mut self.controls
    }

    pub fn status(&self) -> ProfilerStatus {
        self.status
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn visibility(&self) -> &VisibilitySet {
        &self.visibility
    }

    pub fn collector(&self) -> &RendererCollector {
        &self.collector
    }

    /// A counter readback or an export capture is still in flight.
    pub fn readback_pending(&self) -> bool {
        self.tracker.counters_pending() || self.tracker.export_pending()
    }

    pub fn latest_samples(&self) -> Option<&AssembledSamples> {
        self.latest.as_ref()
    }

    pub fn set_export_sink(&mut self, sink: impl ExportSink + 'static) {
        self.export_sink = Some(Box::new(sink));
    }

    /// Scene + profiler layer of the last encoded frame.
    pub fn composite(&self) -> Option<&PooledTexture> {
        self.pool.texture(COMPOSITE).ok()
    }

    pub fn composite_view(&self) -> Option<&wgpu::TextureView> {
        self.composite().map(|t| &t.view)
    }

    fn sync_session(&mut self, device: &wgpu::Device) {
        if self.requested_mode == self.built_mode && !self.rebuild {
            return;
        }
        self.session = None;
        self.session_id = SessionId(self.session_id.0 + 1);
        self.tracker.reset(self.session_id);
        self.latest = None;
        self.rebuild = false;
        self.built_mode = self.requested_mode;
        self.session = build_accumulator(device, self.built_mode, &self.config);
        log::info!("vertex profiler session {:?} built for {:?}", self.session_id, self.built_mode);
    }

    fn set_status(&mut self, status: ProfilerStatus) {
        if status == self.status {
            return;
        }
        match status {
            ProfilerStatus::Inactive(InactiveReason::ShadersUnavailable) => {
                log::warn!("vertex profiler inactive: {:?} shaders unavailable", self.built_mode)
            }
            ProfilerStatus::Inactive(InactiveReason::NoVisibleRenderers) => {
                log::info!("vertex profiler inactive: no visible renderers")
            }
            ProfilerStatus::Inactive(InactiveReason::CounterLimit) => log::warn!(
                "vertex profiler inactive: {:?} counters for {} renderers exceed the device binding limit",
                self.built_mode,
                self.collector.records().len()
            ),
            ProfilerStatus::Active | ProfilerStatus::Off => {
                log::info!("vertex profiler {:?} ({:?})", status, self.built_mode)
            }
        }
        self.status = status;
    }

    /// Record this frame's profiler work into `encoder`. The composite is always written.
    pub fn encode_frame(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        frame: &FrameInput<'_>,
    ) -> ProfilerResult<()> {
        if frame.width == 0 || frame.height == 0 {
            return Err(ProfilerError::EmptyFrame { width: frame.width, height: frame.height });
        }
        self.sync_session(device);

        let active = if self.built_mode == Mode::None {
            self.set_status(ProfilerStatus::Off);
            false
        } else {
            self.profile(device, queue, encoder, frame)?
        };

        let layer = if active {
            self.session.as_ref().and_then(|s| s.profiler_view())
        } else {
            None
        };
        self.overlay.encode(
            encoder,
            device,
            queue,
            &mut self.pool,
            frame.scene_view,
            layer,
            self.config.overlay_opacity,
            (frame.width, frame.height),
        )?;
        if let Some((_, LogKind::Export)) = self.tracker.opened_this_frame() {
            self.snapshot_export_frame(device, encoder, frame)?;
        }
        Ok(())
    }

    /// Freeze the scene and the composite of the frame an export was opened in.
    /// Both are read back at a later `end_of_frame`; no other export can start before then.
    fn snapshot_export_frame(
        &mut self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        frame: &FrameInput<'_>,
    ) -> ProfilerResult<()> {
        let copies = [(SNAPSHOT, frame.scene_color.format()), (COMPOSITE_SNAPSHOT, COMPOSITE_FORMAT)];
        for (name, format) in copies {
            self.pool.ensure_texture(
                device,
                name,
                TextureSignature {
                    width: frame.width,
                    height: frame.height,
                    format,
                    usage: wgpu::TextureUsages::COPY_DST | wgpu::TextureUsages::COPY_SRC,
                },
            );
        }
        let extent = wgpu::Extent3d { width: frame.width, height: frame.height, depth_or_array_layers: 1 };
        encoder.copy_texture_to_texture(
            frame.scene_color.as_image_copy(),
            self.pool.texture(SNAPSHOT)?.texture.as_image_copy(),
            extent,
        );
        encoder.copy_texture_to_texture(
            self.pool.texture(COMPOSITE)?.texture.as_image_copy(),
            self.pool.texture(COMPOSITE_SNAPSHOT)?.texture.as_image_copy(),
            extent,
        );
        Ok(())
    }

    /// Accumulate and request readback. Returns whether the profiler layer is valid.
    fn profile(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        frame: &FrameInput<'_>,
    ) -> ProfilerResult<bool> {
        if self.controls.recollect_renderers {
            self.collector.collect(frame.drawables);
            self.controls.recollect_renderers = false;
        }
        self.controls.arm(self.config.update_type);
        self.collector.upload_params(device, queue, &mut self.pool)?;

        let bounds: Vec<Aabb> = self.collector.records().iter().map(|r| r.world_bounds).collect();
        self.visibility = cull_bounds(&bounds, &frustum_planes(&frame.view_proj));

        let grid = TileGrid::new(frame.width, frame.height, self.config.tile_width, self.config.tile_height);
        let shaders_ok = self.session.as_ref().is_some_and(|s| s.enabled());
        let fits = self
            .session
            .as_ref()
            .is_some_and(|s| counters_fit(s.counter_bytes(&grid, self.collector.records().len()), &device.limits()));
        self.set_status(ProfilerStatus::evaluate(
            self.built_mode,
            shaders_ok,
            self.visibility.visible_count(),
            fits,
        ));
        if self.status != ProfilerStatus::Active {
            return Ok(false);
        }
        let Some(session) = self.session.as_mut() else {
            return Ok(false);
        };

        let mode = self.built_mode;
        let color_ranges = self.color_ranges.sync(mode, &self.config, &grid)?.clone();
        let hot_tile_threshold = if mode.uses_tiles() {
            let first = self.config.thresholds.for_mode(mode).first().copied().unwrap_or(0);
            grid.threshold_to_tile_count(first as f32)
        } else {
            0.0
        };
        let ctx = FrameContext {
            device,
            queue,
            view_proj: frame.view_proj,
            grid,
            records: self.collector.records(),
            records_generation: self.collector.generation(),
            visibility: &self.visibility,
            renderer_params: self.pool.buffer(RENDERER_PARAMS_BUFFER)?,
            color_ranges: &color_ranges,
            color_ranges_version: self.color_ranges.version(),
            hot_tile_threshold,
            config: &self.config,
        };
        session.prepare_frame(&ctx)?;
        session.accumulate(encoder, &ctx)?;

        let Some(kind) = self.controls.pending_log() else {
            return Ok(true);
        };
        if !mode.has_samples() {
            log::info!("{:?} produces no samples; log request dropped", mode);
            self.controls.consume(kind);
            return Ok(true);
        }
        let assembly = AssemblyContext {
            mode,
            grid,
            records: self.collector.summaries(),
            visibility: self.visibility.clone(),
            color_ranges,
            hot_tile_threshold,
        };
        // busy: keep the flag and retry next frame
        let Some(request) = self.tracker.begin(kind, assembly) else {
            return Ok(true);
        };
        self.controls.consume(kind);
        for source in session.readback_sources() {
            self.readback.encode_counter_copy(device, encoder, self.session_id, request, &source);
        }
        Ok(true)
    }

    /// The host submitted the encoder passed to `encode_frame`.
    pub fn frame_submitted(&mut self) {
        self.readback.submitted();
        self.tracker.frame_submitted();
    }

    /// The host dropped the encoder passed to `encode_frame` without submitting it.
    /// A log request opened by that frame is released; its flag stays consumed.
    pub fn frame_discarded(&mut self) {
        self.readback.cancel_unsubmitted();
        self.tracker.frame_discarded();
    }

    /// End-of-frame sync point: deliver finished readbacks, then start pending screenshot captures.
    pub fn end_of_frame(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) {
        for event in self.readback.drain(device) {
            match self.tracker.handle(event) {
                TrackerOutput::Nothing => {}
                TrackerOutput::Samples(samples) => {
                    log::debug!("{:?}: {} samples assembled", samples.mode, samples.samples.len());
                    self.latest = Some(samples);
                }
                TrackerOutput::Export(export) => match self.export_sink.as_mut() {
                    Some(sink) => sink.on_export(*export),
                    None => log::warn!("export finished but no export sink is set"),
                },
            }
        }

        let Some(request) = self.tracker.take_capture_request() else {
            return;
        };
        let (Ok(snapshot), Ok(composite)) = (self.pool.texture(SNAPSHOT), self.pool.texture(COMPOSITE_SNAPSHOT)) else {
            self.tracker.on_failure(self.session_id, request, "snapshot or composite missing");
            return;
        };
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("profiler_capture_encoder"),
        });
        self.readback.encode_texture_copy(
            device,
            &mut encoder,
            self.session_id,
            request,
            CaptureKind::Screenshot,
            &snapshot.texture,
        );
        self.readback.encode_texture_copy(
            device,
            &mut encoder,
            self.session_id,
            request,
            CaptureKind::ScreenshotWithOverlay,
            &composite.texture,
        );
        queue.submit(std::iter::once(encoder.finish()));
        self.readback.submitted();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_is_requested_on_startup() {
        let controls = ProfilerControls::default();
        assert!(controls.recollect_renderers);
        assert_eq!(controls.pending_log(), None);
    }

    #[test]
    fn every_frame_rearms_display() {
        let mut controls = ProfilerControls { recollect_renderers: false, ..Default::default() };
        controls.arm(UpdateType::Once);
        assert_eq!(controls.pending_log(), None);
        controls.arm(UpdateType::EveryFrame);
        assert_eq!(controls.pending_log(), Some(LogKind::Display));
        controls.consume(LogKind::Display);
        assert_eq!(controls.pending_log(), None);
        controls.arm(UpdateType::EveryFrame);
        assert_eq!(controls.pending_log(), Some(LogKind::Display));
    }

    #[test]
    fn export_takes_precedence_and_clears_display() {
        let mut controls = ProfilerControls {
            recollect_renderers: false,
            log_for_display: true,
            log_and_export: true,
        };
        assert_eq!(controls.pending_log(), Some(LogKind::Export));
        controls.consume(LogKind::Export);
        assert_eq!(controls.pending_log(), None);
    }

    #[test]
    fn status_reflects_mode_shaders_and_visibility() {
        assert_eq!(ProfilerStatus::evaluate(Mode::None, false, 0, true), ProfilerStatus::Off);
        assert_eq!(
            ProfilerStatus::evaluate(Mode::Overdraw, false, 4, true),
            ProfilerStatus::Inactive(InactiveReason::ShadersUnavailable)
        );
        assert_eq!(
            ProfilerStatus::evaluate(Mode::OnlyTile, true, 0, true),
            ProfilerStatus::Inactive(InactiveReason::NoVisibleRenderers)
        );
        assert_eq!(ProfilerStatus::evaluate(Mode::MeshHeatMap, true, 1, true), ProfilerStatus::Active);
    }

    #[test]
    fn oversized_counters_deactivate_the_mode() {
        assert_eq!(
            ProfilerStatus::evaluate(Mode::TileBasedMesh, true, 20_000, false),
            ProfilerStatus::Inactive(InactiveReason::CounterLimit)
        );
        // no renderers on screen is reported first
        assert_eq!(
            ProfilerStatus::evaluate(Mode::TileBasedMesh, true, 0, false),
            ProfilerStatus::Inactive(InactiveReason::NoVisibleRenderers)
        );
    }
}

//! Asynchronous GPU -> CPU readback and the request state machine behind it.
//!
//! Copies are recorded into the frame's encoder, mapped with `map_async` once the
//! host has submitted, and completions arrive over a flume channel that is drained
//! at the end-of-frame sync point. Nothing here waits on the GPU.

use std::collections::HashMap;
use std::sync::Arc;

use image::RgbaImage;

use crate::accumulator::{CounterKind, CounterSource};
use crate::config::Mode;
use crate::error::ProfilerError;
use crate::export::ProfilerExport;
use crate::sample::{AssemblyContext, SampleSet};

/// Identifies one accumulator session; bumped on every mode rebuild.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogKind {
    /// Assemble samples for live display only.
    Display,
    /// Assemble, then capture screenshots and hand everything to the export sink.
    Export,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CaptureKind {
    Screenshot,
    ScreenshotWithOverlay,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReadbackTarget {
    Counter(CounterKind),
    Capture(CaptureKind),
}

impl ReadbackTarget {
    fn label(self) -> &'static str {
        match self {
            ReadbackTarget::Counter(kind) => kind.label(),
            ReadbackTarget::Capture(CaptureKind::Screenshot) => "screenshot",
            ReadbackTarget::Capture(CaptureKind::ScreenshotWithOverlay) => "screenshot_with_overlay",
        }
    }
}

/// Decoded readback payload.
#[derive(Debug)]
pub enum ReadbackData {
    Counters(Vec<u32>),
    Image(RgbaImage),
}

/// A finished (or failed) transfer, tagged with the session that issued it.
#[derive(Debug)]
pub struct ReadbackEvent {
    pub session: SessionId,
    pub request: RequestId,
    pub target: ReadbackTarget,
    pub result: Result<ReadbackData, String>,
}

struct MapMessage {
    session: SessionId,
    request: RequestId,
    target: ReadbackTarget,
    result: Result<(), wgpu::BufferAsyncError>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ImageLayout {
    width: u32,
    height: u32,
    padded_bytes_per_row: u32,
    bgra: bool,
}

struct InFlight {
    session: SessionId,
    buffer: Arc<wgpu::Buffer>,
    image: Option<ImageLayout>,
}

/// Row pitch for a texture -> buffer copy of RGBA8 texels.
pub fn padded_bytes_per_row(width: u32) -> u32 {
    (width * 4).div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT
}

/// Strips row padding and swizzles BGRA to RGBA.
pub fn decode_rgba8(data: &[u8], width: u32, height: u32, padded_bytes_per_row: u32, bgra: bool) -> Option<RgbaImage> {
    let row = (width * 4) as usize;
    let mut pixels = Vec::with_capacity(row * height as usize);
    for y in 0..height as usize {
        let start = y * padded_bytes_per_row as usize;
        pixels.extend_from_slice(data.get(start..start + row)?);
    }
    if bgra {
        for texel in pixels.chunks_exact_mut(4) {
            texel.swap(0, 2);
        }
    }
    RgbaImage::from_raw(width, height, pixels)
}

/// Staging buffers, pending maps and the completion channel.
pub struct ReadbackPipeline {
    staging: HashMap<ReadbackTarget, Arc<wgpu::Buffer>>,
    encoded: Vec<(RequestId, ReadbackTarget)>,
    in_flight: HashMap<(RequestId, ReadbackTarget), InFlight>,
    sender: flume::Sender<MapMessage>,
    receiver: flume::Receiver<MapMessage>,
}

impl Default for ReadbackPipeline {
    fn default() -> Self {
        let (sender, receiver) = flume::unbounded();
        Self {
            staging: HashMap::new(),
            encoded: Vec::new(),
            in_flight: HashMap::new(),
            sender,
            receiver,
        }
    }
}

impl ReadbackPipeline {
    /// Pooled `MAP_READ` buffer for `target`; a fresh one if the pooled buffer is busy or too small.
    fn staging_buffer(&mut self, device: &wgpu::Device, target: ReadbackTarget, size: u64) -> Arc<wgpu::Buffer> {
        if let Some(buf) = self.staging.get(&target) {
            if buf.size() == size && Arc::strong_count(buf) == 1 {
                return Arc::clone(buf);
            }
        }
        log::debug!("readback: allocating staging `{}` ({} bytes)", target.label(), size);
        let buf = Arc::new(device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(target.label()),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }));
        self.staging.insert(target, Arc::clone(&buf));
        buf
    }

    pub fn encode_counter_copy(
        &mut self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        session: SessionId,
        request: RequestId,
        source: &CounterSource<'_>,
    ) {
        let target = ReadbackTarget::Counter(source.kind);
        let buffer = self.staging_buffer(device, target, source.size);
        encoder.copy_buffer_to_buffer(source.buffer, 0, &buffer, 0, source.size);
        self.encoded.push((request, target));
        self.in_flight.insert((request, target), InFlight { session, buffer, image: None });
    }

    /// Copy a whole RGBA8/BGRA8 texture; `texture` needs `COPY_SRC`.
    pub fn encode_texture_copy(
        &mut self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        session: SessionId,
        request: RequestId,
        kind: CaptureKind,
        texture: &wgpu::Texture,
    ) {
        let (width, height) = (texture.width(), texture.height());
        let padded = padded_bytes_per_row(width);
        let target = ReadbackTarget::Capture(kind);
        let buffer = self.staging_buffer(device, target, padded as u64 * height as u64);
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        );
        let bgra = matches!(
            texture.format(),
            wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Bgra8UnormSrgb
        );
        self.encoded.push((request, target));
        self.in_flight.insert(
            (request, target),
            InFlight { session, buffer, image: Some(ImageLayout { width, height, padded_bytes_per_row: padded, bgra }) },
        );
    }

    /// Start mapping everything encoded since the last call. Call after the host submitted.
    pub fn submitted(&mut self) {
        for (request, target) in self.encoded.drain(..) {
            let Some(flight) = self.in_flight.get(&(request, target)) else { continue };
            let sender = self.sender.clone();
            let session = flight.session;
            flight.buffer.slice(..).map_async(wgpu::MapMode::Read, move |result| {
                let _ = sender.send(MapMessage { session, request, target, result });
            });
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.in_flight.is_empty()
    }

    /// Non-blocking poll, then decode every completed map.
    pub fn drain(&mut self, device: &wgpu::Device) -> Vec<ReadbackEvent> {
        if self.in_flight.is_empty() {
            return Vec::new();
        }
        device.poll(wgpu::Maintain::Poll);
        let messages: Vec<MapMessage> = self.receiver.try_iter().collect();
        messages
            .into_iter()
            .filter_map(|msg| {
                let flight = self.in_flight.remove(&(msg.request, msg.target))?;
                let result = match msg.result {
                    Ok(()) => {
                        let data = {
                            let mapped = flight.buffer.slice(..).get_mapped_range();
                            match flight.image {
                                None => Ok(ReadbackData::Counters(bytemuck::pod_collect_to_vec(&mapped))),
                                Some(l) => decode_rgba8(&mapped, l.width, l.height, l.padded_bytes_per_row, l.bgra)
                                    .map(ReadbackData::Image)
                                    .ok_or_else(|| "staging buffer shorter than image".to_string()),
                            }
                        };
                        flight.buffer.unmap();
                        data
                    }
                    Err(err) => Err(err.to_string()),
                };
                Some(ReadbackEvent { session: msg.session, request: msg.request, target: msg.target, result })
            })
            .collect()
    }

    /// Forget copies that were encoded but never submitted (frame aborted).
    pub fn cancel_unsubmitted(&mut self) {
        for key in self.encoded.drain(..) {
            self.in_flight.remove(&key);
        }
    }
}

struct CounterRequest {
    id: RequestId,
    kind: LogKind,
    context: AssemblyContext,
    received: HashMap<CounterKind, Vec<u32>>,
}

struct ReadyExport {
    id: RequestId,
    mode: Mode,
    samples: SampleSet,
}

struct Capturing {
    ready: ReadyExport,
    screenshot: Option<RgbaImage>,
    screenshot_with_overlay: Option<RgbaImage>,
}

/// What a completed counter request produced.
#[derive(Debug, PartialEq)]
pub struct AssembledSamples {
    pub request: RequestId,
    pub mode: Mode,
    pub samples: SampleSet,
    /// An export is now waiting for the next end-of-frame capture.
    pub export_pending: bool,
}

/// CPU side of the readback protocol. One counter request in flight at a time;
/// an export then waits for the next end-of-frame before screenshots are taken.
/// Everything is keyed by [`SessionId`], so a mode switch orphans it all.
pub struct ExportTracker {
    session: SessionId,
    next_request: u64,
    counters: Option<CounterRequest>,
    awaiting_capture: Option<ReadyExport>,
    capturing: Option<Capturing>,
    /// Opened by the frame being encoded; cleared when the host submits or drops it.
    opened: Option<(RequestId, LogKind)>,
}

impl ExportTracker {
    pub fn new(session: SessionId) -> Self {
        Self { session, next_request: 0, counters: None, awaiting_capture: None, capturing: None, opened: None }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Switch to a new session, dropping anything the old one had in flight.
    pub fn reset(&mut self, session: SessionId) {
        if self.counters.is_some() || self.awaiting_capture.is_some() || self.capturing.is_some() {
            log::debug!("session {:?} -> {:?}: dropping in-flight readback", self.session, session);
        }
        self.session = session;
        self.counters = None;
        self.awaiting_capture = None;
        self.capturing = None;
        self.opened = None;
    }

    pub fn counters_pending(&self) -> bool {
        self.counters.is_some()
    }

    pub fn export_pending(&self) -> bool {
        self.awaiting_capture.is_some() || self.capturing.is_some()
    }

    /// Open a counter request. `None` while another counter request (or, for an
    /// export, another export) is still running; the caller retries next frame.
    pub fn begin(&mut self, kind: LogKind, context: AssemblyContext) -> Option<RequestId> {
        if self.counters.is_some() || (kind == LogKind::Export && self.export_pending()) {
            return None;
        }
        self.next_request += 1;
        let id = RequestId(self.next_request);
        self.counters = Some(CounterRequest { id, kind, context, received: HashMap::new() });
        self.opened = Some((id, kind));
        Some(id)
    }

    pub fn opened_this_frame(&self) -> Option<(RequestId, LogKind)> {
        self.opened
    }

    pub fn frame_submitted(&mut self) {
        self.opened = None;
    }

    /// The frame that opened a request never reached the GPU; release the request.
    pub fn frame_discarded(&mut self) {
        if let Some((request, _)) = self.opened.take() {
            self.on_failure(self.session, request, "frame discarded before submit");
        }
    }

    fn is_current(&self, session: SessionId) -> bool {
        if session != self.session {
            log::debug!("discarding readback from stale session {:?} (current {:?})", session, self.session);
            return false;
        }
        true
    }

    /// Feed a counter buffer. Returns the sorted samples once every expected counter arrived.
    pub fn on_counters(
        &mut self,
        session: SessionId,
        request: RequestId,
        kind: CounterKind,
        data: Vec<u32>,
    ) -> Option<AssembledSamples> {
        if !self.is_current(session) {
            return None;
        }
        let pending = self.counters.as_mut().filter(|c| c.id == request)?;
        pending.received.insert(kind, data);
        if !pending.context.expected_counters().iter().all(|k| pending.received.contains_key(k)) {
            return None;
        }
        let done = self.counters.take()?;
        let samples = match done.context.assemble(&done.received) {
            Ok(samples) => samples,
            Err(err) => {
                log::warn!("sample assembly failed: {}", err);
                return None;
            }
        };
        let export_pending = done.kind == LogKind::Export;
        if export_pending {
            self.awaiting_capture = Some(ReadyExport { id: done.id, mode: done.context.mode, samples: samples.clone() });
        }
        Some(AssembledSamples { request: done.id, mode: done.context.mode, samples, export_pending })
    }

    /// Abort whichever stage `request` is in.
    pub fn on_failure(&mut self, session: SessionId, request: RequestId, reason: &str) {
        if !self.is_current(session) {
            return;
        }
        log::warn!("readback request {:?} failed, aborting: {}", request, reason);
        if self.counters.as_ref().is_some_and(|c| c.id == request) {
            self.counters = None;
        }
        if self.awaiting_capture.as_ref().is_some_and(|r| r.id == request) {
            self.awaiting_capture = None;
        }
        if self.capturing.as_ref().is_some_and(|c| c.ready.id == request) {
            self.capturing = None;
        }
    }

    /// Called at end-of-frame: hands out the export whose screenshots should be captured now.
    pub fn take_capture_request(&mut self) -> Option<RequestId> {
        let ready = self.awaiting_capture.take()?;
        let id = ready.id;
        self.capturing = Some(Capturing { ready, screenshot: None, screenshot_with_overlay: None });
        Some(id)
    }

    /// Feed a captured image. Returns the export once both screenshots are in.
    pub fn on_capture(
        &mut self,
        session: SessionId,
        request: RequestId,
        kind: CaptureKind,
        image: RgbaImage,
    ) -> Option<ProfilerExport> {
        if !self.is_current(session) {
            return None;
        }
        let capturing = self.capturing.as_mut().filter(|c| c.ready.id == request)?;
        match kind {
            CaptureKind::Screenshot => capturing.screenshot = Some(image),
            CaptureKind::ScreenshotWithOverlay => capturing.screenshot_with_overlay = Some(image),
        }
        if capturing.screenshot.is_none() || capturing.screenshot_with_overlay.is_none() {
            return None;
        }
        let done = self.capturing.take()?;
        Some(ProfilerExport {
            mode: done.ready.mode,
            samples: done.ready.samples,
            screenshot: done.screenshot?,
            screenshot_with_overlay: done.screenshot_with_overlay?,
        })
    }

    /// Route a decoded pipeline event to the right stage.
    pub fn handle(&mut self, event: ReadbackEvent) -> TrackerOutput {
        match (event.target, event.result) {
            (target, Err(reason)) => {
                let err = ProfilerError::Readback { label: target.label(), reason };
                self.on_failure(event.session, event.request, &err.to_string());
                TrackerOutput::Nothing
            }
            (ReadbackTarget::Counter(kind), Ok(ReadbackData::Counters(data))) => {
                match self.on_counters(event.session, event.request, kind, data) {
                    Some(s) => TrackerOutput::Samples(s),
                    None => TrackerOutput::Nothing,
                }
            }
            (ReadbackTarget::Capture(kind), Ok(ReadbackData::Image(image))) => {
                match self.on_capture(event.session, event.request, kind, image) {
                    Some(export) => TrackerOutput::Export(Box::new(export)),
                    None => TrackerOutput::Nothing,
                }
            }
            (target, Ok(_)) => {
                log::warn!("readback `{}` returned an unexpected payload", target.label());
                self.on_failure(event.session, event.request, "payload mismatch");
                TrackerOutput::Nothing
            }
        }
    }
}

#[derive(Debug)]
pub enum TrackerOutput {
    Nothing,
    Samples(AssembledSamples),
    Export(Box<ProfilerExport>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ColorRangeSetting, Palette, ThresholdUnit};
    use crate::culler::VisibilitySet;
    use crate::tiles::TileGrid;

    fn tile_context() -> AssemblyContext {
        let grid = TileGrid::new(200, 100, 100, 100);
        AssemblyContext {
            mode: Mode::OnlyTile,
            grid,
            records: Vec::new(),
            visibility: VisibilitySet::default(),
            color_ranges: ColorRangeSetting::from_table(
                &[1000, 2000],
                ThresholdUnit::for_mode(Mode::OnlyTile, &grid),
                &Palette::default(),
            )
            .unwrap(),
            hot_tile_threshold: 1000.0,
        }
    }

    #[test]
    fn stale_session_result_is_discarded() {
        let mut tracker = ExportTracker::new(SessionId(1));
        let request = tracker.begin(LogKind::Display, tile_context()).unwrap();
        // mode switch while the OnlyTile map is still pending
        tracker.reset(SessionId(2));
        assert!(!tracker.counters_pending());
        let late = tracker.on_counters(SessionId(1), request, CounterKind::TileVertices, vec![5, 3000]);
        assert_eq!(late, None);
        // the new session can issue its own request untouched
        assert!(tracker.begin(LogKind::Display, tile_context()).is_some());
        assert!(tracker.on_counters(SessionId(1), request, CounterKind::TileVertices, vec![1, 1]).is_none());
        assert!(tracker.counters_pending());
    }

    #[test]
    fn display_request_completes_without_export() {
        let mut tracker = ExportTracker::new(SessionId(3));
        let request = tracker.begin(LogKind::Display, tile_context()).unwrap();
        assert!(tracker.begin(LogKind::Display, tile_context()).is_none());
        let done = tracker.on_counters(SessionId(3), request, CounterKind::TileVertices, vec![500, 2500]).unwrap();
        assert!(!done.export_pending);
        assert_eq!(done.samples.len(), 2);
        assert!(!tracker.export_pending());
        assert!(tracker.take_capture_request().is_none());
    }

    #[test]
    fn export_waits_for_both_screenshots() {
        let mut tracker = ExportTracker::new(SessionId(1));
        let request = tracker.begin(LogKind::Export, tile_context()).unwrap();
        let done = tracker.on_counters(SessionId(1), request, CounterKind::TileVertices, vec![1, 2]).unwrap();
        assert!(done.export_pending);
        assert!(tracker.begin(LogKind::Export, tile_context()).is_none());

        let capture = tracker.take_capture_request().unwrap();
        assert_eq!(capture, request);
        assert!(tracker
            .on_capture(SessionId(1), capture, CaptureKind::Screenshot, RgbaImage::new(2, 1))
            .is_none());
        let export = tracker
            .on_capture(SessionId(1), capture, CaptureKind::ScreenshotWithOverlay, RgbaImage::new(2, 1))
            .unwrap();
        assert_eq!(export.mode, Mode::OnlyTile);
        assert_eq!(export.samples.len(), 2);
        assert!(!tracker.export_pending());
    }

    #[test]
    fn map_failure_aborts_and_frees_the_slot() {
        let mut tracker = ExportTracker::new(SessionId(1));
        let request = tracker.begin(LogKind::Export, tile_context()).unwrap();
        let out = tracker.handle(ReadbackEvent {
            session: SessionId(1),
            request,
            target: ReadbackTarget::Counter(CounterKind::TileVertices),
            result: Err("device lost".into()),
        });
        assert!(matches!(out, TrackerOutput::Nothing));
        assert!(!tracker.counters_pending());
        assert!(tracker.begin(LogKind::Export, tile_context()).is_some());
    }

    #[test]
    fn discarded_frame_releases_its_request() {
        let mut tracker = ExportTracker::new(SessionId(1));
        let request = tracker.begin(LogKind::Export, tile_context()).unwrap();
        assert_eq!(tracker.opened_this_frame(), Some((request, LogKind::Export)));
        tracker.frame_discarded();
        assert!(!tracker.counters_pending());
        assert_eq!(tracker.opened_this_frame(), None);
        let retry = tracker.begin(LogKind::Export, tile_context());
        assert!(retry.is_some_and(|id| id != request));
    }

    #[test]
    fn only_the_export_frame_is_marked_for_snapshots() {
        let mut tracker = ExportTracker::new(SessionId(1));
        let display = tracker.begin(LogKind::Display, tile_context()).unwrap();
        assert_eq!(tracker.opened_this_frame(), Some((display, LogKind::Display)));
        tracker.frame_submitted();
        tracker.on_counters(SessionId(1), display, CounterKind::TileVertices, vec![1, 1]).unwrap();

        let export = tracker.begin(LogKind::Export, tile_context()).unwrap();
        assert_eq!(tracker.opened_this_frame(), Some((export, LogKind::Export)));
        tracker.frame_submitted();
        // frames between the request and the capture must not take new snapshots
        tracker.on_counters(SessionId(1), export, CounterKind::TileVertices, vec![1, 1]).unwrap();
        assert!(tracker.begin(LogKind::Export, tile_context()).is_none());
        assert_eq!(tracker.opened_this_frame(), None);
        assert_eq!(tracker.take_capture_request(), Some(export));
    }

    #[test]
    fn submitted_frame_keeps_its_request() {
        let mut tracker = ExportTracker::new(SessionId(1));
        let request = tracker.begin(LogKind::Display, tile_context()).unwrap();
        tracker.frame_submitted();
        // a later discarded frame opened nothing of its own
        tracker.frame_discarded();
        assert!(tracker.counters_pending());
        assert!(tracker.on_counters(SessionId(1), request, CounterKind::TileVertices, vec![4, 4]).is_some());
    }

    #[test]
    fn phase_two_is_cancelled_by_session_change() {
        let mut tracker = ExportTracker::new(SessionId(1));
        let request = tracker.begin(LogKind::Export, tile_context()).unwrap();
        tracker.on_counters(SessionId(1), request, CounterKind::TileVertices, vec![0, 0]).unwrap();
        tracker.reset(SessionId(2));
        assert!(tracker.take_capture_request().is_none());
    }

    #[test]
    fn rgba_rows_are_unpadded_and_swizzled() {
        let padded = padded_bytes_per_row(2);
        assert_eq!(padded, 256);
        let mut data = vec![0u8; padded as usize * 2];
        data[..8].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        data[256..264].copy_from_slice(&[9, 10, 11, 12, 13, 14, 15, 16]);
        let rgba = decode_rgba8(&data, 2, 2, padded, false).unwrap();
        assert_eq!(rgba.get_pixel(1, 1).0, [13, 14, 15, 16]);
        let bgra = decode_rgba8(&data, 2, 2, padded, true).unwrap();
        assert_eq!(bgra.get_pixel(0, 0).0, [3, 2, 1, 4]);
        assert!(decode_rgba8(&data[..300], 2, 2, padded, false).is_none());
    }
}

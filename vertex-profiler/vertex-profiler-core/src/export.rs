//! Export sink: where completed `log_and_export` requests are delivered.

use image::RgbaImage;

use crate::config::Mode;
use crate::sample::SampleSet;

/// A finished export: the samples plus the frame they were taken from.
#[derive(Clone, Debug)]
pub struct ProfilerExport {
    pub mode: Mode,
    pub samples: SampleSet,
    /// Scene colour as it was when the request was issued.
    pub screenshot: RgbaImage,
    /// Composited output (scene + profiler layer) at capture time.
    pub screenshot_with_overlay: RgbaImage,
}

pub trait ExportSink: Send {
    fn on_export(&mut self, export: ProfilerExport);
}

impl<F> ExportSink for F
where
    F: FnMut(ProfilerExport) + Send,
{
    fn on_export(&mut self, export: ProfilerExport) {
        self(export)
    }
}

/// Keeps every export; handy for hosts that poll instead of reacting.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub exports: Vec<ProfilerExport>,
}

impl ExportSink for CollectingSink {
    fn on_export(&mut self, export: ProfilerExport) {
        log::info!("export received: {:?}, {} samples", export.mode, export.samples.len());
        self.exports.push(export);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn export() -> ProfilerExport {
        ProfilerExport {
            mode: Mode::OnlyTile,
            samples: SampleSet::Samples(Vec::new()),
            screenshot: RgbaImage::new(2, 2),
            screenshot_with_overlay: RgbaImage::new(2, 2),
        }
    }

    #[test]
    fn closures_are_sinks() {
        let mut seen = Vec::new();
        {
            let mut sink = |e: ProfilerExport| seen.push(e.mode);
            sink.on_export(export());
        }
        assert_eq!(seen, vec![Mode::OnlyTile]);
    }

    #[test]
    fn collecting_sink_keeps_exports() {
        let mut sink = CollectingSink::default();
        sink.on_export(export());
        sink.on_export(export());
        assert_eq!(sink.exports.len(), 2);
    }
}

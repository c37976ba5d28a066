//! Threshold classification: colours, the palette and the sorted threshold table.

use serde::{Deserialize, Serialize};

use crate::config::{Mode, ProfilerConfig};
use crate::error::{ProfilerError, ProfilerResult};
use crate::tiles::{TileGrid, DENSITY_AREA};

/// Linear RGBA colour.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const WHITE: Color = Color::rgb(1.0, 1.0, 1.0);
    pub const TRANSPARENT: Color = Color { r: 0.0, g: 0.0, b: 0.0, a: 0.0 };

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub fn lerp(self, other: Color, t: f32) -> Color {
        Color {
            r: self.r + (other.r - self.r) * t,
            g: self.g + (other.g - self.g) * t,
            b: self.b + (other.b - self.b) * t,
            a: self.a + (other.a - self.a) * t,
        }
    }

    pub fn to_rgba8(self) -> [u8; 4] {
        self.to_array().map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)
    }
}

pub const PALETTE_SIZE: usize = 8;

/// Fixed 8-entry level palette. Entry alpha is its activation toggle: an
/// inactive level still classifies but draws nothing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Palette {
    pub colors: [Color; PALETTE_SIZE],
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            colors: [
                Color::rgb(0.5, 1.0, 0.5),
                Color::rgb(0.0, 1.0, 0.0),
                Color::rgb(0.0, 1.0, 1.0),
                Color::rgb(1.0, 1.0, 0.0),
                Color::rgb(0.0, 0.5, 1.0),
                Color::rgb(0.0, 0.0, 1.0),
                Color::rgb(1.0, 0.0, 1.0),
                Color::rgb(1.0, 0.0, 0.0),
            ],
        }
    }
}

impl Palette {
    /// Colour for a level; levels past the palette reuse the last entry.
    pub fn color(&self, level: usize) -> Color {
        self.colors[level.min(PALETTE_SIZE - 1)]
    }

    pub fn set_active(&mut self, level: usize, active: bool) {
        if let Some(c) = self.colors.get_mut(level) {
            c.a = if active { 1.0 } else { 0.0 };
        }
    }

    pub fn is_active(&self, level: usize) -> bool {
        self.colors.get(level).is_some_and(|c| c.a > 0.0)
    }
}

/// Unit the integer threshold table is expressed in for a mode.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ThresholdUnit {
    /// Vertices per 10,000 pixels; scaled to a raw per-tile count.
    TileArea { tile_width: u32, tile_height: u32 },
    /// Ten-thousandths of a vertex per pixel.
    PerPixel,
    /// Compared as-is.
    Raw,
}

impl ThresholdUnit {
    pub fn for_mode(mode: Mode, grid: &TileGrid) -> Self {
        match mode {
            Mode::OnlyTile => ThresholdUnit::TileArea {
                tile_width: grid.tile_width,
                tile_height: grid.tile_height,
            },
            Mode::OnlyMesh | Mode::TileBasedMesh | Mode::MeshHeatMap => ThresholdUnit::PerPixel,
            Mode::Overdraw | Mode::None => ThresholdUnit::Raw,
        }
    }

    pub fn scale(self) -> f32 {
        match self {
            ThresholdUnit::TileArea { tile_width, tile_height } => (tile_width * tile_height) as f32 / DENSITY_AREA,
            ThresholdUnit::PerPixel => 0.0001,
            ThresholdUnit::Raw => 1.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorRange {
    pub threshold: f32,
    pub color: Color,
}

/// GPU layout of one [`ColorRange`] (storage array element, 32 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuColorRange {
    pub color: [f32; 4],
    pub threshold: f32,
    pub _pad: [f32; 3],
}

/// Ascending threshold table with one colour per level. Never shorter than 2.
#[derive(Clone, Debug, PartialEq)]
pub struct ColorRangeSetting {
    ranges: Vec<ColorRange>,
}

impl ColorRangeSetting {
    pub fn new(mut ranges: Vec<ColorRange>) -> ProfilerResult<Self> {
        if ranges.len() < 2 {
            return Err(ProfilerError::ThresholdTableTooShort(ranges.len()));
        }
        ranges.sort_by(|a, b| a.threshold.total_cmp(&b.threshold));
        Ok(Self { ranges })
    }

    /// Level `i` gets `table[i] * unit.scale()` and `palette.color(i)`.
    pub fn from_table(table: &[u32], unit: ThresholdUnit, palette: &Palette) -> ProfilerResult<Self> {
        let scale = unit.scale();
        Self::new(
            table
                .iter()
                .enumerate()
                .map(|(i, &t)| ColorRange { threshold: t as f32 * scale, color: palette.color(i) })
                .collect(),
        )
    }

    pub fn ranges(&self) -> &[ColorRange] {
        &self.ranges
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn first_threshold(&self) -> f32 {
        self.ranges[0].threshold
    }

    /// Highest level whose threshold is strictly below `value`; `(0, WHITE)` if none.
    pub fn classify(&self, value: f32) -> (usize, Color) {
        let mut hit = None;
        for (i, range) in self.ranges.iter().enumerate() {
            if range.threshold < value {
                hit = Some((i, range.color));
            } else {
                break;
            }
        }
        hit.unwrap_or((0, Color::WHITE))
    }

    pub fn to_gpu(&self) -> Vec<GpuColorRange> {
        self.ranges
            .iter()
            .map(|r| GpuColorRange { color: r.color.to_array(), threshold: r.threshold, _pad: [0.0; 3] })
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq)]
struct ColorRangeKey {
    mode: Mode,
    table: Vec<u32>,
    unit: ThresholdUnit,
    palette: Palette,
}

/// Built [`ColorRangeSetting`] for the active mode. Rebuilt only when marked
/// dirty or when the table, palette or tile size it was built from changed.
#[derive(Debug, Default)]
pub struct ColorRangeCache {
    key: Option<ColorRangeKey>,
    setting: Option<ColorRangeSetting>,
    version: u64,
    needs_sync: bool,
}

impl ColorRangeCache {
    pub fn mark_dirty(&mut self) {
        self.needs_sync = true;
    }

    pub fn needs_sync(&self) -> bool {
        self.needs_sync || self.setting.is_none()
    }

    /// Bumped on every rebuild; GPU copies compare against it.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn current(&self) -> Option<&ColorRangeSetting> {
        self.setting.as_ref()
    }

    pub fn sync(&mut self, mode: Mode, config: &ProfilerConfig, grid: &TileGrid) -> ProfilerResult<&ColorRangeSetting> {
        let key = ColorRangeKey {
            mode,
            table: config.thresholds.for_mode(mode).to_vec(),
            unit: ThresholdUnit::for_mode(mode, grid),
            palette: config.palette.clone(),
        };
        if self.needs_sync || self.key.as_ref() != Some(&key) || self.setting.is_none() {
            let setting = ColorRangeSetting::from_table(&key.table, key.unit, &key.palette)?;
            log::debug!("rebuilt {:?} colour table ({} levels)", mode, setting.len());
            self.setting = Some(setting);
            self.key = Some(key);
            self.version += 1;
            self.needs_sync = false;
        }
        self.setting.as_ref().ok_or(ProfilerError::MissingResource("color_ranges"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GREEN: Color = Color::rgb(0.0, 1.0, 0.0);
    const CYAN: Color = Color::rgb(0.0, 1.0, 1.0);
    const YELLOW: Color = Color::rgb(1.0, 1.0, 0.0);

    fn three_levels() -> ColorRangeSetting {
        ColorRangeSetting::new(vec![
            ColorRange { threshold: 1000.0, color: GREEN },
            ColorRange { threshold: 2000.0, color: CYAN },
            ColorRange { threshold: 3000.0, color: YELLOW },
        ])
        .unwrap()
    }

    #[test]
    fn value_between_levels_takes_lower_bucket() {
        assert_eq!(three_levels().classify(2500.0), (1, CYAN));
    }

    #[test]
    fn nothing_exceeded_is_white() {
        let table = three_levels();
        assert_eq!(table.classify(0.0), (0, Color::WHITE));
        assert_eq!(table.classify(1000.0), (0, Color::WHITE));
        assert_eq!(table.classify(1000.5), (0, GREEN));
        assert_eq!(table.classify(f32::MAX), (2, YELLOW));
    }

    #[test]
    fn classification_is_monotonic() {
        let table = ColorRangeSetting::from_table(
            &[1000, 2000, 3000, 4000, 5000, 8000, 10000, 12000],
            ThresholdUnit::Raw,
            &Palette::default(),
        )
        .unwrap();
        let mut prev = 0;
        for v in (0..14000).step_by(37) {
            let (level, _) = table.classify(v as f32);
            assert!(level >= prev, "level dropped at {v}");
            prev = level;
        }
    }

    #[test]
    fn constructor_sorts_and_rejects_short_tables() {
        let table = ColorRangeSetting::new(vec![
            ColorRange { threshold: 3.0, color: YELLOW },
            ColorRange { threshold: 1.0, color: GREEN },
        ])
        .unwrap();
        assert_eq!(table.first_threshold(), 1.0);
        assert!(matches!(
            ColorRangeSetting::new(vec![ColorRange { threshold: 1.0, color: GREEN }]),
            Err(ProfilerError::ThresholdTableTooShort(1))
        ));
    }

    #[test]
    fn tile_unit_scales_by_tile_area() {
        let unit = ThresholdUnit::TileArea { tile_width: 50, tile_height: 50 };
        let table = ColorRangeSetting::from_table(&[1000, 2000], unit, &Palette::default()).unwrap();
        assert_eq!(table.ranges()[0].threshold, 250.0);
        assert_eq!(table.ranges()[1].threshold, 500.0);
    }

    #[test]
    fn inactive_palette_entry_keeps_level() {
        let mut palette = Palette::default();
        palette.set_active(1, false);
        assert!(!palette.is_active(1));
        let table = ColorRangeSetting::from_table(&[10, 20, 30], ThresholdUnit::Raw, &palette).unwrap();
        let (level, color) = table.classify(25.0);
        assert_eq!(level, 1);
        assert_eq!(color.a, 0.0);
    }

    #[test]
    fn cache_rebuilds_only_on_change() {
        let mut config = ProfilerConfig::default();
        let grid = TileGrid::new(1920, 1080, 100, 100);
        let mut cache = ColorRangeCache::default();
        assert!(cache.needs_sync());
        cache.sync(Mode::OnlyTile, &config, &grid).unwrap();
        let v = cache.version();
        cache.sync(Mode::OnlyTile, &config, &grid).unwrap();
        assert_eq!(cache.version(), v);

        let smaller = TileGrid::new(1920, 1080, 50, 50);
        cache.sync(Mode::OnlyTile, &config, &smaller).unwrap();
        assert_eq!(cache.version(), v + 1);

        config.palette.set_active(0, false);
        cache.sync(Mode::OnlyTile, &config, &smaller).unwrap();
        assert_eq!(cache.version(), v + 2);

        cache.mark_dirty();
        cache.sync(Mode::OnlyTile, &config, &smaller).unwrap();
        assert_eq!(cache.version(), v + 3);
    }
}

//! Profiler configuration: mode, tiles, threshold tables, palette, heat map, raster state.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::classifier::{Color, Palette};
use crate::error::{ProfilerError, ProfilerResult};
use crate::tiles::{clamp_tile_size, DEFAULT_TILE_SIZE, MAX_TILE_SIZE, MIN_TILE_SIZE};

/// Largest heat map gather half-width; the merge pass visits `(2 * range / step + 1)^2` pixels.
pub const MAX_HEAT_MAP_RANGE: u32 = 16;

/// Profiling strategy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    /// Profiling off; the overlay passes the scene through.
    #[default]
    None,
    OnlyTile,
    OnlyMesh,
    TileBasedMesh,
    MeshHeatMap,
    Overdraw,
}

impl Mode {
    pub const ALL: [Mode; 6] = [
        Mode::None,
        Mode::OnlyTile,
        Mode::OnlyMesh,
        Mode::TileBasedMesh,
        Mode::MeshHeatMap,
        Mode::Overdraw,
    ];

    /// Modes that produce CPU-side samples on request.
    pub fn has_samples(self) -> bool {
        matches!(self, Mode::OnlyTile | Mode::OnlyMesh | Mode::TileBasedMesh)
    }

    pub fn uses_tiles(self) -> bool {
        matches!(self, Mode::OnlyTile | Mode::TileBasedMesh)
    }
}

/// How often `log_for_display` fires.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateType {
    #[default]
    Once,
    /// Re-arm the display request every frame.
    EveryFrame,
}

/// Face culling used by the raster stages.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CullMode {
    #[default]
    Back,
    Front,
    None,
}

impl CullMode {
    pub fn to_wgpu(self) -> Option<wgpu::Face> {
        match self {
            CullMode::Back => Some(wgpu::Face::Back),
            CullMode::Front => Some(wgpu::Face::Front),
            CullMode::None => None,
        }
    }
}

/// Threshold table preset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThresholdPreset {
    Simple,
    #[default]
    Detail,
}

/// Integer threshold tables, one per mode. Units differ per mode:
/// tile modes count vertices per 10,000 pixels, mesh modes are scaled by 0.0001
/// (vertices per pixel), overdraw counts raw redraws.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdTables {
    pub only_tile: Vec<u32>,
    pub only_mesh: Vec<u32>,
    pub tile_based_mesh: Vec<u32>,
    pub mesh_heat_map: Vec<u32>,
    pub overdraw: Vec<u32>,
}

impl ThresholdTables {
    pub fn preset(preset: ThresholdPreset) -> Self {
        const DETAIL_DENSITY: [u32; 8] = [1000, 2000, 3000, 4000, 5000, 8000, 10000, 12000];
        match preset {
            ThresholdPreset::Simple => Self {
                only_tile: vec![0, 5000, 10000],
                only_mesh: vec![0, 5000, 10000],
                tile_based_mesh: vec![1, 5000, 10000],
                mesh_heat_map: vec![0, 2000, 4000],
                overdraw: vec![0, 2, 5],
            },
            ThresholdPreset::Detail => Self {
                only_tile: DETAIL_DENSITY.to_vec(),
                only_mesh: DETAIL_DENSITY.to_vec(),
                tile_based_mesh: DETAIL_DENSITY.to_vec(),
                mesh_heat_map: (1..=8).map(|i| i * 500).collect(),
                overdraw: (1..=8).collect(),
            },
        }
    }

    /// Table for `mode`; empty for `Mode::None`.
    pub fn for_mode(&self, mode: Mode) -> &[u32] {
        match mode {
            Mode::None => &[],
            Mode::OnlyTile => &self.only_tile,
            Mode::OnlyMesh => &self.only_mesh,
            Mode::TileBasedMesh => &self.tile_based_mesh,
            Mode::MeshHeatMap => &self.mesh_heat_map,
            Mode::Overdraw => &self.overdraw,
        }
    }

    pub fn for_mode_mut(&mut self, mode: Mode) -> Option<&mut Vec<u32>> {
        match mode {
            Mode::None => None,
            Mode::OnlyTile => Some(&mut self.only_tile),
            Mode::OnlyMesh => Some(&mut self.only_mesh),
            Mode::TileBasedMesh => Some(&mut self.tile_based_mesh),
            Mode::MeshHeatMap => Some(&mut self.mesh_heat_map),
            Mode::Overdraw => Some(&mut self.overdraw),
        }
    }
}

impl Default for ThresholdTables {
    fn default() -> Self {
        Self::preset(ThresholdPreset::default())
    }
}

/// Heat map window and colour ramp.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatMapConfig {
    /// Half-width in pixels of the gather window.
    pub range: u32,
    /// Sampling step inside the window.
    pub step: u32,
    /// Density (vertices per pixel) mapped to the start of the ramp.
    pub ramp_min: f32,
    /// Density mapped to the end of the ramp.
    pub ramp_max: f32,
    /// Ramp control points, evenly spaced; baked into a 256x1 texture.
    pub ramp: Vec<Color>,
}

impl Default for HeatMapConfig {
    fn default() -> Self {
        Self {
            range: 2,
            step: 1,
            ramp_min: 0.0,
            ramp_max: 0.4,
            ramp: vec![
                Color::rgb(0.0, 0.0, 1.0),
                Color::rgb(0.0, 1.0, 1.0),
                Color::rgb(0.0, 1.0, 0.0),
                Color::rgb(1.0, 1.0, 0.0),
                Color::rgb(1.0, 0.0, 0.0),
            ],
        }
    }
}

/// Vertex profiler configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    /// Tile width in pixels, clamped to [32, 128].
    pub tile_width: u32,
    /// Tile height in pixels, clamped to [32, 128].
    pub tile_height: u32,
    pub thresholds: ThresholdTables,
    pub palette: Palette,
    pub heat_map: HeatMapConfig,
    pub cull_mode: CullMode,
    pub update_type: UpdateType,
    /// Opacity of the profiler layer in the composite.
    pub overlay_opacity: f32,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            tile_width: DEFAULT_TILE_SIZE,
            tile_height: DEFAULT_TILE_SIZE,
            thresholds: ThresholdTables::default(),
            palette: Palette::default(),
            heat_map: HeatMapConfig::default(),
            cull_mode: CullMode::default(),
            update_type: UpdateType::default(),
            overlay_opacity: 0.6,
        }
    }
}

impl ProfilerConfig {
    pub fn from_toml_str(source: &str) -> ProfilerResult<Self> {
        let mut config: Self = toml::from_str(source).map_err(|e| ProfilerError::InvalidConfig {
            field: "toml",
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> ProfilerResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ProfilerError::ConfigIo {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Replace every threshold table with `preset`.
    pub fn apply_preset(&mut self, preset: ThresholdPreset) {
        self.thresholds = ThresholdTables::preset(preset);
    }

    /// Clamp tile sizes and opacity; reject short tables and a degenerate heat map.
    pub fn validate(&mut self) -> ProfilerResult<()> {
        let (w, h) = (clamp_tile_size(self.tile_width), clamp_tile_size(self.tile_height));
        if (w, h) != (self.tile_width, self.tile_height) {
            log::debug!(
                "tile size {}x{} clamped to {}x{} (allowed {}..={})",
                self.tile_width,
                self.tile_height,
                w,
                h,
                MIN_TILE_SIZE,
                MAX_TILE_SIZE
            );
        }
        self.tile_width = w;
        self.tile_height = h;
        self.overlay_opacity = self.overlay_opacity.clamp(0.0, 1.0);

        let tables = [
            ("thresholds.only_tile", &self.thresholds.only_tile),
            ("thresholds.only_mesh", &self.thresholds.only_mesh),
            ("thresholds.tile_based_mesh", &self.thresholds.tile_based_mesh),
            ("thresholds.mesh_heat_map", &self.thresholds.mesh_heat_map),
            ("thresholds.overdraw", &self.thresholds.overdraw),
        ];
        for (field, table) in tables {
            if table.len() < 2 {
                return Err(ProfilerError::InvalidConfig {
                    field,
                    reason: format!("needs at least 2 entries, got {}", table.len()),
                });
            }
        }

        if self.heat_map.range > MAX_HEAT_MAP_RANGE {
            return Err(ProfilerError::InvalidConfig {
                field: "heat_map.range",
                reason: format!("must be at most {}, got {}", MAX_HEAT_MAP_RANGE, self.heat_map.range),
            });
        }
        if self.heat_map.step == 0 || self.heat_map.step > self.heat_map.range.max(1) {
            return Err(ProfilerError::InvalidConfig {
                field: "heat_map.step",
                reason: format!("must be in 1..={}, got {}", self.heat_map.range.max(1), self.heat_map.step),
            });
        }
        if !(self.heat_map.ramp_max > self.heat_map.ramp_min) {
            return Err(ProfilerError::InvalidConfig {
                field: "heat_map.ramp_max",
                reason: format!(
                    "must exceed ramp_min ({} <= {})",
                    self.heat_map.ramp_max, self.heat_map.ramp_min
                ),
            });
        }
        if self.heat_map.ramp.is_empty() {
            return Err(ProfilerError::InvalidConfig {
                field: "heat_map.ramp",
                reason: "needs at least 1 colour".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let mut config = ProfilerConfig::default();
        config.validate().unwrap();
        assert_eq!(config, ProfilerConfig::default());
    }

    #[test]
    fn validate_clamps_tile_sizes() {
        let mut config = ProfilerConfig { tile_width: 4, tile_height: 1000, ..Default::default() };
        config.validate().unwrap();
        assert_eq!(config.tile_width, 32);
        assert_eq!(config.tile_height, 128);
    }

    #[test]
    fn validate_rejects_short_table() {
        let mut config = ProfilerConfig::default();
        config.thresholds.overdraw = vec![3];
        match config.validate() {
            Err(ProfilerError::InvalidConfig { field, .. }) => assert_eq!(field, "thresholds.overdraw"),
            other => panic!("expected InvalidConfig, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_large_heat_map_range() {
        let mut config = ProfilerConfig::default();
        config.heat_map.range = 500;
        match config.validate() {
            Err(ProfilerError::InvalidConfig { field, .. }) => assert_eq!(field, "heat_map.range"),
            other => panic!("expected InvalidConfig, got {other:?}"),
        }
        config.heat_map.range = MAX_HEAT_MAP_RANGE;
        config.heat_map.step = 4;
        config.validate().unwrap();
    }

    #[test]
    fn validate_rejects_step_wider_than_window() {
        let mut config = ProfilerConfig::default();
        config.heat_map.step = config.heat_map.range + 1;
        assert!(matches!(
            config.validate(),
            Err(ProfilerError::InvalidConfig { field: "heat_map.step", .. })
        ));
        config.heat_map.step = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_partial_toml() {
        let config = ProfilerConfig::from_toml_str(
            r#"
            tile_width = 64
            update_type = "EveryFrame"
            cull_mode = "None"

            [thresholds]
            only_tile = [10, 20, 30]
            "#,
        )
        .unwrap();
        assert_eq!(config.tile_width, 64);
        assert_eq!(config.tile_height, DEFAULT_TILE_SIZE);
        assert_eq!(config.update_type, UpdateType::EveryFrame);
        assert_eq!(config.cull_mode, CullMode::None);
        assert_eq!(config.thresholds.only_tile, vec![10, 20, 30]);
        assert_eq!(config.thresholds.overdraw, (1..=8).collect::<Vec<u32>>());
    }

    #[test]
    fn unparsable_toml_is_invalid_config() {
        let err = ProfilerConfig::from_toml_str("tile_width = \"wide\"").unwrap_err();
        assert!(matches!(err, ProfilerError::InvalidConfig { field: "toml", .. }));
    }

    #[test]
    fn presets_have_expected_shapes() {
        let simple = ThresholdTables::preset(ThresholdPreset::Simple);
        assert_eq!(simple.tile_based_mesh, vec![1, 5000, 10000]);
        let detail = ThresholdTables::preset(ThresholdPreset::Detail);
        assert_eq!(detail.mesh_heat_map, vec![500, 1000, 1500, 2000, 2500, 3000, 3500, 4000]);
        assert_eq!(detail.for_mode(Mode::OnlyMesh).len(), 8);
        assert!(detail.for_mode(Mode::None).is_empty());
    }
}

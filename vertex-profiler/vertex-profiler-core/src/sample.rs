//! Profiler samples: CPU-side assembly from read-back counters, classification and ranking.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::accumulator::CounterKind;
use crate::classifier::{Color, ColorRangeSetting};
use crate::collector::RecordSummary;
use crate::config::Mode;
use crate::culler::VisibilitySet;
use crate::error::{ProfilerError, ProfilerResult};
use crate::tiles::TileGrid;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TileSample {
    pub tile_index: u32,
    pub vertex_count: u32,
    /// Vertices per 10,000 pixels (OnlyTile) or vertices per covered pixel of
    /// one mesh inside the tile (TileBasedMesh children).
    pub density: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeshSample {
    pub resource_name: String,
    pub vertex_count: u32,
    pub mesh_original_vertex_count: u32,
    pub pixel_count: u32,
    /// Vertices per visible pixel; `f32::MAX` when no pixel survived the depth test.
    pub density: f32,
    pub hierarchy_path: String,
    /// `"{original}({percent}%)"` for TileBasedMesh, empty otherwise.
    pub vertex_info: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum SampleKind {
    Tile(TileSample),
    Mesh(MeshSample),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProfilerSample {
    /// Tile index or renderer id.
    pub index: u32,
    pub kind: SampleKind,
    pub threshold_level: usize,
    pub color: Color,
}

impl ProfilerSample {
    pub fn density(&self) -> f32 {
        match &self.kind {
            SampleKind::Tile(t) => t.density,
            SampleKind::Mesh(m) => m.density,
        }
    }
}

/// One mesh and the hot tiles it contributes to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchSample {
    pub root: ProfilerSample,
    pub tiles: Vec<ProfilerSample>,
    pub max_density: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SampleSet {
    Samples(Vec<ProfilerSample>),
    Batches(Vec<BatchSample>),
}

impl SampleSet {
    pub fn len(&self) -> usize {
        match self {
            SampleSet::Samples(s) => s.len(),
            SampleSet::Batches(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Descending density, ties by ascending index.
pub fn density_order(a: &ProfilerSample, b: &ProfilerSample) -> Ordering {
    b.density().total_cmp(&a.density()).then(a.index.cmp(&b.index))
}

pub fn batch_order(a: &BatchSample, b: &BatchSample) -> Ordering {
    b.max_density.total_cmp(&a.max_density).then(a.root.index.cmp(&b.root.index))
}

/// Stable sort with a caller-chosen comparator (reverse it for ascending views).
pub fn sort_samples_by<T>(samples: &mut [T], compare: impl FnMut(&T, &T) -> Ordering) {
    samples.sort_by(compare);
}

pub fn mesh_density(vertex_count: u32, pixel_count: u32) -> f32 {
    if pixel_count == 0 {
        f32::MAX
    } else {
        vertex_count as f32 / pixel_count as f32
    }
}

pub fn format_vertex_info(original: u32, within: u32) -> String {
    let percent = if original == 0 { 0.0 } else { within as f32 / original as f32 * 100.0 };
    format!("{}({:.2}%)", original, percent)
}

/// Everything sample assembly needs, captured when a request is issued so a
/// later completion never reads live session state.
#[derive(Clone, Debug)]
pub struct AssemblyContext {
    pub mode: Mode,
    pub grid: TileGrid,
    pub records: Vec<RecordSummary>,
    pub visibility: VisibilitySet,
    pub color_ranges: ColorRangeSetting,
    pub hot_tile_threshold: f32,
}

impl AssemblyContext {
    /// Counter buffers this mode reads back.
    pub fn expected_counters(&self) -> &'static [CounterKind] {
        match self.mode {
            Mode::OnlyTile => &[CounterKind::TileVertices],
            Mode::OnlyMesh => &[CounterKind::RendererPixels],
            Mode::TileBasedMesh => &[
                CounterKind::TileVertices,
                CounterKind::TileRendererVertices,
                CounterKind::TileRendererPixels,
            ],
            Mode::None | Mode::MeshHeatMap | Mode::Overdraw => &[],
        }
    }

    /// Raw per-tile counts: classified against the tile-area-scaled table, reported per 10,000 pixels.
    pub fn assemble_tiles(&self, tile_counts: &[u32]) -> Vec<ProfilerSample> {
        let mut samples: Vec<ProfilerSample> = tile_counts
            .iter()
            .take(self.grid.tile_count() as usize)
            .enumerate()
            .map(|(i, &count)| {
                let (threshold_level, color) = self.color_ranges.classify(count as f32);
                ProfilerSample {
                    index: i as u32,
                    kind: SampleKind::Tile(TileSample {
                        tile_index: i as u32,
                        vertex_count: count,
                        density: self.grid.density_per_area(count),
                    }),
                    threshold_level,
                    color,
                }
            })
            .collect();
        sort_samples_by(&mut samples, density_order);
        samples
    }

    /// One sample per visible record, occluded ones included.
    pub fn assemble_meshes(&self, pixel_counts: &[u32]) -> Vec<ProfilerSample> {
        let mut samples: Vec<ProfilerSample> = self
            .records
            .iter()
            .filter(|r| self.visibility.is_visible(r.id as usize))
            .map(|r| {
                let pixel_count = pixel_counts.get(r.id as usize).copied().unwrap_or(0);
                let density = mesh_density(r.vertex_count, pixel_count);
                let (threshold_level, color) = self.color_ranges.classify(density);
                ProfilerSample {
                    index: r.id,
                    kind: SampleKind::Mesh(MeshSample {
                        resource_name: r.resource_name.clone(),
                        vertex_count: r.vertex_count,
                        mesh_original_vertex_count: r.vertex_count,
                        pixel_count,
                        density,
                        hierarchy_path: r.hierarchy_path.clone(),
                        vertex_info: String::new(),
                    }),
                    threshold_level,
                    color,
                }
            })
            .collect();
        sort_samples_by(&mut samples, density_order);
        samples
    }

    /// Per mesh: the hot tiles it has vertices in, rooted by its totals over those tiles.
    pub fn assemble_batches(
        &self,
        tile_counts: &[u32],
        tile_mesh_vertices: &[u32],
        tile_mesh_pixels: &[u32],
    ) -> Vec<BatchSample> {
        let renderers = self.records.len();
        let mut per_mesh: BTreeMap<usize, Vec<(u32, u32, u32)>> = BTreeMap::new();
        for (tile, &count) in tile_counts.iter().take(self.grid.tile_count() as usize).enumerate() {
            if count as f32 <= self.hot_tile_threshold {
                continue;
            }
            for id in 0..renderers {
                let slot = tile * renderers + id;
                let vertices = tile_mesh_vertices.get(slot).copied().unwrap_or(0);
                if vertices == 0 {
                    continue;
                }
                let pixels = tile_mesh_pixels.get(slot).copied().unwrap_or(0);
                per_mesh.entry(id).or_default().push((tile as u32, vertices, pixels));
            }
        }

        let mut batches: Vec<BatchSample> = per_mesh
            .into_iter()
            .filter_map(|(id, hits)| {
                let record = self.records.get(id)?;
                let mut tiles: Vec<ProfilerSample> = hits
                    .iter()
                    .map(|&(tile, vertices, pixels)| {
                        let density = mesh_density(vertices, pixels);
                        let (threshold_level, color) = self.color_ranges.classify(density);
                        ProfilerSample {
                            index: tile,
                            kind: SampleKind::Tile(TileSample { tile_index: tile, vertex_count: vertices, density }),
                            threshold_level,
                            color,
                        }
                    })
                    .collect();
                sort_samples_by(&mut tiles, density_order);
                let max_density = tiles.first().map(ProfilerSample::density).unwrap_or(0.0);

                let vertex_count: u32 = hits.iter().map(|h| h.1).sum();
                let pixel_count: u32 = hits.iter().map(|h| h.2).sum();
                let density = mesh_density(vertex_count, pixel_count);
                let (threshold_level, color) = self.color_ranges.classify(density);
                let root = ProfilerSample {
                    index: record.id,
                    kind: SampleKind::Mesh(MeshSample {
                        resource_name: record.resource_name.clone(),
                        vertex_count,
                        mesh_original_vertex_count: record.vertex_count,
                        pixel_count,
                        density,
                        hierarchy_path: record.hierarchy_path.clone(),
                        vertex_info: format_vertex_info(record.vertex_count, vertex_count),
                    }),
                    threshold_level,
                    color,
                };
                Some(BatchSample { root, tiles, max_density })
            })
            .collect();
        sort_samples_by(&mut batches, batch_order);
        batches
    }

    pub fn assemble(&self, counters: &HashMap<CounterKind, Vec<u32>>) -> ProfilerResult<SampleSet> {
        let get = |kind: CounterKind| {
            counters.get(&kind).map(Vec::as_slice).ok_or(ProfilerError::MissingResource(kind.label()))
        };
        Ok(match self.mode {
            Mode::OnlyTile => SampleSet::Samples(self.assemble_tiles(get(CounterKind::TileVertices)?)),
            Mode::OnlyMesh => SampleSet::Samples(self.assemble_meshes(get(CounterKind::RendererPixels)?)),
            Mode::TileBasedMesh => SampleSet::Batches(self.assemble_batches(
                get(CounterKind::TileVertices)?,
                get(CounterKind::TileRendererVertices)?,
                get(CounterKind::TileRendererPixels)?,
            )),
            Mode::None | Mode::MeshHeatMap | Mode::Overdraw => SampleSet::Samples(Vec::new()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{Palette, ThresholdUnit};

    fn record(id: u32, vertex_count: u32) -> RecordSummary {
        RecordSummary {
            id,
            resource_name: format!("mesh{id}"),
            hierarchy_path: format!("Root/Obj{id}"),
            vertex_count,
        }
    }

    fn context(mode: Mode, records: Vec<RecordSummary>, table: &[u32]) -> AssemblyContext {
        let grid = TileGrid::new(400, 200, 100, 100);
        let unit = ThresholdUnit::for_mode(mode, &grid);
        AssemblyContext {
            mode,
            grid,
            visibility: VisibilitySet::all_visible(records.len()),
            records,
            color_ranges: ColorRangeSetting::from_table(table, unit, &Palette::default()).unwrap(),
            hot_tile_threshold: grid.threshold_to_tile_count(table[0] as f32),
        }
    }

    #[test]
    fn occluded_mesh_gets_sentinel_density_and_is_kept() {
        let ctx = context(Mode::OnlyMesh, vec![record(0, 5000), record(1, 100)], &[1000, 2000, 3000]);
        let samples = ctx.assemble_meshes(&[0, 50]);
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].index, 0);
        assert_eq!(samples[0].density(), f32::MAX);
        assert_eq!(samples[0].threshold_level, 2);
        match &samples[1].kind {
            SampleKind::Mesh(m) => {
                assert_eq!(m.pixel_count, 50);
                assert_eq!(m.density, 2.0);
            }
            other => panic!("expected mesh sample, got {other:?}"),
        }
    }

    #[test]
    fn culled_records_are_not_reported() {
        let mut ctx = context(Mode::OnlyMesh, vec![record(0, 10), record(1, 10)], &[0, 1]);
        ctx.visibility = [false, true].into_iter().collect();
        let samples = ctx.assemble_meshes(&[4, 5]);
        assert_eq!(samples.iter().map(|s| s.index).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn tiles_sorted_descending_with_index_tiebreak() {
        let ctx = context(Mode::OnlyTile, vec![], &[1000, 2000, 3000]);
        let samples = ctx.assemble_tiles(&[10, 3000, 10, 2500, 0, 3000, 1, 1]);
        let order: Vec<u32> = samples.iter().map(|s| s.index).collect();
        assert_eq!(order, vec![1, 5, 3, 0, 2, 6, 7, 4]);
        for pair in samples.windows(2) {
            assert!(pair[0].density() >= pair[1].density());
        }
        // 2500 raw in a 100x100 tile is 2500 per 10k pixels: level 1
        assert_eq!(samples[2].threshold_level, 1);
    }

    #[test]
    fn reassembly_is_idempotent() {
        let ctx = context(Mode::OnlyTile, vec![], &[1000, 2000]);
        let counts = [5, 1500, 1500, 2500, 0, 7, 9, 2001];
        assert_eq!(ctx.assemble_tiles(&counts), ctx.assemble_tiles(&counts));
    }

    #[test]
    fn vertex_info_formats_percentage() {
        assert_eq!(format_vertex_info(5000, 1250), "5000(25.00%)");
        assert_eq!(format_vertex_info(3, 1), "3(33.33%)");
        assert_eq!(format_vertex_info(0, 0), "0(0.00%)");
    }

    #[test]
    fn batches_group_hot_tiles_per_mesh() {
        // 4x2 tiles, two renderers; hot cutoff is 1000 raw vertices
        let ctx = context(Mode::TileBasedMesh, vec![record(0, 4000), record(1, 900)], &[1000, 5000, 10000]);
        let mut tile_counts = vec![0u32; 8];
        let mut verts = vec![0u32; 16];
        let mut pixels = vec![0u32; 16];
        tile_counts[2] = 1500;
        verts[2 * 2] = 1200;
        pixels[2 * 2] = 600;
        verts[2 * 2 + 1] = 300;
        pixels[2 * 2 + 1] = 10;
        tile_counts[5] = 1001;
        verts[5 * 2] = 1000;
        pixels[5 * 2] = 1000;
        // below the cutoff: ignored
        tile_counts[6] = 900;
        verts[6 * 2 + 1] = 900;

        let batches = ctx.assemble_batches(&tile_counts, &verts, &pixels);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].root.index, 1);
        assert_eq!(batches[0].max_density, 30.0);
        assert_eq!(batches[0].tiles.len(), 1);

        let mesh0 = &batches[1];
        assert_eq!(mesh0.tiles.iter().map(|t| t.index).collect::<Vec<_>>(), vec![2, 5]);
        assert_eq!(mesh0.max_density, 2.0);
        match &mesh0.root.kind {
            SampleKind::Mesh(m) => {
                assert_eq!(m.vertex_count, 2200);
                assert_eq!(m.mesh_original_vertex_count, 4000);
                assert_eq!(m.pixel_count, 1600);
                assert_eq!(m.vertex_info, "4000(55.00%)");
            }
            other => panic!("expected mesh root, got {other:?}"),
        }
    }

    #[test]
    fn assemble_requires_expected_counters() {
        let ctx = context(Mode::TileBasedMesh, vec![record(0, 1)], &[1, 2]);
        let mut counters = HashMap::new();
        counters.insert(CounterKind::TileVertices, vec![0; 8]);
        assert!(matches!(ctx.assemble(&counters), Err(ProfilerError::MissingResource(_))));
        counters.insert(CounterKind::TileRendererVertices, vec![0; 8]);
        counters.insert(CounterKind::TileRendererPixels, vec![0; 8]);
        assert_eq!(ctx.assemble(&counters).unwrap(), SampleSet::Batches(Vec::new()));
        assert_eq!(ctx.expected_counters().len(), 3);
    }

    #[test]
    fn custom_comparator_reverses_order() {
        let ctx = context(Mode::OnlyTile, vec![], &[1, 2]);
        let mut samples = ctx.assemble_tiles(&[3, 1, 2]);
        sort_samples_by(&mut samples, |a, b| density_order(b, a));
        assert_eq!(samples.iter().map(|s| s.index).collect::<Vec<_>>(), vec![1, 2, 0]);
    }
}

//! Screen tile grid: tile size clamping, grid dimensions and tile index math.

pub const MIN_TILE_SIZE: u32 = 32;
pub const MAX_TILE_SIZE: u32 = 128;
pub const DEFAULT_TILE_SIZE: u32 = 100;

/// Densities of tile modes are reported per this many pixels of tile area.
pub const DENSITY_AREA: f32 = 10_000.0;

pub fn clamp_tile_size(size: u32) -> u32 {
    size.clamp(MIN_TILE_SIZE, MAX_TILE_SIZE)
}

/// Pixel rectangle of one tile, origin top-left.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Tile partition of the current camera resolution. Recomputed every frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileGrid {
    pub tile_width: u32,
    pub tile_height: u32,
    pub num_x: u32,
    pub num_y: u32,
    pub screen_width: u32,
    pub screen_height: u32,
}

impl TileGrid {
    pub fn new(screen_width: u32, screen_height: u32, tile_width: u32, tile_height: u32) -> Self {
        let tile_width = clamp_tile_size(tile_width);
        let tile_height = clamp_tile_size(tile_height);
        Self {
            tile_width,
            tile_height,
            num_x: screen_width.div_ceil(tile_width).max(1),
            num_y: screen_height.div_ceil(tile_height).max(1),
            screen_width,
            screen_height,
        }
    }

    pub fn tile_count(&self) -> u32 {
        self.num_x * self.num_y
    }

    /// Nominal tile area in pixels (edge tiles are not shrunk).
    pub fn tile_area(&self) -> u32 {
        self.tile_width * self.tile_height
    }

    /// Tile containing pixel (x, y). Pixels past the right/bottom edge land in the last tile.
    pub fn tile_index(&self, x: u32, y: u32) -> u32 {
        let tx = (x / self.tile_width).min(self.num_x - 1);
        let ty = (y / self.tile_height).min(self.num_y - 1);
        ty * self.num_x + tx
    }

    pub fn tile_coords(&self, index: u32) -> (u32, u32) {
        (index % self.num_x, index / self.num_x)
    }

    /// Screen rectangle covered by a tile, clipped to the screen.
    pub fn tile_rect(&self, index: u32) -> TileRect {
        let (tx, ty) = self.tile_coords(index);
        let x = tx * self.tile_width;
        let y = ty * self.tile_height;
        TileRect {
            x,
            y,
            width: self.tile_width.min(self.screen_width.saturating_sub(x)),
            height: self.tile_height.min(self.screen_height.saturating_sub(y)),
        }
    }

    /// Raw per-tile vertex count rescaled to vertices per 10,000 pixels of tile area.
    pub fn density_per_area(&self, vertex_count: u32) -> f32 {
        vertex_count as f32 / self.tile_area() as f32 * DENSITY_AREA
    }

    /// Converts a per-10,000-pixel threshold into a raw per-tile vertex count.
    pub fn threshold_to_tile_count(&self, threshold: f32) -> f32 {
        threshold * self.tile_area() as f32 / DENSITY_AREA
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_hd_with_100px_tiles() {
        let grid = TileGrid::new(1920, 1080, 100, 100);
        assert_eq!(grid.num_x, 20);
        assert_eq!(grid.num_y, 11);
        assert_eq!(grid.tile_count(), 220);
    }

    #[test]
    fn tile_size_is_clamped() {
        let grid = TileGrid::new(1280, 720, 8, 500);
        assert_eq!(grid.tile_width, MIN_TILE_SIZE);
        assert_eq!(grid.tile_height, MAX_TILE_SIZE);
        assert_eq!(grid.num_x, 40);
        assert_eq!(grid.num_y, 6);
    }

    #[test]
    fn tile_index_round_trip() {
        let grid = TileGrid::new(1000, 700, 64, 48);
        for &(x, y) in &[(0, 0), (63, 47), (64, 48), (999, 699), (500, 333)] {
            let index = grid.tile_index(x, y);
            assert_eq!(index, (y / 48) * grid.num_x + (x / 64));
            let rect = grid.tile_rect(index);
            assert!(x >= rect.x && x < rect.x + rect.width);
            assert!(y >= rect.y && y < rect.y + rect.height);
        }
    }

    #[test]
    fn edge_tile_rect_is_clipped() {
        let grid = TileGrid::new(1920, 1080, 100, 100);
        let last = grid.tile_rect(grid.tile_count() - 1);
        assert_eq!(last, TileRect { x: 1900, y: 1000, width: 20, height: 80 });
    }

    #[test]
    fn density_rescales_to_ten_thousand_pixels() {
        let grid = TileGrid::new(1920, 1080, 100, 100);
        assert_eq!(grid.density_per_area(2500), 2500.0);
        let grid = TileGrid::new(1920, 1080, 50, 50);
        assert_eq!(grid.density_per_area(250), 1000.0);
        assert_eq!(grid.threshold_to_tile_count(1000.0), 250.0);
    }
}

use glam::{IVec2, UVec2};

use crate::triangle::RasterTriangle;

/// Stable handle to a raster triangle: which clipping bucket produced it and where it sits in
/// that bucket's triangle list. Valid until the buckets are cleared for the next frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TriangleRef {
    pub bucket: u32,
    pub index: u32,
}

/// How the image is cut into tiles. Edge tiles are smaller when the resolution is not a
/// multiple of the tile size.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TileLayout {
    pub width: u32,
    pub height: u32,
    pub tile_size: u32,
    pub tiles_x: u32,
    pub tiles_y: u32,
}

impl TileLayout {
    pub fn new(width: u32, height: u32, tile_size: u32) -> Self {
        let tile_size = tile_size.max(1);
        Self {
            width,
            height,
            tile_size,
            tiles_x: width.div_ceil(tile_size),
            tiles_y: height.div_ceil(tile_size),
        }
    }

    pub fn tile_count(&self) -> usize {
        (self.tiles_x * self.tiles_y) as usize
    }

    // Row-major: all tiles of a tile row are adjacent
    #[inline]
    pub fn tile_index(&self, tile_x: u32, tile_y: u32) -> usize {
        (tile_y * self.tiles_x + tile_x) as usize
    }

    /// Pixel bounds of a tile, max exclusive and clamped to the image.
    pub fn tile_bounds(&self, tile_x: u32, tile_y: u32) -> (IVec2, IVec2) {
        let min = (UVec2::new(tile_x, tile_y) * self.tile_size).as_ivec2();
        let max = IVec2::new(
            ((tile_x + 1) * self.tile_size).min(self.width) as i32,
            ((tile_y + 1) * self.tile_size).min(self.height) as i32,
        );
        (min, max)
    }

    /// Inclusive range of tiles touched by a non-empty pixel bbox (max exclusive).
    pub fn tiles_overlapping(&self, bbox_min: IVec2, bbox_max: IVec2) -> (IVec2, IVec2) {
        let size = self.tile_size as i32;
        let last = IVec2::new(self.tiles_x as i32 - 1, self.tiles_y as i32 - 1);
        let first = (bbox_min / size).clamp(IVec2::ZERO, last);
        let end = ((bbox_max - 1) / size).clamp(IVec2::ZERO, last);
        (first, end)
    }
}

/// A screen region with its own color and depth buffers, rendered by exactly one job.
pub struct Tile {
    pub min: IVec2,
    pub max: IVec2,
    pub color: Vec<u32>,
    pub depth: Vec<f32>,
}

impl Tile {
    fn new(min: IVec2, max: IVec2) -> Self {
        let size = max - min;
        let pixel_count = (size.x * size.y) as usize;
        Self {
            min,
            max,
            color: vec![0; pixel_count],
            depth: vec![f32::INFINITY; pixel_count],
        }
    }

    pub fn width(&self) -> usize {
        (self.max.x - self.min.x) as usize
    }

    pub fn height(&self) -> usize {
        (self.max.y - self.min.y) as usize
    }

    pub fn clear(&mut self, color: u32, depth: f32) {
        self.color.fill(color);
        self.depth.fill(depth);
    }
}

pub struct TileGrid {
    pub layout: TileLayout,
    pub tiles: Vec<Tile>,
}

impl TileGrid {
    pub fn new(layout: TileLayout) -> Self {
        let mut tiles = Vec::with_capacity(layout.tile_count());
        for tile_y in 0..layout.tiles_y {
            for tile_x in 0..layout.tiles_x {
                let (min, max) = layout.tile_bounds(tile_x, tile_y);
                tiles.push(Tile::new(min, max));
            }
        }
        Self { layout, tiles }
    }

    /// Tiles grouped by tile row, in top to bottom order.
    pub fn rows(&self) -> std::slice::Chunks<'_, Tile> {
        self.tiles.chunks(self.layout.tiles_x.max(1) as usize)
    }
}

/// Per-worker tile bins, stored as `bins[worker][tile]`. Binning job `i` gets exclusive access to
/// row `i`, so many workers can bin into the same tile without locking.
#[derive(Default)]
pub struct TileBins {
    bins: Vec<Vec<Vec<TriangleRef>>>,
}

impl TileBins {
    /// Empties every bin and reshapes to `workers` x `tile_count`, keeping allocations.
    pub fn reset(&mut self, workers: usize, tile_count: usize) {
        self.bins.resize_with(workers, Vec::new);
        for worker_bins in &mut self.bins {
            worker_bins.resize_with(tile_count, Vec::new);
            for bin in worker_bins.iter_mut() {
                bin.clear();
            }
        }
    }

    pub fn worker_bins_mut(&mut self) -> &mut [Vec<Vec<TriangleRef>>] {
        &mut self.bins
    }

    /// Every triangle binned into `tile`, worker by worker. With bucket `i` binned by worker `i`
    /// this is the global triangle submission order.
    pub fn tile_triangles(&self, tile: usize) -> impl Iterator<Item = TriangleRef> + '_ {
        self.bins
            .iter()
            .filter_map(move |worker_bins| worker_bins.get(tile))
            .flatten()
            .copied()
    }

    pub fn is_tile_empty(&self, tile: usize) -> bool {
        self.bins.iter().all(|worker_bins| {
            worker_bins.get(tile).is_none_or(|bin| bin.is_empty())
        })
    }

    pub fn binned_count(&self) -> usize {
        self.bins.iter().flatten().map(|bin| bin.len()).sum()
    }
}

/// Appends every triangle of one clipping bucket to the bins of all tiles its bbox overlaps.
/// `bins` is the binning worker's own row, indexed by tile.
pub fn bin_bucket(
    layout: &TileLayout,
    bucket: u32,
    triangles: &[RasterTriangle],
    bins: &mut [Vec<TriangleRef>],
) {
    for (index, triangle) in triangles.iter().enumerate() {
        let (first, last) = layout.tiles_overlapping(triangle.bbox_min, triangle.bbox_max);
        let triangle_ref = TriangleRef {
            bucket,
            index: index as u32,
        };
        for tile_y in first.y..=last.y {
            for tile_x in first.x..=last.x {
                bins[layout.tile_index(tile_x as u32, tile_y as u32)].push(triangle_ref);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Triangle;
    use crate::triangle::{VertexRef, raster_matrix, setup_triangle};
    use glam::{Vec3A, Vec4};

    fn triangle(clip: [Vec4; 3], width: u32, height: u32) -> RasterTriangle {
        let source = Triangle {
            indices: [0, 1, 2],
            normal: Vec3A::Z,
            material: 0,
        };
        setup_triangle(
            clip,
            [VertexRef::Shared(0); 3],
            &source,
            &raster_matrix(width, height),
            IVec2::new(width as i32, height as i32),
        )
        .unwrap()
    }

    #[test]
    fn layout_handles_partial_edge_tiles() {
        let layout = TileLayout::new(100, 70, 32);
        assert_eq!((layout.tiles_x, layout.tiles_y), (4, 3));
        let corner_tile = layout.tile_bounds(3, 2);
        assert_eq!(corner_tile, (IVec2::new(96, 64), IVec2::new(100, 70)));

        let grid = TileGrid::new(layout);
        assert_eq!(grid.tiles.len(), 12);
        let covered: usize = grid.tiles.iter().map(|t| t.width() * t.height()).sum();
        assert_eq!(covered, 100 * 70);
        assert_eq!(grid.rows().count(), 3);
    }

    #[test]
    fn overlap_uses_exclusive_max() {
        let layout = TileLayout::new(128, 128, 64);
        // A bbox ending exactly on a tile boundary doesn't touch the next tile
        let (first, last) = layout.tiles_overlapping(IVec2::new(0, 10), IVec2::new(64, 65));
        assert_eq!(first, IVec2::new(0, 0));
        assert_eq!(last, IVec2::new(0, 1));
    }

    #[test]
    fn triangles_land_in_every_overlapped_tile() {
        let layout = TileLayout::new(128, 128, 32);
        // Covers pixels 32..96 in both axes
        let big = triangle(
            [
                Vec4::new(-0.5, -0.5, 0.0, 1.0),
                Vec4::new(0.5, -0.5, 0.0, 1.0),
                Vec4::new(0.0, 0.5, 0.0, 1.0),
            ],
            128,
            128,
        );
        assert_eq!(big.bbox_min, IVec2::splat(32));
        assert_eq!(big.bbox_max, IVec2::splat(96));

        let mut bins = TileBins::default();
        bins.reset(2, layout.tile_count());
        bin_bucket(&layout, 1, &[big], &mut bins.worker_bins_mut()[1]);

        assert_eq!(bins.binned_count(), 4);
        for (tile_x, tile_y) in [(1, 1), (2, 1), (1, 2), (2, 2)] {
            let tile = layout.tile_index(tile_x, tile_y);
            let refs: Vec<_> = bins.tile_triangles(tile).collect();
            let expected = TriangleRef {
                bucket: 1,
                index: 0,
            };
            assert_eq!(refs, [expected]);
        }
        assert!(bins.is_tile_empty(layout.tile_index(0, 0)));
    }

    #[test]
    fn tile_order_follows_worker_order() {
        let layout = TileLayout::new(64, 64, 64);
        let tri = triangle(
            [
                Vec4::new(-0.5, -0.5, 0.0, 1.0),
                Vec4::new(0.5, -0.5, 0.0, 1.0),
                Vec4::new(0.0, 0.5, 0.0, 1.0),
            ],
            64,
            64,
        );
        let mut bins = TileBins::default();
        bins.reset(3, layout.tile_count());
        // Bin out of order; reading back must still go worker 0, 1, 2
        for worker in [2u32, 0, 1] {
            let row = &mut bins.worker_bins_mut()[worker as usize];
            bin_bucket(&layout, worker, &[tri, tri], row);
        }
        let buckets: Vec<u32> = bins.tile_triangles(0).map(|r| r.bucket).collect();
        assert_eq!(buckets, vec![0, 0, 1, 1, 2, 2]);

        bins.reset(1, layout.tile_count());
        assert_eq!(bins.binned_count(), 0);
    }
}

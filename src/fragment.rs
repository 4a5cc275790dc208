use glam::{IVec2, Vec2, Vec3A};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::binning::{TileBins, TileGrid};
use crate::clipper::ClipBucket;
use crate::framebuffer::FrameBuffer;
use crate::jobs::JobScheduler;
use crate::shader::{Fragment, FragmentShader, ShadingContext, shade_and_pack};
use crate::triangle::RasterTriangle;
use crate::vertex::{ProjectedVertex, Varyings};

/// A rectangle of pixels with its own color and depth storage: a band of image rows or a tile.
/// Storage is row-major with a stride of the rectangle's width.
pub struct RasterTarget<'a> {
    pub min: IVec2,
    pub max: IVec2,
    pub color: &'a mut [u32],
    pub depth: &'a mut [f32],
}

impl RasterTarget<'_> {
    fn stride(&self) -> usize {
        (self.max.x - self.min.x) as usize
    }
}

/// Turns screen-space weights into perspective-corrected ones.
///
/// Returns the corrected weights, which sum to one, and the interpolated view depth `Z`.
#[inline]
pub fn perspective_weights(screen_weights: Vec3A, recip_w: Vec3A) -> (Vec3A, f32) {
    let weighted = screen_weights * recip_w;
    let view_depth = 1.0 / (weighted.x + weighted.y + weighted.z);
    (weighted * view_depth, view_depth)
}

/// Everything the fragment stage reads during one frame. Shared by all fragment jobs.
pub struct FragmentStage<'a> {
    pub shared_vertices: &'a [ProjectedVertex],
    pub buckets: &'a [ClipBucket],
    pub shader: &'a dyn FragmentShader,
    pub context: ShadingContext<'a>,
    pub w_buffer: bool,
    pub smooth_normals: bool,
    pub wireframe: bool,
}

impl FragmentStage<'_> {
    /// Rasterizes one triangle into the part of `target` its bbox covers. Returns the number of
    /// fragments written.
    pub fn rasterize(
        &self,
        triangle: &RasterTriangle,
        bucket: &ClipBucket,
        target: &mut RasterTarget,
    ) -> usize {
        let min = triangle.bbox_min.max(target.min);
        let max = triangle.bbox_max.min(target.max);
        if min.x >= max.x || min.y >= max.y {
            return 0;
        }

        let shared = self.shared_vertices;
        let corners = triangle
            .vertices
            .map(|vertex| &bucket.resolve(shared, vertex).varyings);
        let material = self.context.scene.material(triangle.material);
        let screen_z = Vec3A::from_array(triangle.screen.map(|s| s.z));
        let [e0, e1, e2] = &triangle.edges;
        let stride = target.stride();
        let mut written = 0;

        for y in min.y..max.y {
            let py = y as f32 + 0.5;
            let row0 = e0.row(py);
            let row1 = e1.row(py);
            let row2 = e2.row(py);
            let row_offset = (y - target.min.y) as usize * stride;

            for x in min.x..max.x {
                let px = x as f32 + 0.5;
                let w0 = e0.a * px + row0;
                let w1 = e1.a * px + row1;
                let w2 = e2.a * px + row2;
                // Pixels exactly on an edge are inside
                if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                    continue;
                }

                let (weights, view_depth) =
                    perspective_weights(Vec3A::new(w0, w1, w2), triangle.recip_w);
                let ndc_depth = weights.dot(screen_z);

                let depth = if self.w_buffer {
                    if view_depth < self.context.near {
                        continue;
                    }
                    view_depth
                } else {
                    if !(-1.0..=1.0).contains(&ndc_depth) {
                        continue;
                    }
                    ndc_depth
                };

                let index = row_offset + (x - target.min.x) as usize;
                if !(depth < target.depth[index]) {
                    continue;
                }

                let mut varyings = Varyings::blend(corners, weights);
                varyings.normal = if self.smooth_normals {
                    varyings.normal.normalize_or(triangle.normal)
                } else {
                    triangle.normal
                };

                let fragment = Fragment {
                    position: Vec2::new(px, py),
                    weights,
                    ndc_depth,
                    view_depth,
                    varyings,
                    triangle,
                    material,
                };
                target.color[index] =
                    shade_and_pack(self.shader, &fragment, &self.context, self.wireframe);
                target.depth[index] = depth;
                written += 1;
            }
        }
        written
    }

    // Every triangle of every bucket, in global submission order
    fn rasterize_all(&self, target: &mut RasterTarget) -> usize {
        let mut written = 0;
        for bucket in self.buckets {
            for triangle in &bucket.triangles {
                if triangle.bbox_max.y <= target.min.y || triangle.bbox_min.y >= target.max.y {
                    continue;
                }
                written += self.rasterize(triangle, bucket, target);
            }
        }
        written
    }
}

/// Scanline driver: splits the image rows into one band per worker and rasterizes every triangle
/// straight into the frame buffer. Returns the number of fragments written.
pub fn render_scanlines(
    jobs: &JobScheduler,
    stage: &FragmentStage,
    target: &mut FrameBuffer,
) -> usize {
    let width = target.width() as i32;
    if width == 0 {
        return 0;
    }
    let fragments = AtomicUsize::new(0);

    jobs.scope(|s| {
        for band in target.row_bands(jobs.worker_count()) {
            let fragments = &fragments;
            s.execute(move || {
                let mut target = RasterTarget {
                    min: IVec2::new(0, band.rows.start as i32),
                    max: IVec2::new(width, band.rows.end as i32),
                    color: band.color,
                    depth: band.depth,
                };
                let written = stage.rasterize_all(&mut target);
                fragments.fetch_add(written, Ordering::Relaxed);
            });
        }
    });

    fragments.into_inner()
}

/// Tiled driver: one job per tile, each rendering the triangles binned into it into the tile's
/// own buffers. Tiles start from the same clear values as the frame buffer's background pass.
pub fn render_tiles(
    jobs: &JobScheduler,
    stage: &FragmentStage,
    grid: &mut TileGrid,
    bins: &TileBins,
    clear_color: u32,
    clear_depth: f32,
) -> usize {
    let fragments = AtomicUsize::new(0);

    jobs.scope(|s| {
        for (index, tile) in grid.tiles.iter_mut().enumerate() {
            let fragments = &fragments;
            s.execute(move || {
                tile.clear(clear_color, clear_depth);
                if bins.is_tile_empty(index) {
                    return;
                }
                let mut target = RasterTarget {
                    min: tile.min,
                    max: tile.max,
                    color: &mut tile.color,
                    depth: &mut tile.depth,
                };
                let mut written = 0;
                for triangle_ref in bins.tile_triangles(index) {
                    let bucket = &stage.buckets[triangle_ref.bucket as usize];
                    let triangle = &bucket.triangles[triangle_ref.index as usize];
                    written += stage.rasterize(triangle, bucket, &mut target);
                }
                fragments.fetch_add(written, Ordering::Relaxed);
            });
        }
    });

    fragments.into_inner()
}

/// Copies every tile into the frame buffer. One job per row of tiles, so each job owns a disjoint
/// band of the frame buffer and each tile is copied exactly once.
pub fn merge_tiles(jobs: &JobScheduler, grid: &TileGrid, target: &mut FrameBuffer) {
    let width = target.width() as usize;
    let band_len = width * grid.layout.tile_size as usize;
    if band_len == 0 {
        return;
    }

    jobs.scope(|s| {
        let bands = target.color.chunks_mut(band_len).zip(target.depth.chunks_mut(band_len));
        for (row_tiles, (color, depth)) in grid.rows().zip(bands) {
            s.execute(move || {
                for tile in row_tiles {
                    let tile_width = tile.width();
                    let x = tile.min.x as usize;
                    for local_y in 0..tile.height() {
                        let src = local_y * tile_width;
                        let dst = local_y * width + x;
                        color[dst..dst + tile_width]
                            .copy_from_slice(&tile.color[src..src + tile_width]);
                        depth[dst..dst + tile_width]
                            .copy_from_slice(&tile.depth[src..src + tile_width]);
                    }
                }
            });
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binning::{TileLayout, bin_bucket};
    use crate::clipper::Clipper;
    use crate::scene::{Scene, Triangle};
    use crate::settings::RenderSettings;
    use crate::shader::NormalShader;
    use crate::triangle::raster_matrix;
    use glam::Vec4;
    use std::sync::Mutex;

    const SIZE: u32 = 48;

    fn projected(clip: Vec4, normal: Vec3A) -> ProjectedVertex {
        ProjectedVertex {
            clip,
            varyings: Varyings {
                world: Vec3A::from_vec4(clip),
                uv: Vec2::ZERO,
                normal,
            },
        }
    }

    fn triangle(indices: [u32; 3]) -> Triangle {
        Triangle {
            indices,
            normal: Vec3A::Z,
            material: 0,
        }
    }

    // Two overlapping triangles at different depths and w
    fn geometry() -> (Vec<ProjectedVertex>, Vec<Triangle>) {
        let vertices = vec![
            projected(Vec4::new(-0.9, -0.8, 0.2, 1.0), Vec3A::X),
            projected(Vec4::new(1.6, -1.2, 0.8, 2.0), Vec3A::Y),
            projected(Vec4::new(-0.2, 0.9, -0.1, 1.0), Vec3A::Z),
            projected(Vec4::new(-1.5, -0.3, -0.9, 3.0), Vec3A::Y),
            projected(Vec4::new(0.9, 0.2, 0.5, 1.0), Vec3A::Z),
            projected(Vec4::new(-0.4, 1.8, 0.0, 2.0), Vec3A::X),
        ];
        (vertices, vec![triangle([0, 1, 2]), triangle([3, 4, 5])])
    }

    fn clip(
        vertices: &[ProjectedVertex],
        triangles: &[Triangle],
        buckets: usize,
    ) -> Vec<ClipBucket> {
        let clipper = Clipper {
            projected: vertices,
            raster: raster_matrix(SIZE, SIZE),
            resolution: IVec2::new(SIZE as i32, SIZE as i32),
        };
        let mut out: Vec<ClipBucket> = (0..buckets).map(|_| ClipBucket::default()).collect();
        let ranges = crate::jobs::partition(triangles.len(), buckets);
        for (bucket, range) in out.iter_mut().zip(ranges) {
            clipper.process_range(&triangles[range], bucket);
        }
        out
    }

    fn render_with(
        shader: &dyn FragmentShader,
        (vertices, triangles): &(Vec<ProjectedVertex>, Vec<Triangle>),
        tiled: bool,
        workers: usize,
        tile_size: u32,
    ) -> FrameBuffer {
        let jobs = JobScheduler::new(workers).unwrap();
        let scene = Scene::empty();
        let settings = RenderSettings::with_resolution(SIZE, SIZE);
        let buckets = clip(vertices, triangles, jobs.worker_count());
        let stage = FragmentStage {
            shared_vertices: vertices,
            buckets: &buckets,
            shader,
            context: ShadingContext::new(&scene, &settings, Vec3A::ZERO, 0.1, 10.0),
            w_buffer: false,
            smooth_normals: true,
            wireframe: false,
        };

        let mut target = FrameBuffer::new(SIZE, SIZE);
        target.clear(0x000000FF, f32::INFINITY);
        if tiled {
            let layout = TileLayout::new(SIZE, SIZE, tile_size);
            let mut grid = TileGrid::new(layout);
            let mut bins = TileBins::default();
            bins.reset(buckets.len(), layout.tile_count());
            let rows = buckets.iter().zip(bins.worker_bins_mut()).enumerate();
            for (index, (bucket, row)) in rows {
                bin_bucket(&layout, index as u32, &bucket.triangles, row);
            }
            render_tiles(&jobs, &stage, &mut grid, &bins, 0x000000FF, f32::INFINITY);
            merge_tiles(&jobs, &grid, &mut target);
        } else {
            render_scanlines(&jobs, &stage, &mut target);
        }
        target
    }

    fn render(tiled: bool, workers: usize, tile_size: u32) -> FrameBuffer {
        render_with(&NormalShader, &geometry(), tiled, workers, tile_size)
    }

    // Tracks how far accepted fragments stray from normalized weights and weighted depth
    #[derive(Default)]
    struct WeightCheckShader {
        max_error: Mutex<f32>,
        fragments: AtomicUsize,
    }

    impl FragmentShader for WeightCheckShader {
        fn shade(&self, fragment: &Fragment, _context: &ShadingContext) -> Vec4 {
            let weights = fragment.weights;
            let screen_z = Vec3A::from_array(fragment.triangle.screen.map(|s| s.z));
            let error = (weights.x + weights.y + weights.z - 1.0)
                .abs()
                .max(-weights.min_element())
                .max((fragment.ndc_depth - weights.dot(screen_z)).abs());
            let mut max_error = self.max_error.lock().unwrap();
            *max_error = error.max(*max_error);
            self.fragments.fetch_add(1, Ordering::Relaxed);
            Vec4::ONE
        }
    }

    #[test]
    fn weights_are_a_partition_of_unity() {
        let recip_w = Vec3A::new(1.0, 0.25, 0.6);
        for screen in [
            Vec3A::new(0.2, 0.3, 0.5),
            Vec3A::new(1.0, 0.0, 0.0),
            Vec3A::new(0.05, 0.9, 0.05),
        ] {
            let (weights, view_depth) = perspective_weights(screen, recip_w);
            assert!((weights.x + weights.y + weights.z - 1.0).abs() < 1e-5);
            assert!(view_depth > 0.0);
        }
        // Equal w leaves screen weights untouched
        let (weights, view_depth) =
            perspective_weights(Vec3A::new(0.2, 0.3, 0.5), Vec3A::splat(0.5));
        assert!((weights - Vec3A::new(0.2, 0.3, 0.5)).length() < 1e-6);
        assert!((view_depth - 2.0).abs() < 1e-6);
    }

    #[test]
    fn every_fragment_has_normalized_weights() {
        let geometry = geometry();
        for (tiled, workers, tile_size) in [(false, 1, 16), (false, 3, 16), (true, 4, 7)] {
            let shader = WeightCheckShader::default();
            render_with(&shader, &geometry, tiled, workers, tile_size);
            assert!(shader.fragments.load(Ordering::Relaxed) > 0);
            let max_error = *shader.max_error.lock().unwrap();
            assert!(max_error <= 1e-5, "tiled={tiled} workers={workers}: {max_error}");
        }
    }

    #[test]
    fn stored_depth_uses_perspective_weights() {
        // Corner w of 1, 4 and 1, all inside the frustum
        let vertices = vec![
            projected(Vec4::new(-0.8, -0.8, -0.5, 1.0), Vec3A::Z),
            projected(Vec4::new(3.2, -2.0, 3.0, 4.0), Vec3A::Z),
            projected(Vec4::new(-0.5, 0.9, 0.4, 1.0), Vec3A::Z),
        ];
        let triangles = vec![triangle([0, 1, 2])];
        let buckets = clip(&vertices, &triangles, 1);
        let raster = buckets[0].triangles[0];
        let screen_z = Vec3A::from_array(raster.screen.map(|s| s.z));

        let image = render_with(&NormalShader, &(vertices, triangles), false, 2, 16);
        let mut checked = 0;
        let mut differs_from_screen_linear = false;
        for y in 0..SIZE {
            for x in 0..SIZE {
                let stored = image.depth_at(x, y);
                if stored == f32::INFINITY {
                    continue;
                }
                let (px, py) = (x as f32 + 0.5, y as f32 + 0.5);
                let screen = Vec3A::from_array(raster.edges.map(|e| e.evaluate(px, py)));
                let (weights, _) = perspective_weights(screen, raster.recip_w);
                let expected = weights.dot(screen_z);
                assert!((stored - expected).abs() < 1e-6, "({x}, {y}): {stored} != {expected}");
                differs_from_screen_linear |= (stored - screen.dot(screen_z)).abs() > 1e-3;
                checked += 1;
            }
        }
        assert!(checked > 100);
        assert!(differs_from_screen_linear);
    }

    #[test]
    fn tiled_matches_scanline() {
        let reference = render(false, 1, 16);
        assert!(reference.color.iter().any(|&c| c != 0x000000FF));
        for (workers, tile_size) in [(1, 16), (3, 16), (4, 7), (2, 64), (8, 5)] {
            for tiled in [false, true] {
                let image = render(tiled, workers, tile_size);
                let label = format!("tiled={tiled} workers={workers} tile={tile_size}");
                assert!(image.color == reference.color, "{label}");
                let same_depth = image
                    .depth
                    .iter()
                    .zip(&reference.depth)
                    .all(|(a, b)| a.to_bits() == b.to_bits());
                assert!(same_depth, "{label}");
            }
        }
    }

    #[test]
    fn depth_stays_in_ndc_range() {
        let image = render(false, 2, 16);
        let written = image.depth.iter().filter(|d| d.is_finite()).count();
        assert!(written > 0);
        assert!(image.depth.iter().all(|&d| d == f32::INFINITY || (-1.0..=1.0).contains(&d)));
    }
}

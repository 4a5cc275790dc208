use glam::IVec2;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::binning::{TileBins, TileGrid, TileLayout, bin_bucket};
use crate::camera::FrameInput;
use crate::clipper::{ClipBucket, ClipStats, Clipper};
use crate::fragment::{FragmentStage, merge_tiles, render_scanlines, render_tiles};
use crate::framebuffer::FrameBuffer;
use crate::jobs::{JobScheduler, partition};
use crate::scene::Scene;
use crate::settings::{RenderSettings, SettingsError};
use crate::shader::{FragmentShader, ShadingContext, shader_for_view};
use crate::triangle::raster_matrix;
use crate::vertex::{ProjectedVertex, VERTEX_CHUNK_SIZE};

// Depth buffer value meaning "nothing drawn yet", for both depth modes
pub const CLEAR_DEPTH: f32 = f32::INFINITY;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub vertices: usize,
    pub clip: ClipStats,
    pub raster_triangles: usize,
    pub binned: usize,
    pub fragments: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Background,
    Vertex,
    Clip,
    Bin,
    Raster,
    Merge,
}

impl Stage {
    const ALL: [Stage; 6] = [
        Stage::Background,
        Stage::Vertex,
        Stage::Clip,
        Stage::Bin,
        Stage::Raster,
        Stage::Merge,
    ];

    fn name(self) -> &'static str {
        match self {
            Stage::Background => "Background",
            Stage::Vertex => "Vertex",
            Stage::Clip => "Clipping",
            Stage::Bin => "Binning",
            Stage::Raster => "Rasterization",
            Stage::Merge => "Tile merge",
        }
    }
}

// Accumulates per-stage times, reports stutters and prints averages once per second
struct StageTimers {
    totals: [Duration; 6],
    current: [Duration; 6],
    last_print_time: Instant,
    frame_count: u32,
}

impl StageTimers {
    fn new() -> Self {
        Self {
            totals: [Duration::ZERO; 6],
            current: [Duration::ZERO; 6],
            last_print_time: Instant::now(),
            frame_count: 0,
        }
    }

    fn time<T>(&mut self, stage: Stage, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let result = f();
        self.current[stage as usize] = start.elapsed();
        result
    }

    fn end_frame(&mut self) {
        // Stutter detection (2x the average)
        if self.frame_count > 0 {
            for stage in Stage::ALL {
                let time = self.current[stage as usize];
                let average = self.totals[stage as usize].as_secs_f64() / self.frame_count as f64;
                let stutter = Duration::from_secs_f64(average * 2.0);
                if time > stutter && time > Duration::from_micros(100) {
                    log::debug!("{} stutter: {:.2}ms", stage.name(), time.as_secs_f64() * 1000.0);
                }
            }
        }

        for (total, current) in self.totals.iter_mut().zip(self.current.iter_mut()) {
            *total += *current;
            *current = Duration::ZERO;
        }
        self.frame_count += 1;

        let now = Instant::now();
        if now.duration_since(self.last_print_time) >= Duration::from_secs(1) {
            let mut total_ms = 0.0;
            for stage in Stage::ALL {
                let average_ms =
                    self.totals[stage as usize].as_secs_f64() * 1000.0 / self.frame_count as f64;
                total_ms += average_ms;
                log::info!("{:<14} {:.2} ms", format!("{}:", stage.name()), average_ms);
            }
            log::info!("{:<14} {:.2} ms ({} frames)", "Total:", total_ms, self.frame_count);
            self.last_print_time = now;
            self.frame_count = 0;
            self.totals = [Duration::ZERO; 6];
        }
    }
}

/// Runs the rasterizer pipeline over a scheduler: background, vertex, clipping, then either
/// binning plus tiled rasterization and merge, or scanline rasterization.
///
/// Per-frame buffers live here and are reused between frames; no other state carries over.
pub struct Renderer {
    settings: RenderSettings,
    projected: Vec<ProjectedVertex>,
    buckets: Vec<ClipBucket>,
    grid: TileGrid,
    bins: TileBins,
    shader: Option<Arc<dyn FragmentShader>>,
    timers: StageTimers,
    last_stats: FrameStats,
}

impl Renderer {
    pub fn new(settings: RenderSettings) -> Result<Self, SettingsError> {
        settings.validate()?;
        let layout = TileLayout::new(settings.width, settings.height, settings.tile_size);
        Ok(Self {
            settings,
            projected: Vec::new(),
            buckets: Vec::new(),
            grid: TileGrid::new(layout),
            bins: TileBins::default(),
            shader: None,
            timers: StageTimers::new(),
            last_stats: FrameStats::default(),
        })
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: RenderSettings) -> Result<(), SettingsError> {
        settings.validate()?;
        let layout = TileLayout::new(settings.width, settings.height, settings.tile_size);
        if layout != self.grid.layout {
            log::debug!(
                "rebuilding tile grid: {}x{} tiles of {} pixels",
                layout.tiles_x,
                layout.tiles_y,
                layout.tile_size
            );
            self.grid = TileGrid::new(layout);
        }
        self.settings = settings;
        Ok(())
    }

    /// Replaces the fragment function picked from the debug view. `None` restores it.
    pub fn set_shader(&mut self, shader: Option<Arc<dyn FragmentShader>>) {
        self.shader = shader;
    }

    pub fn last_stats(&self) -> &FrameStats {
        &self.last_stats
    }

    pub fn render(
        &mut self,
        jobs: &JobScheduler,
        scene: &Scene,
        input: &FrameInput,
        target: &mut FrameBuffer,
    ) -> FrameStats {
        let settings = &self.settings;
        if target.resize(settings.width, settings.height) {
            log::warn!(
                "render target resized to {}x{} to match the settings",
                settings.width,
                settings.height
            );
        }

        let workers = jobs.worker_count();
        let clear_color = settings.clear_color;

        // Background pass, also the result for pixels no triangle covers
        self.timers.time(Stage::Background, || {
            jobs.scope(|s| {
                for band in target.row_bands(workers) {
                    s.execute(move || {
                        band.color.fill(clear_color);
                        band.depth.fill(CLEAR_DEPTH);
                    });
                }
            });
        });

        // Vertex stage
        let projected = &mut self.projected;
        projected.clear();
        projected.resize(scene.vertices.len(), ProjectedVertex::default());
        self.timers.time(Stage::Vertex, || {
            jobs.scope(|s| {
                let chunks = scene
                    .vertices
                    .chunks(VERTEX_CHUNK_SIZE)
                    .zip(projected.chunks_mut(VERTEX_CHUNK_SIZE));
                for (input_chunk, output_chunk) in chunks {
                    let transform = &input.transform;
                    s.execute(move || transform.process_chunk(input_chunk, output_chunk));
                }
            });
        });
        let projected = &self.projected;

        // Clipping stage, one contiguous triangle range and one output bucket per worker
        let buckets = &mut self.buckets;
        buckets.resize_with(workers, ClipBucket::default);
        let clipper = Clipper {
            projected,
            raster: raster_matrix(settings.width, settings.height),
            resolution: IVec2::new(settings.width as i32, settings.height as i32),
        };
        self.timers.time(Stage::Clip, || {
            jobs.scope(|s| {
                let ranges = partition(scene.triangles.len(), workers);
                for (bucket, range) in buckets.iter_mut().zip(ranges) {
                    let clipper = &clipper;
                    let triangles = &scene.triangles[range];
                    s.execute(move || {
                        bucket.clear();
                        clipper.process_range(triangles, bucket);
                    });
                }
            });
        });
        let buckets = &self.buckets;

        let mut stats = FrameStats {
            vertices: projected.len(),
            ..FrameStats::default()
        };
        for bucket in buckets {
            stats.clip += bucket.stats;
        }
        stats.raster_triangles = stats.clip.emitted;
        if stats.clip.rejected_behind_eye > 0 {
            log::warn!(
                "discarded {} clipped polygons with w <= 0",
                stats.clip.rejected_behind_eye
            );
        }

        let shader: &dyn FragmentShader = match &self.shader {
            Some(shader) => shader.as_ref(),
            None => shader_for_view(settings.debug_view),
        };
        let stage = FragmentStage {
            shared_vertices: projected,
            buckets,
            shader,
            context: ShadingContext::new(scene, settings, input.eye, input.near, input.far),
            w_buffer: settings.w_buffer,
            smooth_normals: settings.smooth_normals,
            wireframe: settings.wireframe,
        };

        if settings.tiled {
            let grid = &mut self.grid;
            let bins = &mut self.bins;
            let layout = grid.layout;

            bins.reset(workers, layout.tile_count());
            self.timers.time(Stage::Bin, || {
                jobs.scope(|s| {
                    let rows = buckets.iter().zip(bins.worker_bins_mut());
                    for (index, (bucket, row)) in rows.enumerate() {
                        let layout = &layout;
                        let triangles = &bucket.triangles;
                        s.execute(move || bin_bucket(layout, index as u32, triangles, row));
                    }
                });
            });
            stats.binned = bins.binned_count();

            stats.fragments = self.timers.time(Stage::Raster, || {
                render_tiles(jobs, &stage, grid, bins, clear_color, CLEAR_DEPTH)
            });
            self.timers.time(Stage::Merge, || merge_tiles(jobs, grid, target));
        } else {
            stats.fragments = self
                .timers
                .time(Stage::Raster, || render_scanlines(jobs, &stage, target));
        }

        log::debug!(
            "clipping: {} vertices, {} triangles in, {} accepted, {} clipped, {} culled outside, \
             {} culled facing",
            stats.vertices,
            stats.clip.input,
            stats.clip.trivially_accepted,
            stats.clip.clipped,
            stats.clip.culled_outside,
            stats.clip.culled_facing
        );
        log::debug!(
            "raster: {} triangles, {} clip vertices, {} bin entries, {} fragments",
            stats.raster_triangles,
            stats.clip.vertices_created,
            stats.binned,
            stats.fragments
        );

        self.timers.end_frame();
        self.last_stats = stats;
        stats
    }
}

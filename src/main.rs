use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use glam::{Mat4, Vec3};
use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tilerast::logging::init_logging;
use tilerast::texture::Texture;
use tilerast::util::rgba8_unpack_u8;
use tilerast::{Camera, DebugView, FrameBuffer, JobScheduler, RenderSettings, Renderer, Scene};

#[derive(ValueEnum, Clone, Copy, Debug)]
enum View {
    Shaded,
    Depth,
    Normals,
}

impl From<View> for DebugView {
    fn from(view: View) -> Self {
        match view {
            View::Shaded => DebugView::Shaded,
            View::Depth => DebugView::Depth,
            View::Normals => DebugView::Normals,
        }
    }
}

#[derive(Parser, Clone)]
#[command(name = "tilerast")]
#[command(about = "Renders a procedural scene with the tile rasterizer and writes a PNG")]
struct Args {
    /// Output image
    #[arg(short, long, default_value = "frame.png")]
    output: PathBuf,

    #[arg(long, default_value_t = 1280)]
    width: u32,

    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Number of frames to render, orbiting the camera between them
    #[arg(short, long, default_value_t = 1)]
    frames: u32,

    /// Worker threads (defaults to the available parallelism)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Tile size in pixels
    #[arg(long, default_value_t = tilerast::settings::DEFAULT_TILE_SIZE)]
    tile_size: u32,

    /// Rasterize row bands directly instead of binning into tiles
    #[arg(long)]
    no_tiling: bool,

    /// Depth test on view depth instead of NDC z
    #[arg(long)]
    w_buffer: bool,

    #[arg(long, value_enum, default_value_t = View::Shaded)]
    view: View,

    /// Overlay triangle edges
    #[arg(long)]
    wireframe: bool,

    /// Nearest texture sampling
    #[arg(long)]
    nearest: bool,

    /// Flat face normals instead of interpolated vertex normals
    #[arg(long)]
    flat: bool,

    /// Texture for the ground plane (falls back to a checkerboard)
    #[arg(long)]
    texture: Option<PathBuf>,

    /// Camera distance from the scene center; small values push geometry through the near plane
    #[arg(long, default_value_t = 9.0)]
    radius: f32,

    /// Spin the scene through a model matrix instead of orbiting the camera
    #[arg(long)]
    spin: bool,

    /// Log filter, e.g. "debug" (defaults to RUST_LOG, then info)
    #[arg(long)]
    log: Option<String>,
}

impl Args {
    fn render_settings(&self) -> RenderSettings {
        RenderSettings {
            tile_size: self.tile_size,
            tiled: !self.no_tiling,
            w_buffer: self.w_buffer,
            debug_view: self.view.into(),
            wireframe: self.wireframe,
            smooth_normals: !self.flat,
            bilinear: !self.nearest,
            ..RenderSettings::with_resolution(self.width, self.height)
        }
    }
}

fn build_scene(args: &Args) -> Scene {
    let mut scene = Scene::demo();
    if let Some(path) = &args.texture {
        let texture = Arc::new(Texture::load_or_checkerboard(path));
        if let Some(ground) = scene.materials.get_mut(0) {
            ground.base_color_texture = Some(texture);
        }
    }
    for (index, material) in scene.materials.iter().enumerate() {
        log::debug!(
            "material {}: {}",
            index,
            material.name.as_deref().unwrap_or("unnamed")
        );
    }
    log::info!(
        "scene: {} vertices, {} triangles, {} materials",
        scene.vertices.len(),
        scene.triangles.len(),
        scene.materials.len()
    );
    scene
}

fn save_png(buffer: &FrameBuffer, path: &PathBuf) -> Result<()> {
    let mut bytes = vec![0u8; buffer.color.len() * 4];
    bytes
        .par_chunks_exact_mut(4)
        .zip(buffer.color.par_iter())
        .for_each(|(pixel, &color)| {
            let (r, g, b, a) = rgba8_unpack_u8(color);
            pixel[0] = r;
            pixel[1] = g;
            pixel[2] = b;
            pixel[3] = a;
        });

    let image = image::RgbaImage::from_raw(buffer.width(), buffer.height(), bytes)
        .context("frame buffer size does not match its dimensions")?;
    image
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log.as_deref());

    let settings = args.render_settings();
    let mut renderer = Renderer::new(settings.clone()).context("invalid render settings")?;
    let jobs = match args.workers {
        Some(workers) => JobScheduler::new(workers),
        None => JobScheduler::with_available_parallelism(),
    }
    .context("failed to start job scheduler")?;
    log::info!(
        "rendering {}x{} with {} workers, {}",
        settings.width,
        settings.height,
        jobs.worker_count(),
        if settings.tiled { "tiled" } else { "scanline" }
    );

    let scene = build_scene(&args);
    let center = Vec3::from(scene.bounds.center);
    let mut camera = Camera::new(
        center + Vec3::new(0.0, 4.0, args.radius),
        center,
        60f32.to_radians(),
        settings.width,
        settings.height,
    );
    let mut target = FrameBuffer::new(settings.width, settings.height);

    let start = Instant::now();
    for frame in 0..args.frames {
        let angle = frame as f32 * 0.05;
        let input = if args.spin {
            camera.frame_input_with_model(Mat4::from_rotation_y(angle))
        } else {
            camera.orbit(center, args.radius, 4.0, angle);
            camera.frame_input()
        };
        renderer.render(&jobs, &scene, &input, &mut target);
    }
    let elapsed = start.elapsed();

    let stats = renderer.last_stats();
    log::info!(
        "{} frames in {:.2} ms ({:.2} ms/frame), last frame: {} raster triangles, {} fragments",
        args.frames,
        elapsed.as_secs_f64() * 1000.0,
        elapsed.as_secs_f64() * 1000.0 / args.frames.max(1) as f64,
        stats.raster_triangles,
        stats.fragments
    );

    save_png(&target, &args.output)?;
    log::info!("wrote {}", args.output.display());
    Ok(())
}

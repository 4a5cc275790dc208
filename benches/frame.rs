use criterion::{Criterion, criterion_group, criterion_main};
use glam::Vec3;
use std::hint::black_box;
use tilerast::{Camera, FrameBuffer, JobScheduler, RenderSettings, Renderer, Scene};

const WIDTH: u32 = 640;
const HEIGHT: u32 = 360;

fn criterion_benchmark(c: &mut Criterion) {
    let scene = Scene::demo();
    let jobs = JobScheduler::with_available_parallelism().unwrap();
    let camera = Camera::new(Vec3::new(6.0, 4.0, 8.0), Vec3::ZERO, 1.0, WIDTH, HEIGHT);
    let input = camera.frame_input();

    for (name, tiled) in [("frame (tiled)", true), ("frame (scanline)", false)] {
        c.bench_function(name, |b| {
            let settings = RenderSettings {
                tiled,
                ..RenderSettings::with_resolution(WIDTH, HEIGHT)
            };
            let mut renderer = Renderer::new(settings).unwrap();
            let mut target = FrameBuffer::new(WIDTH, HEIGHT);

            b.iter(|| {
                let stats = renderer.render(&jobs, &scene, &input, &mut target);
                black_box(stats);
            });
        });
    }

    c.bench_function("scheduler (10k empty jobs)", |b| {
        b.iter(|| {
            for _ in 0..10_000 {
                jobs.execute(|| {});
            }
            jobs.wait();
        });
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);

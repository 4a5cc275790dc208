use glam::{Mat4, Vec2, Vec3, Vec3A, Vec4};
use tilerast::scene::{Material, SceneBuilder, Vertex};
use tilerast::{
    Camera, DebugView, FrameBuffer, FrameInput, FrameStats, JobScheduler, RenderSettings, Renderer,
    Scene,
};

const WIDTH: u32 = 160;
const HEIGHT: u32 = 96;

fn settings(tiled: bool, tile_size: u32) -> RenderSettings {
    RenderSettings {
        tiled,
        tile_size,
        ..RenderSettings::with_resolution(WIDTH, HEIGHT)
    }
}

fn orbit_camera(radius: f32, height: f32, angle: f32) -> Camera {
    let mut camera = Camera::new(Vec3::ONE, Vec3::ZERO, 1.0, WIDTH, HEIGHT);
    camera.orbit(Vec3::ZERO, radius, height, angle);
    camera
}

fn render(
    scene: &Scene,
    settings: RenderSettings,
    workers: usize,
    input: &FrameInput,
) -> (FrameBuffer, FrameStats) {
    let jobs = JobScheduler::new(workers).unwrap();
    let mut renderer = Renderer::new(settings).unwrap();
    let mut target = FrameBuffer::new(WIDTH, HEIGHT);
    let stats = renderer.render(&jobs, scene, input, &mut target);
    (target, stats)
}

fn assert_same_image(a: &FrameBuffer, b: &FrameBuffer, what: &str) {
    assert!(a.color == b.color, "color differs: {what}");
    let same_depth = a.depth.iter().zip(&b.depth).all(|(x, y)| x.to_bits() == y.to_bits());
    assert!(same_depth, "depth differs: {what}");
}

// A single large quad that the camera sits right in front of, so it crosses the near plane
fn wall_scene() -> Scene {
    let mut builder = SceneBuilder::new();
    let material = builder.add_material(Material::from_color(Vec4::new(0.7, 0.5, 0.3, 1.0)));
    let n = Vec3A::Y;
    builder.add_quad(
        [
            Vertex::new(Vec3A::new(-20.0, 0.0, 20.0), Vec2::new(0.0, 0.0), n),
            Vertex::new(Vec3A::new(20.0, 0.0, 20.0), Vec2::new(1.0, 0.0), n),
            Vertex::new(Vec3A::new(20.0, 0.0, -20.0), Vec2::new(1.0, 1.0), n),
            Vertex::new(Vec3A::new(-20.0, 0.0, -20.0), Vec2::new(0.0, 1.0), n),
        ],
        material,
    );
    builder.build()
}

#[test]
fn tiled_and_scanline_are_pixel_identical() {
    let scene = Scene::demo();
    let input = orbit_camera(9.0, 4.0, 0.6).frame_input();
    let (reference, stats) = render(&scene, settings(false, 64), 1, &input);
    assert!(stats.fragments > 0);

    for workers in [1, 2, 3, 8] {
        for tile_size in [16, 37, 64] {
            for tiled in [false, true] {
                let (image, _) = render(&scene, settings(tiled, tile_size), workers, &input);
                let what = format!("workers={workers} tile={tile_size} tiled={tiled}");
                assert_same_image(&image, &reference, &what);
            }
        }
    }
}

#[test]
fn debug_views_and_wireframe_match_across_drivers() {
    let scene = Scene::demo();
    let input = orbit_camera(7.0, 3.0, 2.1).frame_input();
    for view in [DebugView::Depth, DebugView::Normals] {
        for w_buffer in [false, true] {
            let make = |tiled| RenderSettings {
                debug_view: view,
                w_buffer,
                wireframe: true,
                smooth_normals: false,
                bilinear: false,
                ..settings(tiled, 32)
            };
            let (scanline, _) = render(&scene, make(false), 3, &input);
            let (tiled, _) = render(&scene, make(true), 4, &input);
            assert_same_image(&scanline, &tiled, &format!("{view:?} w_buffer={w_buffer}"));
        }
    }
}

#[test]
fn rendering_is_idempotent() {
    let scene = Scene::demo();
    let jobs = JobScheduler::new(4).unwrap();
    let mut renderer = Renderer::new(settings(true, 32)).unwrap();
    let input = orbit_camera(9.0, 4.0, 1.0).frame_input();

    let mut first = FrameBuffer::new(WIDTH, HEIGHT);
    renderer.render(&jobs, &scene, &input, &mut first);

    // A different frame in between must not leak into the next one
    let mut scratch = FrameBuffer::new(WIDTH, HEIGHT);
    let other = orbit_camera(3.0, 1.0, 4.0).frame_input();
    renderer.render(&jobs, &scene, &other, &mut scratch);

    let mut second = FrameBuffer::new(WIDTH, HEIGHT);
    renderer.render(&jobs, &scene, &input, &mut second);
    assert_same_image(&first, &second, "second render");
}

#[test]
fn empty_scene_keeps_background() {
    let scene = Scene::empty();
    let input = orbit_camera(5.0, 2.0, 0.0).frame_input();
    for tiled in [false, true] {
        let settings = settings(tiled, 64);
        let clear_color = settings.clear_color;
        let (image, stats) = render(&scene, settings, 2, &input);
        assert!(image.color.iter().all(|&c| c == clear_color));
        assert!(image.depth.iter().all(|&d| d == f32::INFINITY));
        assert_eq!(stats.raster_triangles, 0);
    }
}

#[test]
fn geometry_through_near_plane_is_clipped() {
    let scene = wall_scene();
    // Eye barely above a huge floor, looking down at a point in front of it
    let mut camera = Camera::new(
        Vec3::new(0.0, 0.05, 0.0),
        Vec3::new(0.0, 0.0, -1.0),
        1.2,
        WIDTH,
        HEIGHT,
    );
    camera.set_clip_range(0.1, 100.0);
    let input = camera.frame_input();

    let (scanline, stats) = render(&scene, settings(false, 64), 2, &input);
    assert!(stats.clip.clipped > 0);
    assert!(stats.clip.vertices_created > 0);
    assert_eq!(stats.clip.rejected_behind_eye, 0);
    assert!(stats.fragments > 0);

    let (tiled, _) = render(&scene, settings(true, 24), 5, &input);
    assert_same_image(&scanline, &tiled, "near plane");

    // Every written depth is inside the NDC range
    assert!(scanline.depth.iter().all(|&d| d == f32::INFINITY || (-1.0..=1.0).contains(&d)));
}

#[test]
fn scene_behind_camera_draws_nothing() {
    let scene = Scene::demo();
    // Looking straight up from below the ground: everything is behind or outside
    let camera = Camera::new(
        Vec3::new(0.0, -50.0, 0.0),
        Vec3::new(0.0, -100.0, 0.001),
        1.0,
        WIDTH,
        HEIGHT,
    );
    let (image, stats) = render(&scene, settings(true, 64), 2, &camera.frame_input());
    assert_eq!(stats.raster_triangles, 0);
    assert!(image.depth.iter().all(|&d| d == f32::INFINITY));
}

#[test]
fn model_transform_matches_world_transform_depth() {
    let scene = Scene::demo();
    let camera = orbit_camera(9.0, 4.0, 0.3);
    let (world, _) = render(&scene, settings(true, 64), 2, &camera.frame_input());
    let model_input = camera.frame_input_with_model(Mat4::IDENTITY);
    let (model, _) = render(&scene, settings(true, 64), 2, &model_input);
    let same_depth = world.depth.iter().zip(&model.depth).all(|(a, b)| a.to_bits() == b.to_bits());
    assert!(same_depth);
}

#[test]
fn w_buffer_stores_view_depth() {
    let scene = wall_scene();
    let camera = Camera::new(
        Vec3::new(0.0, 3.0, 0.0),
        Vec3::new(0.0, 0.0, -6.0),
        1.0,
        WIDTH,
        HEIGHT,
    );
    let settings = RenderSettings {
        w_buffer: true,
        ..settings(true, 32)
    };
    let (image, stats) = render(&scene, settings, 3, &camera.frame_input());
    assert!(stats.fragments > 0);
    // View depth is at least the near distance and at most the far distance
    let near = camera.near();
    let far = camera.far();
    assert!(
        image
            .depth
            .iter()
            .filter(|d| d.is_finite())
            .all(|&d| d >= near && d <= far * 1.001)
    );
}

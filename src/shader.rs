use glam::{Vec2, Vec3A, Vec4};

use crate::scene::{Material, Scene};
use crate::settings::{DebugView, RenderSettings};
use crate::texture::Filter;
use crate::triangle::RasterTriangle;
use crate::util::{direction_to_color, linear_to_srgb, rgba8_pack_vec4, srgb_to_linear};
use crate::vertex::Varyings;

// Wireframe lines fade out over this many pixels from the edge
const WIREFRAME_WIDTH: f32 = 1.0;
const WIREFRAME_COLOR: Vec4 = Vec4::new(1.0, 1.0, 1.0, 1.0);

/// One fragment that passed the coverage and depth tests.
pub struct Fragment<'a> {
    /// Pixel center in screen space
    pub position: Vec2,
    /// Perspective-corrected barycentric weights
    pub weights: Vec3A,
    pub ndc_depth: f32,
    pub view_depth: f32,
    /// Interpolated varyings, the normal already renormalized or replaced by the face normal
    pub varyings: Varyings,
    pub triangle: &'a RasterTriangle,
    pub material: &'a Material,
}

/// Frame-constant inputs shared by every fragment.
pub struct ShadingContext<'a> {
    pub scene: &'a Scene,
    pub eye: Vec3A,
    pub near: f32,
    pub far: f32,
    pub filter: Filter,
}

impl<'a> ShadingContext<'a> {
    pub fn new(
        scene: &'a Scene,
        settings: &RenderSettings,
        eye: Vec3A,
        near: f32,
        far: f32,
    ) -> Self {
        Self {
            scene,
            eye,
            near,
            far,
            filter: if settings.bilinear {
                Filter::Linear
            } else {
                Filter::Nearest
            },
        }
    }
}

/// A fragment function. Implementations run concurrently on every worker.
pub trait FragmentShader: Send + Sync {
    /// Returns the linear-space or display-ready color of the fragment, before packing.
    fn shade(&self, fragment: &Fragment, context: &ShadingContext) -> Vec4;
}

/// Lambert plus a Blinn-Phong highlight, base color times an optional texture.
pub struct LitShader;

impl FragmentShader for LitShader {
    fn shade(&self, fragment: &Fragment, context: &ShadingContext) -> Vec4 {
        let light = &context.scene.light;
        let material = fragment.material;
        let normal = fragment.varyings.normal;

        // Compute N.L diffuse lighting
        let n_dot_l = normal.dot(light.direction).clamp(0.0, 1.0);

        // Compute the view direction and half vector
        let view_dir = (context.eye - fragment.varyings.world).normalize_or_zero();
        let half_vector = (light.direction + view_dir).normalize_or_zero();
        let n_dot_h = normal.dot(half_vector).clamp(0.0, 1.0);
        let n_dot_h_2 = n_dot_h * n_dot_h;
        let n_dot_h_4 = n_dot_h_2 * n_dot_h_2;
        let n_dot_h_8 = n_dot_h_4 * n_dot_h_4;
        let n_dot_h_16 = n_dot_h_8 * n_dot_h_8;
        let n_dot_h_32 = n_dot_h_16 * n_dot_h_16;

        // More ambient light coming from the top, peak intensity of 0.2
        let ambient = (normal.y + 1.5) * ((0.5 / 1.5) * 0.2);

        let mut base = material.base_color_factor;
        if let Some(texture) = &material.base_color_texture {
            base *= srgb_to_linear(texture.sample(fragment.varyings.uv, context.filter));
        }

        let irradiance = light.color * n_dot_l + Vec3A::splat(ambient);
        let specular = light.color * (n_dot_h_32 * 0.25);
        let color = Vec3A::from_vec4(base) * irradiance + specular;
        linear_to_srgb(color.clamp(Vec3A::ZERO, Vec3A::ONE).extend(base.w))
    }
}

/// Linear view depth between the near and far plane, white up close.
pub struct DepthShader;

impl FragmentShader for DepthShader {
    fn shade(&self, fragment: &Fragment, context: &ShadingContext) -> Vec4 {
        let range = (context.far - context.near).max(f32::EPSILON);
        let t = ((fragment.view_depth - context.near) / range).clamp(0.0, 1.0);
        let grey = 1.0 - t.sqrt();
        Vec4::new(grey, grey, grey, 1.0)
    }
}

/// Shading normal mapped from [-1, 1] to [0, 1].
pub struct NormalShader;

impl FragmentShader for NormalShader {
    fn shade(&self, fragment: &Fragment, _context: &ShadingContext) -> Vec4 {
        direction_to_color(fragment.varyings.normal)
    }
}

pub fn shader_for_view(view: DebugView) -> &'static dyn FragmentShader {
    match view {
        DebugView::Shaded => &LitShader,
        DebugView::Depth => &DepthShader,
        DebugView::Normals => &NormalShader,
    }
}

fn point_segment_distance(p: Vec2, a: Vec2, b: Vec2) -> f32 {
    let ab = b - a;
    let length_squared = ab.length_squared();
    if length_squared == 0.0 {
        return p.distance(a);
    }
    let t = ((p - a).dot(ab) / length_squared).clamp(0.0, 1.0);
    p.distance(a + ab * t)
}

/// Distance in pixels from `position` to the closest edge of the triangle.
pub fn edge_distance(position: Vec2, triangle: &RasterTriangle) -> f32 {
    let [p0, p1, p2] = [0, 1, 2].map(|k| triangle.screen_xy(k));
    point_segment_distance(position, p1, p2)
        .min(point_segment_distance(position, p2, p0))
        .min(point_segment_distance(position, p0, p1))
}

/// Blends the wireframe line color over `color` near the triangle's edges.
pub fn wireframe_overlay(color: Vec4, position: Vec2, triangle: &RasterTriangle) -> Vec4 {
    let distance = edge_distance(position, triangle);
    if distance >= WIREFRAME_WIDTH {
        return color;
    }
    color.lerp(WIREFRAME_COLOR, 1.0 - distance / WIREFRAME_WIDTH)
}

// Runs the selected shader plus the optional overlay and packs the result
#[inline]
pub fn shade_and_pack(
    shader: &dyn FragmentShader,
    fragment: &Fragment,
    context: &ShadingContext,
    wireframe: bool,
) -> u32 {
    let mut color = shader.shade(fragment, context);
    if wireframe {
        color = wireframe_overlay(color, fragment.position, fragment.triangle);
    }
    rgba8_pack_vec4(color)
}

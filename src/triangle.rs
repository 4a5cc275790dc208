use glam::{IVec2, Mat4, Vec2, Vec3, Vec3A, Vec4};

use crate::scene::Triangle;

/// Where a raster triangle corner's projected vertex lives: in the frame's shared projected
/// vertex buffer, or in the vertex list of the clipping bucket that produced the triangle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum VertexRef {
    Shared(u32),
    Local(u32),
}

// Edge function A*x + B*y + C
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct EdgeFunction {
    pub a: f32,
    pub b: f32,
    pub c: f32,
}

impl EdgeFunction {
    // Edge p->q: (yq-yp)x + (xp-xq)y + (xq*yp - xp*yq) = 0
    fn from_edge(p: Vec2, q: Vec2) -> Self {
        Self {
            a: q.y - p.y,
            b: p.x - q.x,
            c: q.x * p.y - p.x * q.y,
        }
    }

    fn scaled(self, s: f32) -> Self {
        Self {
            a: self.a * s,
            b: self.b * s,
            c: self.c * s,
        }
    }

    // Row part of the evaluation; a pixel adds `a * x` to this
    #[inline]
    pub fn row(&self, y: f32) -> f32 {
        self.b * y + self.c
    }

    #[inline]
    pub fn evaluate(&self, x: f32, y: f32) -> f32 {
        self.a * x + self.row(y)
    }
}

/// A post-clip triangle in screen space, ready for the fragment stage.
///
/// `edges[k]` is normalized by the triangle's area, so at a pixel center it evaluates to the
/// screen-space barycentric weight of corner `k`.
#[derive(Debug, Copy, Clone)]
pub struct RasterTriangle {
    pub screen: [Vec3A; 3], // Pixel x, y and NDC z
    pub recip_w: Vec3A,
    pub edges: [EdgeFunction; 3],
    pub recip_area: f32,
    pub bbox_min: IVec2, // Inclusive
    pub bbox_max: IVec2, // Exclusive
    pub material: u32,
    pub normal: Vec3A,
    pub vertices: [VertexRef; 3],
}

impl RasterTriangle {
    /// Twice the signed screen area, positive for front-facing triangles.
    pub fn signed_area(&self) -> f32 {
        1.0 / self.recip_area
    }

    pub fn screen_xy(&self, corner: usize) -> Vec2 {
        Vec2::new(self.screen[corner].x, self.screen[corner].y)
    }
}

/// Maps NDC to pixel coordinates: x in [0, width], y flipped into [0, height], z kept.
pub fn raster_matrix(width: u32, height: u32) -> Mat4 {
    let half_width = width as f32 * 0.5;
    let half_height = height as f32 * 0.5;
    Mat4::from_translation(Vec3::new(half_width, half_height, 0.0))
        * Mat4::from_scale(Vec3::new(half_width, -half_height, 1.0))
}

/// Projects a triangle with clip-space corners `clip` to screen space.
///
/// Returns None when the triangle is degenerate, back-facing (counter-clockwise in NDC is
/// front-facing) or covers no pixel of the `resolution`-sized viewport.
pub fn setup_triangle(
    clip: [Vec4; 3],
    vertices: [VertexRef; 3],
    source: &Triangle,
    raster: &Mat4,
    resolution: IVec2,
) -> Option<RasterTriangle> {
    let recip_w = Vec3A::new(1.0 / clip[0].w, 1.0 / clip[1].w, 1.0 / clip[2].w);

    let screen: [Vec3A; 3] = std::array::from_fn(|k| {
        let ndc = Vec3A::from_vec4(clip[k]) * recip_w[k];
        raster.transform_point3a(ndc)
    });
    let p = screen.map(|s| Vec2::new(s.x, s.y));

    // Edge k is the one opposite corner k
    let edges = [
        EdgeFunction::from_edge(p[1], p[2]),
        EdgeFunction::from_edge(p[2], p[0]),
        EdgeFunction::from_edge(p[0], p[1]),
    ];
    let area = edges[0].c + edges[1].c + edges[2].c;
    // Also rejects NaN from vertices on the w = 0 plane
    if !(area > 0.0) {
        return None;
    }
    let recip_area = 1.0 / area;

    let min = p[0].min(p[1]).min(p[2]).floor();
    let max = p[0].max(p[1]).max(p[2]).ceil();
    let bbox_min = min.as_ivec2().max(IVec2::ZERO);
    let bbox_max = max.as_ivec2().min(resolution);
    if bbox_min.x >= bbox_max.x || bbox_min.y >= bbox_max.y {
        return None;
    }

    Some(RasterTriangle {
        screen,
        recip_w,
        edges: edges.map(|e| e.scaled(recip_area)),
        recip_area,
        bbox_min,
        bbox_max,
        material: source.material,
        normal: source.normal,
        vertices,
    })
}

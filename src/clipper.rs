use glam::{IVec2, Mat4, Vec3A, Vec4};
use std::ops::AddAssign;

use crate::scene::Triangle;
use crate::triangle::{RasterTriangle, VertexRef, setup_triangle};
use crate::vertex::{ProjectedVertex, Varyings};

// Outcode bits, set when a clip-space point violates the plane
pub const OUTSIDE_LEFT: u8 = 1 << 0; // x < -w
pub const OUTSIDE_RIGHT: u8 = 1 << 1; // x > w
pub const OUTSIDE_BOTTOM: u8 = 1 << 2; // y < -w
pub const OUTSIDE_TOP: u8 = 1 << 3; // y > w
pub const OUTSIDE_NEAR: u8 = 1 << 4; // z < -w
pub const OUTSIDE_FAR: u8 = 1 << 5; // z > w

// Frustum planes in clip space, indexed by outcode bit. A point is inside when dot >= 0.
const PLANES: [Vec4; 6] = [
    Vec4::new(1.0, 0.0, 0.0, 1.0),  // Left:   x + w >= 0
    Vec4::new(-1.0, 0.0, 0.0, 1.0), // Right: -x + w >= 0
    Vec4::new(0.0, 1.0, 0.0, 1.0),  // Bottom: y + w >= 0
    Vec4::new(0.0, -1.0, 0.0, 1.0), // Top:   -y + w >= 0
    Vec4::new(0.0, 0.0, 1.0, 1.0),  // Near:   z + w >= 0
    Vec4::new(0.0, 0.0, -1.0, 1.0), // Far:   -z + w >= 0
];

// A triangle gains at most one point per clip plane
pub const MAX_POLYGON_POINTS: usize = 3 + 6;

pub fn outcode(p: Vec4) -> u8 {
    let mut code = 0;
    if p.x < -p.w {
        code |= OUTSIDE_LEFT;
    }
    if p.x > p.w {
        code |= OUTSIDE_RIGHT;
    }
    if p.y < -p.w {
        code |= OUTSIDE_BOTTOM;
    }
    if p.y > p.w {
        code |= OUTSIDE_TOP;
    }
    if p.z < -p.w {
        code |= OUTSIDE_NEAR;
    }
    if p.z > p.w {
        code |= OUTSIDE_FAR;
    }
    code
}

/// A clip polygon point. `bary` holds its weights relative to the three corners of the
/// triangle the polygon was cut from, so exactly `e_k` for an untouched corner `k`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ClipPoint {
    pub clip: Vec4,
    pub bary: Vec3A,
}

impl ClipPoint {
    const EMPTY: ClipPoint = ClipPoint {
        clip: Vec4::ZERO,
        bary: Vec3A::ZERO,
    };

    fn lerp(self, other: ClipPoint, t: f32) -> ClipPoint {
        ClipPoint {
            clip: self.clip + (other.clip - self.clip) * t,
            bary: self.bary + (other.bary - self.bary) * t,
        }
    }

    // Index of the source corner this point is, if it is one
    pub fn source_corner(&self) -> Option<usize> {
        (0..3).find(|&k| self.bary[k] == 1.0)
    }
}

#[derive(Debug, Clone)]
pub struct Polygon {
    points: [ClipPoint; MAX_POLYGON_POINTS],
    len: usize,
}

impl Default for Polygon {
    fn default() -> Self {
        Self {
            points: [ClipPoint::EMPTY; MAX_POLYGON_POINTS],
            len: 0,
        }
    }
}

impl Polygon {
    pub fn from_triangle(clip: [Vec4; 3]) -> Self {
        let mut polygon = Self::default();
        polygon.reset_to_triangle(clip);
        polygon
    }

    fn reset_to_triangle(&mut self, clip: [Vec4; 3]) {
        self.points[0] = ClipPoint {
            clip: clip[0],
            bary: Vec3A::X,
        };
        self.points[1] = ClipPoint {
            clip: clip[1],
            bary: Vec3A::Y,
        };
        self.points[2] = ClipPoint {
            clip: clip[2],
            bary: Vec3A::Z,
        };
        self.len = 3;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn points(&self) -> &[ClipPoint] {
        &self.points[..self.len]
    }

    // Returns false when the polygon is full
    fn push(&mut self, point: ClipPoint) -> bool {
        if self.len == MAX_POLYGON_POINTS {
            return false;
        }
        self.points[self.len] = point;
        self.len += 1;
        true
    }

    /// Clips against one plane into `output` (Sutherland–Hodgman). Returns false if the result
    /// overflowed, which only numerically broken input can cause.
    fn clip_against(&self, plane: Vec4, output: &mut Polygon) -> bool {
        output.len = 0;
        let n = self.len;
        for i in 0..n {
            let previous = self.points[(i + n - 1) % n];
            let current = self.points[i];
            let d_previous = plane.dot(previous.clip);
            let d_current = plane.dot(current.clip);
            let previous_in = d_previous >= 0.0;
            let current_in = d_current >= 0.0;

            if previous_in != current_in {
                let t = d_previous / (d_previous - d_current);
                if !output.push(previous.lerp(current, t)) {
                    return false;
                }
            }
            if current_in && !output.push(current) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipOutcome {
    /// All corners inside, the triangle needs no clipping
    Inside,
    /// All corners outside one shared plane
    Outside,
    /// The polygon holds the clipped result, possibly fewer than 3 points
    Clipped,
    /// A surviving point had w <= 0, or the polygon overflowed
    Rejected,
}

/// Classifies `clip` against the frustum and, when it straddles planes, clips it into
/// `polygon` using `scratch` as the second buffer.
pub fn clip_triangle(clip: [Vec4; 3], polygon: &mut Polygon, scratch: &mut Polygon) -> ClipOutcome {
    let codes = clip.map(outcode);
    if codes[0] | codes[1] | codes[2] == 0 {
        return ClipOutcome::Inside;
    }
    if codes[0] & codes[1] & codes[2] != 0 {
        return ClipOutcome::Outside;
    }

    // Only the planes the corners disagree on can cut the triangle
    let planes = (codes[0] ^ codes[1]) | (codes[1] ^ codes[2]) | (codes[2] ^ codes[0]);

    polygon.reset_to_triangle(clip);
    for (bit, plane) in PLANES.iter().enumerate() {
        if planes & (1 << bit) == 0 {
            continue;
        }
        if !polygon.clip_against(*plane, scratch) {
            return ClipOutcome::Rejected;
        }
        std::mem::swap(polygon, scratch);
        if polygon.len < 3 {
            return ClipOutcome::Clipped;
        }
    }

    // Clipping against z >= -w should make this unreachable
    if polygon.points().iter().any(|p| p.clip.w <= 0.0) {
        return ClipOutcome::Rejected;
    }
    ClipOutcome::Clipped
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClipStats {
    pub input: usize,
    pub trivially_accepted: usize,
    pub clipped: usize,
    pub culled_outside: usize,
    pub culled_facing: usize,
    pub rejected_behind_eye: usize,
    pub emitted: usize,
    pub vertices_created: usize,
}

impl AddAssign for ClipStats {
    fn add_assign(&mut self, rhs: ClipStats) {
        self.input += rhs.input;
        self.trivially_accepted += rhs.trivially_accepted;
        self.clipped += rhs.clipped;
        self.culled_outside += rhs.culled_outside;
        self.culled_facing += rhs.culled_facing;
        self.rejected_behind_eye += rhs.rejected_behind_eye;
        self.emitted += rhs.emitted;
        self.vertices_created += rhs.vertices_created;
    }
}

/// Output of one clipping job. Only the job that owns a bucket writes to it.
#[derive(Default)]
pub struct ClipBucket {
    pub triangles: Vec<RasterTriangle>,
    /// Vertices created by clipping, referenced through `VertexRef::Local`
    pub vertices: Vec<ProjectedVertex>,
    pub stats: ClipStats,
}

impl ClipBucket {
    pub fn clear(&mut self) {
        self.triangles.clear();
        self.vertices.clear();
        self.stats = ClipStats::default();
    }

    #[inline]
    pub fn resolve<'a>(
        &'a self,
        shared: &'a [ProjectedVertex],
        vertex: VertexRef,
    ) -> &'a ProjectedVertex {
        match vertex {
            VertexRef::Shared(index) => &shared[index as usize],
            VertexRef::Local(index) => &self.vertices[index as usize],
        }
    }
}

/// Turns scene triangles into raster triangles for one frame.
pub struct Clipper<'a> {
    pub projected: &'a [ProjectedVertex],
    pub raster: Mat4,
    pub resolution: IVec2,
}

impl Clipper<'_> {
    pub fn process_range(&self, triangles: &[Triangle], bucket: &mut ClipBucket) {
        let mut polygon = Polygon::default();
        let mut scratch = Polygon::default();
        for triangle in triangles {
            self.process_triangle(triangle, bucket, &mut polygon, &mut scratch);
        }
    }

    fn process_triangle(
        &self,
        triangle: &Triangle,
        bucket: &mut ClipBucket,
        polygon: &mut Polygon,
        scratch: &mut Polygon,
    ) {
        bucket.stats.input += 1;

        // Malformed indices drop the triangle rather than the frame
        let Some(corners) = self.corners(triangle) else {
            bucket.stats.culled_outside += 1;
            return;
        };
        let clip = corners.map(|v| v.clip);

        match clip_triangle(clip, polygon, scratch) {
            ClipOutcome::Inside => {
                bucket.stats.trivially_accepted += 1;
                let refs = triangle.indices.map(VertexRef::Shared);
                self.emit(clip, refs, triangle, bucket);
            }
            ClipOutcome::Outside => bucket.stats.culled_outside += 1,
            ClipOutcome::Rejected => bucket.stats.rejected_behind_eye += 1,
            ClipOutcome::Clipped => {
                if polygon.len() < 3 {
                    bucket.stats.culled_outside += 1;
                    return;
                }
                bucket.stats.clipped += 1;

                // Resolve every polygon point to a projected vertex once, then fan
                let mut refs = [VertexRef::Shared(0); MAX_POLYGON_POINTS];
                for (slot, point) in refs.iter_mut().zip(polygon.points()) {
                    *slot = match point.source_corner() {
                        Some(k) => VertexRef::Shared(triangle.indices[k]),
                        None => {
                            let varyings =
                                Varyings::blend(corners.map(|v| &v.varyings), point.bary);
                            bucket.vertices.push(ProjectedVertex {
                                clip: point.clip,
                                varyings,
                            });
                            bucket.stats.vertices_created += 1;
                            VertexRef::Local((bucket.vertices.len() - 1) as u32)
                        }
                    };
                }

                let points = polygon.points();
                for i in 2..points.len() {
                    let fan = [0, i - 1, i];
                    let clip = fan.map(|k| points[k].clip);
                    self.emit(clip, fan.map(|k| refs[k]), triangle, bucket);
                }
            }
        }
    }

    fn corners(&self, triangle: &Triangle) -> Option<[&ProjectedVertex; 3]> {
        let [i0, i1, i2] = triangle.indices;
        Some([
            self.projected.get(i0 as usize)?,
            self.projected.get(i1 as usize)?,
            self.projected.get(i2 as usize)?,
        ])
    }

    fn emit(
        &self,
        clip: [Vec4; 3],
        refs: [VertexRef; 3],
        triangle: &Triangle,
        bucket: &mut ClipBucket,
    ) {
        match setup_triangle(clip, refs, triangle, &self.raster, self.resolution) {
            Some(raster_triangle) => {
                bucket.triangles.push(raster_triangle);
                bucket.stats.emitted += 1;
            }
            None => bucket.stats.culled_facing += 1,
        }
    }
}

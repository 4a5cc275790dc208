use glam::{Mat3A, Mat4, Vec2, Vec3A, Vec4};
use std::ops::{Add, Mul};

use crate::scene::Vertex;

// Vertices transformed per job
pub const VERTEX_CHUNK_SIZE: usize = 512;

/// Per-vertex attributes carried through clipping and interpolated per pixel.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct Varyings {
    pub world: Vec3A,
    pub uv: Vec2,
    pub normal: Vec3A,
}

impl Add for Varyings {
    type Output = Varyings;

    fn add(self, rhs: Varyings) -> Varyings {
        Varyings {
            world: self.world + rhs.world,
            uv: self.uv + rhs.uv,
            normal: self.normal + rhs.normal,
        }
    }
}

impl Mul<f32> for Varyings {
    type Output = Varyings;

    fn mul(self, rhs: f32) -> Varyings {
        Varyings {
            world: self.world * rhs,
            uv: self.uv * rhs,
            normal: self.normal * rhs,
        }
    }
}

impl Varyings {
    // Weighted sum of three varyings, weights packed in a Vec3A
    pub fn blend(v: [&Varyings; 3], weights: Vec3A) -> Varyings {
        *v[0] * weights.x + *v[1] * weights.y + *v[2] * weights.z
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ProjectedVertex {
    pub clip: Vec4,
    pub varyings: Varyings,
}

impl Default for ProjectedVertex {
    fn default() -> Self {
        Self {
            clip: Vec4::ZERO,
            varyings: Varyings::default(),
        }
    }
}

/// The transform applied by the vertex stage.
#[derive(Debug, Clone, Copy)]
pub enum VertexTransform {
    /// Vertices are already in world space; one matrix takes them to clip space.
    WorldToClip(Mat4),
    /// Vertices are in model space. Positions go to world space through `model`, normals through
    /// its inverse-transpose.
    ModelToClip {
        model: Mat4,
        model_view_projection: Mat4,
        normal_matrix: Mat3A,
    },
}

impl VertexTransform {
    pub fn from_view_projection(view_projection: Mat4) -> Self {
        VertexTransform::WorldToClip(view_projection)
    }

    pub fn with_model(model: Mat4, view_projection: Mat4) -> Self {
        VertexTransform::ModelToClip {
            model,
            model_view_projection: view_projection * model,
            normal_matrix: Mat3A::from_mat4(model).inverse().transpose(),
        }
    }

    #[inline]
    pub fn process(&self, vertex: &Vertex) -> ProjectedVertex {
        match self {
            VertexTransform::WorldToClip(matrix) => ProjectedVertex {
                clip: *matrix * vertex.position.extend(1.0),
                varyings: Varyings {
                    world: vertex.position,
                    uv: vertex.uv,
                    normal: vertex.normal,
                },
            },
            VertexTransform::ModelToClip {
                model,
                model_view_projection,
                normal_matrix,
            } => {
                let position = vertex.position.extend(1.0);
                ProjectedVertex {
                    clip: *model_view_projection * position,
                    varyings: Varyings {
                        world: model.transform_point3a(vertex.position),
                        uv: vertex.uv,
                        normal: (*normal_matrix * vertex.normal).normalize_or_zero(),
                    },
                }
            }
        }
    }

    // Transforms one contiguous chunk, `output` and `input` have the same length
    pub fn process_chunk(&self, input: &[Vertex], output: &mut [ProjectedVertex]) {
        debug_assert_eq!(input.len(), output.len());
        for (out, vertex) in output.iter_mut().zip(input) {
            *out = self.process(vertex);
        }
    }
}

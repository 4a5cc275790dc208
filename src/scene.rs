use glam::{Vec2, Vec3A, Vec4};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

use crate::texture::Texture;

#[derive(Debug)]
pub enum SceneError {
    MissingData(String),
    InvalidData(String),
}

impl fmt::Display for SceneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SceneError::MissingData(msg) => write!(f, "Missing data: {}", msg),
            SceneError::InvalidData(msg) => write!(f, "Invalid data: {}", msg),
        }
    }
}

impl Error for SceneError {}
pub type SceneResult<T> = Result<T, SceneError>;

/// A world-space vertex. Two vertices are the same vertex when all of their fields compare
/// equal, so `0.0` and `-0.0` match.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Vertex {
    pub position: Vec3A,
    pub uv: Vec2,
    pub normal: Vec3A,
}

impl Vertex {
    pub fn new(position: Vec3A, uv: Vec2, normal: Vec3A) -> Self {
        Self {
            position,
            uv,
            normal,
        }
    }
}

// Bit pattern of a vertex, used as the dedup key
#[derive(PartialEq, Eq, Hash)]
struct VertexKey([u32; 8]);

// Adding +0.0 turns -0.0 into +0.0 and leaves every other value alone
#[inline]
fn key_bits(value: f32) -> u32 {
    (value + 0.0).to_bits()
}

impl From<&Vertex> for VertexKey {
    fn from(v: &Vertex) -> Self {
        VertexKey(
            [
                v.position.x,
                v.position.y,
                v.position.z,
                v.uv.x,
                v.uv.y,
                v.normal.x,
                v.normal.y,
                v.normal.z,
            ]
            .map(key_bits),
        )
    }
}

#[derive(Debug, Copy, Clone)]
pub struct Triangle {
    pub indices: [u32; 3],
    pub normal: Vec3A, // Flat face normal
    pub material: u32,
}

pub struct Material {
    pub name: Option<String>,
    pub base_color_factor: Vec4,
    pub base_color_texture: Option<Arc<Texture>>,
}

impl Material {
    pub fn from_color(color: Vec4) -> Self {
        Self {
            name: None,
            base_color_factor: color,
            base_color_texture: None,
        }
    }

    pub fn textured(color: Vec4, texture: Arc<Texture>) -> Self {
        Self {
            name: None,
            base_color_factor: color,
            base_color_texture: Some(texture),
        }
    }

    pub fn named(self, name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..self
        }
    }
}

impl Default for Material {
    fn default() -> Self {
        Self::from_color(Vec4::new(0.8, 0.8, 0.8, 1.0))
    }
}

pub struct Light {
    pub direction: Vec3A, // Direction towards the light
    pub color: Vec3A,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            direction: Vec3A::new(0.4, 1.0, 0.6).normalize(),
            color: Vec3A::ONE,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SceneBounds {
    pub min: Vec3A,
    pub max: Vec3A,
    pub center: Vec3A,
    pub diagonal: f32,
}

impl SceneBounds {
    fn new_empty() -> Self {
        Self {
            min: Vec3A::INFINITY,
            max: Vec3A::NEG_INFINITY,
            center: Vec3A::ZERO,
            diagonal: 0.0,
        }
    }

    fn grow(&mut self, point: Vec3A) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    fn finish(&mut self) {
        if self.min.cmple(self.max).all() {
            self.center = (self.min + self.max) * 0.5;
            self.diagonal = (self.max - self.min).length();
        } else {
            *self = Self {
                min: Vec3A::ZERO,
                max: Vec3A::ZERO,
                center: Vec3A::ZERO,
                diagonal: 0.0,
            };
        }
    }
}

/// Geometry the rasterizer consumes. Written once at load time and read-only while rendering.
pub struct Scene {
    pub vertices: Vec<Vertex>,
    pub triangles: Vec<Triangle>,
    pub materials: Vec<Material>,
    pub light: Light,
    pub bounds: SceneBounds,
}

impl Scene {
    pub fn empty() -> Self {
        SceneBuilder::new().build()
    }

    /// Assembles a scene from flat attribute arrays and a triangle index list.
    ///
    /// `material_ids` holds one entry per triangle; when absent every triangle uses material 0.
    pub fn from_indexed(
        positions: &[Vec3A],
        uvs: &[Vec2],
        normals: &[Vec3A],
        indices: &[u32],
        material_ids: Option<&[u32]>,
        materials: Vec<Material>,
    ) -> SceneResult<Self> {
        if uvs.len() != positions.len() || normals.len() != positions.len() {
            return Err(SceneError::InvalidData(format!(
                "Attribute count mismatch: {} positions, {} uvs, {} normals",
                positions.len(),
                uvs.len(),
                normals.len()
            )));
        }
        if indices.len() % 3 != 0 {
            return Err(SceneError::InvalidData(format!(
                "Index count {} is not a multiple of 3",
                indices.len()
            )));
        }
        if let Some(&index) = indices.iter().find(|&&i| i as usize >= positions.len()) {
            return Err(SceneError::InvalidData(format!(
                "Index {} out of range for {} vertices",
                index,
                positions.len()
            )));
        }

        let triangle_count = indices.len() / 3;
        if let Some(ids) = material_ids {
            if ids.len() != triangle_count {
                return Err(SceneError::MissingData(format!(
                    "{} material ids for {} triangles",
                    ids.len(),
                    triangle_count
                )));
            }
        }

        let mut builder = SceneBuilder::new();
        for material in materials {
            builder.add_material(material);
        }
        for (triangle_index, corner_indices) in indices.chunks_exact(3).enumerate() {
            let corners = [0, 1, 2].map(|k| {
                let i = corner_indices[k] as usize;
                Vertex::new(positions[i], uvs[i], normals[i])
            });
            let material = material_ids.map(|ids| ids[triangle_index]).unwrap_or(0);
            builder.add_triangle(corners, material);
        }
        Ok(builder.build())
    }

    // Falls back to a default material for out-of-range ids
    pub fn material(&self, id: u32) -> &Material {
        static DEFAULT: std::sync::LazyLock<Material> = std::sync::LazyLock::new(Material::default);
        self.materials.get(id as usize).unwrap_or(&DEFAULT)
    }

    /// A ground plane with a checkerboard texture and a handful of colored boxes around the
    /// origin. Used by the demo binary, the benchmarks and the pipeline tests.
    pub fn demo() -> Self {
        let mut builder = SceneBuilder::new();
        let checker = Arc::new(Texture::checkerboard(64, 8, 90, 220));
        let ground = builder.add_material(Material::textured(Vec4::ONE, checker).named("ground"));
        let red = Material::from_color(Vec4::new(0.9, 0.2, 0.15, 1.0)).named("red");
        let green = Material::from_color(Vec4::new(0.2, 0.8, 0.3, 1.0)).named("green");
        let blue = Material::from_color(Vec4::new(0.2, 0.35, 0.9, 1.0)).named("blue");
        let [red, green, blue] = [red, green, blue].map(|material| builder.add_material(material));
        // Low evening sun from the front left
        builder.set_light(Light {
            direction: Vec3A::new(-0.5, 0.8, 0.6).normalize(),
            color: Vec3A::new(1.0, 0.95, 0.85),
        });

        builder.add_plane(Vec3A::ZERO, 12.0, 6.0, ground);
        builder.add_box(Vec3A::new(0.0, 1.0, 0.0), Vec3A::splat(1.0), red);
        let tall = Vec3A::new(0.75, 0.75, 1.25);
        builder.add_box(Vec3A::new(-3.0, 0.75, 1.5), tall, green);
        builder.add_box(Vec3A::new(2.5, 0.5, -2.0), Vec3A::new(1.5, 0.5, 0.5), blue);
        builder.add_box(Vec3A::new(1.5, 2.75, 1.0), Vec3A::splat(0.35), green);
        builder.build()
    }
}

/// Accumulates deduplicated vertices and triangles.
pub struct SceneBuilder {
    vertices: Vec<Vertex>,
    lookup: HashMap<VertexKey, u32>,
    triangles: Vec<Triangle>,
    materials: Vec<Material>,
    light: Light,
}

impl Default for SceneBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneBuilder {
    pub fn new() -> Self {
        Self {
            vertices: Vec::new(),
            lookup: HashMap::new(),
            triangles: Vec::new(),
            materials: Vec::new(),
            light: Light::default(),
        }
    }

    pub fn add_material(&mut self, material: Material) -> u32 {
        self.materials.push(material);
        (self.materials.len() - 1) as u32
    }

    pub fn set_light(&mut self, light: Light) {
        self.light = light;
    }

    pub fn add_vertex(&mut self, vertex: Vertex) -> u32 {
        let next_index = self.vertices.len() as u32;
        let index = *self.lookup.entry(VertexKey::from(&vertex)).or_insert(next_index);
        if index == next_index {
            self.vertices.push(vertex);
        }
        index
    }

    // Counter-clockwise corners produce a face normal pointing towards the viewer
    pub fn add_triangle(&mut self, corners: [Vertex; 3], material: u32) {
        let normal = (corners[1].position - corners[0].position)
            .cross(corners[2].position - corners[0].position)
            .normalize_or_zero();
        let indices = corners.map(|corner| self.add_vertex(corner));
        self.triangles.push(Triangle {
            indices,
            normal,
            material,
        });
    }

    pub fn add_quad(&mut self, corners: [Vertex; 4], material: u32) {
        self.add_triangle([corners[0], corners[1], corners[2]], material);
        self.add_triangle([corners[0], corners[2], corners[3]], material);
    }

    // Adds an axis-aligned quad facing `normal`, spanned by `u` and `v` (u x v == normal)
    fn add_face(
        &mut self,
        center: Vec3A,
        half_extents: Vec3A,
        normal: Vec3A,
        u: Vec3A,
        v: Vec3A,
        uv_scale: f32,
        material: u32,
    ) {
        let corner = |su: f32, sv: f32| center + (normal + u * su + v * sv) * half_extents;
        let uv = |x: f32, y: f32| Vec2::new(x, y) * uv_scale;
        self.add_quad(
            [
                Vertex::new(corner(-1.0, -1.0), uv(0.0, 1.0), normal),
                Vertex::new(corner(1.0, -1.0), uv(1.0, 1.0), normal),
                Vertex::new(corner(1.0, 1.0), uv(1.0, 0.0), normal),
                Vertex::new(corner(-1.0, 1.0), uv(0.0, 0.0), normal),
            ],
            material,
        );
    }

    pub fn add_box(&mut self, center: Vec3A, half_extents: Vec3A, material: u32) {
        const FACES: [(Vec3A, Vec3A, Vec3A); 6] = [
            (Vec3A::X, Vec3A::NEG_Z, Vec3A::Y),
            (Vec3A::NEG_X, Vec3A::Z, Vec3A::Y),
            (Vec3A::Y, Vec3A::X, Vec3A::NEG_Z),
            (Vec3A::NEG_Y, Vec3A::X, Vec3A::Z),
            (Vec3A::Z, Vec3A::X, Vec3A::Y),
            (Vec3A::NEG_Z, Vec3A::NEG_X, Vec3A::Y),
        ];
        for (normal, u, v) in FACES {
            self.add_face(center, half_extents, normal, u, v, 1.0, material);
        }
    }

    // Horizontal square facing +Y
    pub fn add_plane(&mut self, center: Vec3A, half_size: f32, uv_scale: f32, material: u32) {
        let half_extents = Vec3A::new(half_size, 0.0, half_size);
        self.add_face(
            center,
            half_extents,
            Vec3A::Y,
            Vec3A::X,
            Vec3A::NEG_Z,
            uv_scale,
            material,
        );
    }

    pub fn build(self) -> Scene {
        let mut bounds = SceneBounds::new_empty();
        for vertex in &self.vertices {
            bounds.grow(vertex.position);
        }
        bounds.finish();

        Scene {
            vertices: self.vertices,
            triangles: self.triangles,
            materials: self.materials,
            light: self.light,
            bounds,
        }
    }
}

use glam::{Vec2, Vec4};
use std::path::Path;

use crate::scene::{SceneError, SceneResult};

pub struct Texture {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>, // RGBA8 data
    pub sampler: Sampler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapMode {
    Repeat,
    MirroredRepeat,
    ClampToEdge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy)]
pub struct Sampler {
    pub wrap_s: WrapMode,
    pub wrap_t: WrapMode,
}

impl Default for Sampler {
    fn default() -> Self {
        Self {
            wrap_s: WrapMode::Repeat,
            wrap_t: WrapMode::Repeat,
        }
    }
}

// Wraps an integer texel coordinate into [0, size)
fn wrap_texel(coord: i32, size: u32, mode: WrapMode) -> u32 {
    let size = size as i32;
    let wrapped = match mode {
        WrapMode::ClampToEdge => coord.clamp(0, size - 1),
        WrapMode::Repeat => coord.rem_euclid(size),
        WrapMode::MirroredRepeat => {
            let period = coord.rem_euclid(size * 2);
            if period < size {
                period
            } else {
                size * 2 - 1 - period
            }
        }
    };
    wrapped as u32
}

impl Texture {
    pub fn from_rgba8(width: u32, height: u32, data: Vec<u8>) -> SceneResult<Self> {
        if width == 0 || height == 0 {
            return Err(SceneError::InvalidData(format!(
                "Texture has zero size {}x{}",
                width, height
            )));
        }
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(SceneError::InvalidData(format!(
                "Texture data is {} bytes, expected {} for {}x{} RGBA8",
                data.len(),
                expected,
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            data,
            sampler: Sampler::default(),
        })
    }

    pub fn load(path: &Path) -> SceneResult<Self> {
        match image::open(path) {
            Ok(img) => {
                let rgba = img.to_rgba8();
                let (width, height) = rgba.dimensions();
                Self::from_rgba8(width, height, rgba.into_raw())
            }
            Err(e) => Err(SceneError::MissingData(format!(
                "Could not load texture from path '{}': {}",
                path.display(),
                e
            ))),
        }
    }

    // Simple checkerboard pattern, also used as a fallback when loading fails
    pub fn checkerboard(size: u32, cell: u32, dark: u8, light: u8) -> Self {
        let size = size.max(1);
        let cell = cell.max(1);
        let mut data = Vec::with_capacity((size * size * 4) as usize);
        for y in 0..size {
            for x in 0..size {
                let is_checker = ((x / cell) + (y / cell)) % 2 == 0;
                let color = if is_checker { light } else { dark };
                data.extend_from_slice(&[color, color, color, 255]);
            }
        }
        Self {
            width: size,
            height: size,
            data,
            sampler: Sampler::default(),
        }
    }

    pub fn load_or_checkerboard(path: &Path) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            log::warn!("{}, using checkerboard", e);
            Self::checkerboard(64, 8, 128, 255)
        })
    }

    pub fn texel(&self, x: u32, y: u32) -> Vec4 {
        let index = ((y * self.width + x) * 4) as usize;
        let rgba = &self.data[index..index + 4];
        Vec4::new(
            rgba[0] as f32,
            rgba[1] as f32,
            rgba[2] as f32,
            rgba[3] as f32,
        ) / 255.0
    }

    pub fn sample(&self, uv: Vec2, filter: Filter) -> Vec4 {
        match filter {
            Filter::Nearest => self.sample_nearest(uv),
            Filter::Linear => self.sample_bilinear(uv),
        }
    }

    fn sample_nearest(&self, uv: Vec2) -> Vec4 {
        let x = (uv.x * self.width as f32).floor() as i32;
        let y = (uv.y * self.height as f32).floor() as i32;
        self.texel(
            wrap_texel(x, self.width, self.sampler.wrap_s),
            wrap_texel(y, self.height, self.sampler.wrap_t),
        )
    }

    fn sample_bilinear(&self, uv: Vec2) -> Vec4 {
        // Texel centers sit at half-integer coordinates
        let x = uv.x * self.width as f32 - 0.5;
        let y = uv.y * self.height as f32 - 0.5;
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;

        let (x0, y0) = (x0 as i32, y0 as i32);
        let xa = wrap_texel(x0, self.width, self.sampler.wrap_s);
        let xb = wrap_texel(x0 + 1, self.width, self.sampler.wrap_s);
        let ya = wrap_texel(y0, self.height, self.sampler.wrap_t);
        let yb = wrap_texel(y0 + 1, self.height, self.sampler.wrap_t);

        let top = self.texel(xa, ya).lerp(self.texel(xb, ya), fx);
        let bottom = self.texel(xa, yb).lerp(self.texel(xb, yb), fx);
        top.lerp(bottom, fy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_by_one(left: u8, right: u8) -> Texture {
        Texture::from_rgba8(2, 1, vec![left, left, left, 255, right, right, right, 255]).unwrap()
    }

    #[test]
    fn wrap_modes_map_into_range() {
        assert_eq!(wrap_texel(-1, 4, WrapMode::Repeat), 3);
        assert_eq!(wrap_texel(5, 4, WrapMode::Repeat), 1);
        assert_eq!(wrap_texel(-1, 4, WrapMode::ClampToEdge), 0);
        assert_eq!(wrap_texel(9, 4, WrapMode::ClampToEdge), 3);
        assert_eq!(wrap_texel(4, 4, WrapMode::MirroredRepeat), 3);
        assert_eq!(wrap_texel(-1, 4, WrapMode::MirroredRepeat), 0);
    }

    #[test]
    fn bilinear_blends_between_texel_centers() {
        let mut texture = two_by_one(0, 255);
        texture.sampler.wrap_s = WrapMode::ClampToEdge;
        // Halfway between the two texel centers
        let mid = texture.sample(Vec2::new(0.5, 0.5), Filter::Linear);
        assert!((mid.x - 0.5).abs() < 1e-5);
        // On a texel center, bilinear equals nearest
        let left = texture.sample(Vec2::new(0.25, 0.5), Filter::Linear);
        assert!(left.x.abs() < 1e-5);
        assert_eq!(texture.sample(Vec2::new(0.3, 0.5), Filter::Nearest).x, 0.0);
        assert_eq!(texture.sample(Vec2::new(0.7, 0.5), Filter::Nearest).x, 1.0);
    }

    #[test]
    fn rejects_mismatched_data() {
        assert!(Texture::from_rgba8(2, 2, vec![0; 8]).is_err());
        assert!(Texture::from_rgba8(0, 2, vec![]).is_err());
    }
}

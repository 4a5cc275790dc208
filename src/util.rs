use glam::{Vec3A, Vec4};

// Colors are packed as 0xRRGGBBAA

pub fn rgba8_pack_vec4(color: Vec4) -> u32 {
    let color = color.clamp(Vec4::ZERO, Vec4::ONE);
    (((color.x * 255.0 + 0.5) as u32) << 24)
        | (((color.y * 255.0 + 0.5) as u32) << 16)
        | (((color.z * 255.0 + 0.5) as u32) << 8)
        | ((color.w * 255.0 + 0.5) as u32)
}

pub fn rgba8_pack_u8(r: u8, g: u8, b: u8, a: u8) -> u32 {
    ((r as u32) << 24) | ((g as u32) << 16) | ((b as u32) << 8) | (a as u32)
}

pub fn rgba8_unpack_u8(rgba8: u32) -> (u8, u8, u8, u8) {
    (
        (rgba8 >> 24) as u8,
        (rgba8 >> 16) as u8,
        (rgba8 >> 8) as u8,
        rgba8 as u8,
    )
}

pub fn srgb_to_linear_scalar(scalar: f32) -> f32 {
    if scalar <= 0.04045 {
        scalar / 12.92
    } else {
        f32::powf((scalar + 0.055) / 1.055, 2.4)
    }
}

pub fn linear_to_srgb_scalar(scalar: f32) -> f32 {
    if scalar <= 0.0031308 {
        scalar * 12.92
    } else {
        f32::powf(scalar, 1.0 / 2.4) * 1.055 - 0.055
    }
}

pub fn srgb_to_linear(color: Vec4) -> Vec4 {
    Vec4::new(
        srgb_to_linear_scalar(color.x),
        srgb_to_linear_scalar(color.y),
        srgb_to_linear_scalar(color.z),
        color.w,
    )
}

pub fn linear_to_srgb(color: Vec4) -> Vec4 {
    Vec4::new(
        linear_to_srgb_scalar(color.x),
        linear_to_srgb_scalar(color.y),
        linear_to_srgb_scalar(color.z),
        color.w,
    )
}

// Maps a unit vector to a displayable [0, 1] color
pub fn direction_to_color(direction: Vec3A) -> Vec4 {
    (direction * 0.5 + 0.5).extend(1.0)
}

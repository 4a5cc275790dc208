use std::error::Error;
use std::fmt;

use crate::util::rgba8_pack_u8;

// Size (width and height) of raster tiles in pixels
pub const DEFAULT_TILE_SIZE: u32 = 64;

#[derive(Debug, Clone)]
pub enum SettingsError {
    ZeroResolution { width: u32, height: u32 },
    ZeroTileSize,
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::ZeroResolution { width, height } => {
                write!(f, "Invalid render resolution: {}x{}", width, height)
            }
            SettingsError::ZeroTileSize => write!(f, "Tile size must be at least one pixel"),
        }
    }
}

impl Error for SettingsError {}

/// What the fragment stage writes into the color buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebugView {
    #[default]
    Shaded,
    Depth,
    Normals,
}

/// Per-frame configuration of the rasterizer pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSettings {
    pub width: u32,
    pub height: u32,
    pub tile_size: u32,
    /// Bin triangles into tiles and rasterize one tile per job, instead of splitting rows.
    pub tiled: bool,
    /// Depth test on interpolated view-space w instead of NDC z.
    pub w_buffer: bool,
    pub debug_view: DebugView,
    pub wireframe: bool,
    /// Interpolate and renormalize vertex normals; flat face normals otherwise.
    pub smooth_normals: bool,
    pub bilinear: bool,
    pub clear_color: u32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            tile_size: DEFAULT_TILE_SIZE,
            tiled: true,
            w_buffer: false,
            debug_view: DebugView::Shaded,
            wireframe: false,
            smooth_normals: true,
            bilinear: true,
            clear_color: rgba8_pack_u8(0x20, 0x24, 0x2C, 0xFF),
        }
    }
}

impl RenderSettings {
    pub fn with_resolution(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.width == 0 || self.height == 0 {
            return Err(SettingsError::ZeroResolution {
                width: self.width,
                height: self.height,
            });
        }
        if self.tile_size == 0 {
            return Err(SettingsError::ZeroTileSize);
        }
        Ok(())
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

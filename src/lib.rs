//! Tile-based software rasterizer driven by a fixed-size job scheduler.
//!
//! A frame runs as a sequence of stages separated by barriers: background clear, vertex
//! transform, frustum clipping, then either tile binning followed by per-tile rasterization and
//! merge, or scanline rasterization into row bands. Both paths produce identical pixels.

pub mod binning;
pub mod camera;
pub mod clipper;
pub mod fragment;
pub mod framebuffer;
pub mod jobs;
pub mod logging;
pub mod renderer;
pub mod scene;
pub mod settings;
pub mod shader;
pub mod texture;
pub mod triangle;
pub mod util;
pub mod vertex;

pub use camera::{Camera, FrameInput};
pub use framebuffer::FrameBuffer;
pub use jobs::JobScheduler;
pub use renderer::{FrameStats, Renderer};
pub use scene::{Scene, SceneBuilder, SceneError};
pub use settings::{DebugView, RenderSettings, SettingsError};

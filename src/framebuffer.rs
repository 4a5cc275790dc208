use std::ops::Range;

use crate::jobs::partition;

/// Mutable view of a contiguous range of image rows.
pub struct RowBand<'a> {
    pub rows: Range<usize>,
    pub color: &'a mut [u32],
    pub depth: &'a mut [f32],
}

/// Row-major packed color (0xRRGGBBAA) and depth buffers of the render resolution.
pub struct FrameBuffer {
    width: u32,
    height: u32,
    pub color: Vec<u32>,
    pub depth: Vec<f32>,
}

impl FrameBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        let pixel_count = width as usize * height as usize;
        Self {
            width,
            height,
            color: vec![0; pixel_count],
            depth: vec![f32::INFINITY; pixel_count],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Reallocates when the size differs. Returns true if it did.
    pub fn resize(&mut self, width: u32, height: u32) -> bool {
        if self.width == width && self.height == height {
            return false;
        }
        *self = Self::new(width, height);
        true
    }

    pub fn clear(&mut self, color: u32, depth: f32) {
        self.color.fill(color);
        self.depth.fill(depth);
    }

    /// Splits the rows into `parts` bands whose heights differ by at most one. Bands without
    /// rows are left out.
    pub fn row_bands(&mut self, parts: usize) -> Vec<RowBand<'_>> {
        let width = self.width as usize;
        let mut color = self.color.as_mut_slice();
        let mut depth = self.depth.as_mut_slice();
        let mut bands = Vec::with_capacity(parts);
        for rows in partition(self.height as usize, parts) {
            let len = rows.len() * width;
            let (band_color, color_tail) = std::mem::take(&mut color).split_at_mut(len);
            let (band_depth, depth_tail) = std::mem::take(&mut depth).split_at_mut(len);
            color = color_tail;
            depth = depth_tail;
            if !rows.is_empty() {
                bands.push(RowBand {
                    rows,
                    color: band_color,
                    depth: band_depth,
                });
            }
        }
        bands
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    pub fn pixel(&self, x: u32, y: u32) -> u32 {
        self.color[self.index(x, y)]
    }

    pub fn depth_at(&self, x: u32, y: u32) -> f32 {
        self.depth[self.index(x, y)]
    }
}

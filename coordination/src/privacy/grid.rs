//! Block statistics over an RGB frame.
//!
//! The frame is divided into square blocks. Per block we keep the share of
//! skin-tone pixels, the share of edge pixels and luma mean/deviation; region
//! detection and metadata extraction both work on these figures instead of
//! raw pixels.

use image::RgbImage;
use std::collections::VecDeque;

/// Pixel-level gradient (|dx| + |dy| on luma) that counts as an edge.
pub const EDGE_THRESHOLD: f32 = 48.0;

/// Aggregates for one block.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BlockStats {
    pub skin_fraction: f32,
    pub edge_density: f32,
    pub mean_luma: f32,
    pub luma_std: f32,
}

/// Pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Connected group of blocks, in block coordinates (inclusive bounds).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Component {
    pub min_col: u32,
    pub min_row: u32,
    pub max_col: u32,
    pub max_row: u32,
    pub cells: usize,
}

impl Component {
    pub fn cols(&self) -> u32 {
        self.max_col - self.min_col + 1
    }

    pub fn rows(&self) -> u32 {
        self.max_row - self.min_row + 1
    }

    /// Fraction of the bounding box actually covered by member blocks.
    pub fn fill(&self) -> f32 {
        self.cells as f32 / (self.cols() * self.rows()) as f32
    }
}

/// Classic RGB skin rule; deliberately permissive.
pub fn is_skin(r: u8, g: u8, b: u8) -> bool {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    r > 95 && g > 40 && b > 20 && max - min > 15 && (r - g).abs() > 15 && r > g && r > b
}

pub fn luma(r: u8, g: u8, b: u8) -> f32 {
    0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
}

#[derive(Debug, Clone)]
pub struct BlockGrid {
    block_size: u32,
    width: u32,
    height: u32,
    cols: u32,
    rows: u32,
    blocks: Vec<BlockStats>,
    edge_pixels: u64,
    luma_sum: f64,
}

#[derive(Default, Clone, Copy)]
struct Accumulator {
    pixels: u32,
    skin: u32,
    edges: u32,
    luma_sum: f64,
    luma_sq: f64,
}

impl BlockGrid {
    pub fn from_rgb(image: &RgbImage, block_size: u32) -> Self {
        let block_size = block_size.max(1);
        let (width, height) = image.dimensions();
        let cols = width.div_ceil(block_size).max(1);
        let rows = height.div_ceil(block_size).max(1);

        let lumas: Vec<f32> = image.pixels().map(|p| luma(p[0], p[1], p[2])).collect();
        let mut acc = vec![Accumulator::default(); (cols * rows) as usize];
        let mut edge_pixels = 0u64;
        let mut luma_sum = 0f64;

        for (x, y, pixel) in image.enumerate_pixels() {
            let idx = (y * width + x) as usize;
            let l = lumas[idx];
            let dx = if x + 1 < width { (lumas[idx + 1] - l).abs() } else { 0.0 };
            let dy = if y + 1 < height {
                (lumas[idx + width as usize] - l).abs()
            } else {
                0.0
            };
            let edge = dx + dy > EDGE_THRESHOLD;

            let cell = &mut acc[((y / block_size) * cols + x / block_size) as usize];
            cell.pixels += 1;
            cell.luma_sum += l as f64;
            cell.luma_sq += (l as f64) * (l as f64);
            if is_skin(pixel[0], pixel[1], pixel[2]) {
                cell.skin += 1;
            }
            if edge {
                cell.edges += 1;
                edge_pixels += 1;
            }
            luma_sum += l as f64;
        }

        let blocks = acc
            .into_iter()
            .map(|a| {
                if a.pixels == 0 {
                    return BlockStats::default();
                }
                let n = a.pixels as f64;
                let mean = a.luma_sum / n;
                let variance = (a.luma_sq / n - mean * mean).max(0.0);
                BlockStats {
                    skin_fraction: a.skin as f32 / a.pixels as f32,
                    edge_density: a.edges as f32 / a.pixels as f32,
                    mean_luma: mean as f32,
                    luma_std: variance.sqrt() as f32,
                }
            })
            .collect();

        Self {
            block_size,
            width,
            height,
            cols,
            rows,
            blocks,
            edge_pixels,
            luma_sum,
        }
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn block(&self, col: u32, row: u32) -> &BlockStats {
        &self.blocks[(row * self.cols + col) as usize]
    }

    /// Mean luma over the whole frame (0-255).
    pub fn mean_luma(&self) -> f64 {
        let pixels = self.width as u64 * self.height as u64;
        if pixels == 0 {
            0.0
        } else {
            self.luma_sum / pixels as f64
        }
    }

    /// Share of edge pixels over the whole frame.
    pub fn edge_density(&self) -> f64 {
        let pixels = self.width as u64 * self.height as u64;
        if pixels == 0 {
            0.0
        } else {
            self.edge_pixels as f64 / pixels as f64
        }
    }

    /// 4-connected components of blocks matching `predicate`.
    pub fn components(&self, predicate: impl Fn(&BlockStats) -> bool) -> Vec<Component> {
        let mut visited = vec![false; self.blocks.len()];
        let mut found = Vec::new();
        let mut queue = VecDeque::new();

        for start in 0..self.blocks.len() {
            if visited[start] || !predicate(&self.blocks[start]) {
                continue;
            }
            visited[start] = true;
            queue.push_back(start);
            let (sc, sr) = (start as u32 % self.cols, start as u32 / self.cols);
            let mut comp = Component {
                min_col: sc,
                min_row: sr,
                max_col: sc,
                max_row: sr,
                cells: 0,
            };

            while let Some(idx) = queue.pop_front() {
                let col = idx as u32 % self.cols;
                let row = idx as u32 / self.cols;
                comp.cells += 1;
                comp.min_col = comp.min_col.min(col);
                comp.max_col = comp.max_col.max(col);
                comp.min_row = comp.min_row.min(row);
                comp.max_row = comp.max_row.max(row);

                let mut neighbours = Vec::with_capacity(4);
                if col > 0 {
                    neighbours.push(idx - 1);
                }
                if col + 1 < self.cols {
                    neighbours.push(idx + 1);
                }
                if row > 0 {
                    neighbours.push(idx - self.cols as usize);
                }
                if row + 1 < self.rows {
                    neighbours.push(idx + self.cols as usize);
                }
                for next in neighbours {
                    if !visited[next] && predicate(&self.blocks[next]) {
                        visited[next] = true;
                        queue.push_back(next);
                    }
                }
            }
            found.push(comp);
        }
        found
    }

    /// Pixel rectangle covered by a block range, clipped to the frame.
    pub fn region(&self, min_col: u32, min_row: u32, max_col: u32, max_row: u32) -> Region {
        let x = min_col * self.block_size;
        let y = min_row * self.block_size;
        let right = ((max_col + 1) * self.block_size).min(self.width);
        let bottom = ((max_row + 1) * self.block_size).min(self.height);
        Region {
            x,
            y,
            width: right.saturating_sub(x),
            height: bottom.saturating_sub(y),
        }
    }

    pub fn component_region(&self, comp: &Component) -> Region {
        self.region(comp.min_col, comp.min_row, comp.max_col, comp.max_row)
    }
}

//! Face-like and text-like region detection plus in-place blurring.
//!
//! Faces: connected blobs of skin-tone blocks with a plausible aspect ratio.
//! Text: horizontal runs of high-edge, high-contrast blocks, merged across
//! adjacent rows. Both are heuristics tuned to over-blur rather than miss.

use super::grid::{BlockGrid, BlockStats, Component, Region};
use super::{DetectedObject, ObjectKind};
use image::{imageops, RgbImage};
use serde::{Deserialize, Serialize};

/// Detection and blur tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Block edge length in pixels.
    pub block_size: u32,
    /// Minimum skin-pixel share for a block to join a face blob.
    pub face_min_skin: f32,
    /// Minimum blocks in a face blob.
    pub face_min_blocks: usize,
    /// Minimum edge-pixel share for a text block.
    pub text_min_edge: f32,
    /// Minimum luma standard deviation for a text block.
    pub text_min_contrast: f32,
    /// Minimum horizontal run length (blocks) for a text line.
    pub text_min_run: u32,
    /// Gaussian sigma applied to detected regions.
    pub blur_sigma: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            block_size: 16,
            face_min_skin: 0.4,
            face_min_blocks: 2,
            text_min_edge: 0.15,
            text_min_contrast: 40.0,
            text_min_run: 3,
            blur_sigma: 8.0,
        }
    }
}

impl DetectionConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.block_size < 4 {
            return Err(format!("block_size must be at least 4, got {}", self.block_size));
        }
        if !(0.0..=1.0).contains(&self.face_min_skin) || !(0.0..=1.0).contains(&self.text_min_edge) {
            return Err("detection fractions must be within [0, 1]".to_string());
        }
        if self.text_min_run == 0 {
            return Err("text_min_run must be at least 1".to_string());
        }
        if !(self.blur_sigma.is_finite() && self.blur_sigma > 0.0) {
            return Err(format!("blur_sigma must be positive, got {}", self.blur_sigma));
        }
        Ok(())
    }
}

fn mean_over(grid: &BlockGrid, comp: &Component, keep: impl Fn(&BlockStats) -> bool, metric: impl Fn(&BlockStats) -> f32) -> f32 {
    let mut sum = 0.0;
    let mut n = 0u32;
    for row in comp.min_row..=comp.max_row {
        for col in comp.min_col..=comp.max_col {
            let block = grid.block(col, row);
            if keep(block) {
                sum += metric(block);
                n += 1;
            }
        }
    }
    if n == 0 {
        0.0
    } else {
        sum / n as f32
    }
}

/// Skin-tone blobs shaped roughly like a face.
pub fn detect_faces(grid: &BlockGrid, config: &DetectionConfig) -> Vec<DetectedObject> {
    let is_face_block = |b: &BlockStats| b.skin_fraction >= config.face_min_skin;
    grid.components(is_face_block)
        .into_iter()
        .filter(|c| c.cells >= config.face_min_blocks && c.fill() >= 0.4)
        .filter_map(|c| {
            let region = grid.component_region(&c);
            if region.height == 0 {
                return None;
            }
            let aspect = region.width as f32 / region.height as f32;
            (0.4..=2.5).contains(&aspect).then(|| DetectedObject {
                kind: ObjectKind::Face,
                bbox: region,
                confidence: mean_over(grid, &c, is_face_block, |b| b.skin_fraction).min(1.0),
            })
        })
        .collect()
}

/// High-contrast horizontal runs, merged across rows.
pub fn detect_text(grid: &BlockGrid, config: &DetectionConfig) -> Vec<DetectedObject> {
    let is_text_block = |b: &BlockStats| {
        b.edge_density >= config.text_min_edge
            && b.luma_std >= config.text_min_contrast
            && b.skin_fraction < config.face_min_skin
    };

    let mut groups: Vec<Component> = Vec::new();
    for row in 0..grid.rows() {
        let mut col = 0;
        while col < grid.cols() {
            if !is_text_block(grid.block(col, row)) {
                col += 1;
                continue;
            }
            let start = col;
            while col < grid.cols() && is_text_block(grid.block(col, row)) {
                col += 1;
            }
            let end = col - 1;
            if end - start + 1 < config.text_min_run {
                continue;
            }
            let run_cells = (end - start + 1) as usize;
            let adjacent = groups.iter_mut().find(|g| {
                g.max_row + 1 == row && g.min_col <= end && start <= g.max_col
            });
            match adjacent {
                Some(group) => {
                    group.max_row = row;
                    group.min_col = group.min_col.min(start);
                    group.max_col = group.max_col.max(end);
                    group.cells += run_cells;
                }
                None => groups.push(Component {
                    min_col: start,
                    min_row: row,
                    max_col: end,
                    max_row: row,
                    cells: run_cells,
                }),
            }
        }
    }

    groups
        .into_iter()
        .map(|g| DetectedObject {
            kind: ObjectKind::Text,
            bbox: grid.component_region(&g),
            confidence: mean_over(grid, &g, is_text_block, |b| b.edge_density * 2.0).min(1.0),
        })
        .collect()
}

/// Grow `region` by one block on every side, clipped to the frame.
fn padded(region: Region, pad: u32, width: u32, height: u32) -> Region {
    let x = region.x.saturating_sub(pad);
    let y = region.y.saturating_sub(pad);
    let right = (region.x + region.width + pad).min(width);
    let bottom = (region.y + region.height + pad).min(height);
    Region {
        x,
        y,
        width: right.saturating_sub(x),
        height: bottom.saturating_sub(y),
    }
}

/// Gaussian-blur every detected region in place.
pub fn blur_regions(image: &mut RgbImage, objects: &[DetectedObject], config: &DetectionConfig) {
    let (width, height) = image.dimensions();
    for object in objects {
        let area = padded(object.bbox, config.block_size, width, height);
        if area.width == 0 || area.height == 0 {
            continue;
        }
        let patch = imageops::crop_imm(image, area.x, area.y, area.width, area.height).to_image();
        let blurred = imageops::blur(&patch, config.blur_sigma);
        imageops::replace(image, &blurred, area.x as i64, area.y as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    const SKIN: Rgb<u8> = Rgb([220, 170, 140]);
    const BLUE: Rgb<u8> = Rgb([20, 40, 160]);

    fn face_frame() -> RgbImage {
        RgbImage::from_fn(96, 96, |x, y| {
            if (32..64).contains(&x) && (32..64).contains(&y) {
                SKIN
            } else {
                BLUE
            }
        })
    }

    fn text_frame() -> RgbImage {
        RgbImage::from_fn(96, 48, |x, y| {
            if (16..32).contains(&y) {
                if (x / 2) % 2 == 0 {
                    Rgb([0, 0, 0])
                } else {
                    Rgb([255, 255, 255])
                }
            } else {
                Rgb([128, 128, 128])
            }
        })
    }

    #[test]
    fn test_detects_face_blob() {
        let config = DetectionConfig::default();
        let grid = BlockGrid::from_rgb(&face_frame(), config.block_size);
        let faces = detect_faces(&grid, &config);
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].bbox, Region { x: 32, y: 32, width: 32, height: 32 });
        assert!(faces[0].confidence > 0.9);
        assert!(detect_text(&grid, &config).is_empty());
    }

    #[test]
    fn test_single_skin_block_is_ignored() {
        let config = DetectionConfig::default();
        let img = RgbImage::from_fn(64, 64, |x, y| if x < 16 && y < 16 { SKIN } else { BLUE });
        let grid = BlockGrid::from_rgb(&img, config.block_size);
        assert!(detect_faces(&grid, &config).is_empty());
    }

    #[test]
    fn test_detects_text_band() {
        let config = DetectionConfig::default();
        let grid = BlockGrid::from_rgb(&text_frame(), config.block_size);
        let text = detect_text(&grid, &config);
        assert_eq!(text.len(), 1);
        assert_eq!(text[0].bbox, Region { x: 0, y: 16, width: 96, height: 16 });
        assert_eq!(text[0].kind, ObjectKind::Text);
    }

    #[test]
    fn test_blur_changes_region_only() {
        let config = DetectionConfig::default();
        let mut img = face_frame();
        let grid = BlockGrid::from_rgb(&img, config.block_size);
        let faces = detect_faces(&grid, &config);
        blur_regions(&mut img, &faces, &config);
        assert_ne!(*img.get_pixel(33, 33), SKIN);
        assert_eq!(*img.get_pixel(2, 2), BLUE);
        assert_eq!(*img.get_pixel(93, 93), BLUE);
    }

    #[test]
    fn test_invalid_detection_config() {
        let config = DetectionConfig {
            blur_sigma: 0.0,
            ..DetectionConfig::default()
        };
        assert!(config.validate().is_err());
    }
}

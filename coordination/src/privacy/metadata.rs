//! Metadata extraction for the metadata-only tier.
//!
//! Produces a small JSON summary of a frame. No pixel data survives.

use super::grid::BlockGrid;
use super::PrivacyError;
use image::RgbImage;
use serde_json::{json, Map, Value};

/// Block share of edge pixels that marks a block as "busy".
const BUSY_BLOCK_EDGE: f32 = 0.08;

fn round(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

pub fn brightness_label(mean_luma: f64) -> &'static str {
    match mean_luma {
        l if l < 70.0 => "dark",
        l if l < 130.0 => "dim",
        l if l < 200.0 => "bright",
        _ => "very_bright",
    }
}

/// Most common colour after quantizing each channel to four levels.
///
/// Returns the bucket centre as `#rrggbb`.
pub fn dominant_color(image: &RgbImage) -> String {
    let mut buckets = [0u64; 64];
    for pixel in image.pixels() {
        let idx = ((pixel[0] >> 6) as usize) << 4 | ((pixel[1] >> 6) as usize) << 2 | (pixel[2] >> 6) as usize;
        buckets[idx] += 1;
    }
    let best = buckets
        .iter()
        .enumerate()
        .max_by_key(|(idx, count)| (**count, std::cmp::Reverse(*idx)))
        .map(|(idx, _)| idx)
        .unwrap_or(0);
    let centre = |level: usize| ((level as u32) << 6) + 32;
    format!(
        "#{:02x}{:02x}{:02x}",
        centre(best >> 4),
        centre((best >> 2) & 0b11),
        centre(best & 0b11)
    )
}

/// Rough count of distinct objects: clusters of busy blocks.
pub fn object_count_estimate(grid: &BlockGrid) -> usize {
    grid.components(|b| b.edge_density >= BUSY_BLOCK_EDGE)
        .iter()
        .filter(|c| c.cells >= 2)
        .count()
}

/// Summarize `payload` without retaining any pixels.
pub fn extract(payload: &[u8], block_size: u32) -> Result<Map<String, Value>, PrivacyError> {
    let decoded = image::load_from_memory(payload).map_err(PrivacyError::Decode)?;
    let format = image::guess_format(payload)
        .ok()
        .and_then(|f| f.extensions_str().first().copied())
        .unwrap_or("unknown");
    let rgb = decoded.to_rgb8();
    let grid = BlockGrid::from_rgb(&rgb, block_size);
    let brightness = grid.mean_luma();

    let mut metadata = Map::new();
    metadata.insert("width".into(), json!(rgb.width()));
    metadata.insert("height".into(), json!(rgb.height()));
    metadata.insert("format".into(), json!(format));
    metadata.insert("brightness".into(), json!(round(brightness, 1)));
    metadata.insert("brightness_label".into(), json!(brightness_label(brightness)));
    metadata.insert("edge_density".into(), json!(round(grid.edge_density(), 4)));
    metadata.insert("object_count_estimate".into(), json!(object_count_estimate(&grid)));
    metadata.insert("dominant_color".into(), json!(dominant_color(&rgb)));
    metadata.insert(
        "content_digest".into(),
        json!(blake3::hash(payload).to_hex().to_string()),
    );
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_dominant_color_quantizes() {
        let img = RgbImage::from_pixel(8, 8, Rgb([200, 30, 30]));
        assert_eq!(dominant_color(&img), "#e02020");
    }

    #[test]
    fn test_dominant_color_majority_wins() {
        let img = RgbImage::from_fn(10, 10, |x, _| if x < 7 { Rgb([0, 0, 255]) } else { Rgb([255, 255, 255]) });
        assert_eq!(dominant_color(&img), "#2020e0");
    }

    #[test]
    fn test_brightness_labels() {
        assert_eq!(brightness_label(10.0), "dark");
        assert_eq!(brightness_label(100.0), "dim");
        assert_eq!(brightness_label(150.0), "bright");
        assert_eq!(brightness_label(250.0), "very_bright");
    }

    #[test]
    fn test_object_count_on_separate_clusters() {
        // Two checkerboard patches on a flat background.
        let img = RgbImage::from_fn(128, 32, |x, y| {
            let busy = x < 32 || (64..96).contains(&x);
            if busy && (x + y) % 2 == 0 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        });
        let grid = BlockGrid::from_rgb(&img, 16);
        assert_eq!(object_count_estimate(&grid), 2);
    }

    #[test]
    fn test_extract_rejects_garbage() {
        assert!(matches!(extract(b"not an image", 16), Err(PrivacyError::Decode(_))));
    }
}

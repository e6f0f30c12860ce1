//! Privacy tiers and payload sanitization
//!
//! Every payload passes through [`PrivacyProcessor::process`] before it can
//! reach a provider. The tier decides what leaves the process:
//!
//! | Tier          | Bytes forwarded        | Providers            |
//! |---------------|------------------------|----------------------|
//! | Raw           | original               | any                  |
//! | Sanitized     | PNG, faces/text blurred| any                  |
//! | MetadataOnly  | none (JSON summary)    | any                  |
//! | Local         | original               | local-capable only   |

pub mod grid;
pub mod metadata;
pub mod regions;

pub use grid::Region;
pub use regions::DetectionConfig;

use crate::failover::Locality;
use image::{DynamicImage, ImageOutputFormat};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Cursor;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// How much of a captured frame may leave the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyLevel {
    /// Pass-through.
    Raw,
    /// Faces and text blurred before upload.
    #[default]
    Sanitized,
    /// Only a metadata summary is sent.
    MetadataOnly,
    /// Bytes stay on this host.
    Local,
}

impl fmt::Display for PrivacyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw => write!(f, "raw"),
            Self::Sanitized => write!(f, "sanitized"),
            Self::MetadataOnly => write!(f, "metadata_only"),
            Self::Local => write!(f, "local"),
        }
    }
}

impl PrivacyLevel {
    /// Provider locality this tier imposes.
    pub fn locality(self) -> Locality {
        match self {
            Self::Local => Locality::LocalOnly,
            _ => Locality::Any,
        }
    }

    /// Whether image bytes are forwarded at all.
    pub fn forwards_image(self) -> bool {
        !matches!(self, Self::MetadataOnly)
    }
}

/// Network scope of the Local tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LocalNetworkPolicy {
    /// Local forbids sending image content off-device; other traffic is fine.
    #[default]
    ImageContentOnly,
    /// With a system-wide Local default, no traffic reaches remote providers,
    /// health checks included.
    AllTraffic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Face,
    Text,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Face => write!(f, "face"),
            Self::Text => write!(f, "text"),
        }
    }
}

/// A region that was detected (and blurred).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub kind: ObjectKind,
    pub bbox: Region,
    pub confidence: f32,
}

/// Output of one sanitization pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizationResult {
    pub privacy_level: PrivacyLevel,
    /// Bytes to forward; always `None` for MetadataOnly.
    pub sanitized_payload: Option<Vec<u8>>,
    pub metadata: Map<String, Value>,
    pub objects_detected: Vec<DetectedObject>,
    pub processing_time: Duration,
}

impl SanitizationResult {
    /// Whether the payload is confined to local-capable providers.
    pub fn local_only(&self) -> bool {
        self.privacy_level.locality() == Locality::LocalOnly
    }
}

#[derive(Debug, Error)]
pub enum PrivacyError {
    #[error("payload is empty")]
    EmptyPayload,

    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("failed to encode sanitized image: {0}")]
    Encode(#[source] image::ImageError),
}

/// Privacy configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PrivacyConfig {
    /// System-wide default tier.
    pub default_level: PrivacyLevel,
    /// Per-zone overrides.
    pub zones: BTreeMap<String, PrivacyLevel>,
    pub local_network_policy: LocalNetworkPolicy,
    pub detection: DetectionConfig,
}

impl PrivacyConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.detection.validate()
    }
}

/// Applies privacy tiers to captured payloads.
#[derive(Debug, Clone, Default)]
pub struct PrivacyProcessor {
    config: PrivacyConfig,
}

impl PrivacyProcessor {
    pub fn new(config: PrivacyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PrivacyConfig {
        &self.config
    }

    /// Job override, then zone override, then system default.
    pub fn level_for(&self, zone: &str, job_override: Option<PrivacyLevel>) -> PrivacyLevel {
        job_override
            .or_else(|| self.config.zones.get(zone).copied())
            .unwrap_or(self.config.default_level)
    }

    /// Whether health probes may reach non-local providers.
    pub fn remote_health_checks_allowed(&self) -> bool {
        !(self.config.default_level == PrivacyLevel::Local
            && self.config.local_network_policy == LocalNetworkPolicy::AllTraffic)
    }

    /// Apply `level` to `payload`.
    pub fn process(&self, payload: &[u8], level: PrivacyLevel) -> Result<SanitizationResult, PrivacyError> {
        if payload.is_empty() {
            return Err(PrivacyError::EmptyPayload);
        }
        let started = Instant::now();

        let (sanitized_payload, metadata, objects_detected) = match level {
            PrivacyLevel::Raw => (Some(payload.to_vec()), passthrough_metadata(payload, false), Vec::new()),
            PrivacyLevel::Local => (Some(payload.to_vec()), passthrough_metadata(payload, true), Vec::new()),
            PrivacyLevel::MetadataOnly => (
                None,
                metadata::extract(payload, self.config.detection.block_size)?,
                Vec::new(),
            ),
            PrivacyLevel::Sanitized => self.sanitize(payload)?,
        };

        let result = SanitizationResult {
            privacy_level: level,
            sanitized_payload,
            metadata,
            objects_detected,
            processing_time: started.elapsed(),
        };
        debug!(
            level = %level,
            objects = result.objects_detected.len(),
            elapsed_ms = result.processing_time.as_millis() as u64,
            "payload processed"
        );
        Ok(result)
    }

    fn sanitize(
        &self,
        payload: &[u8],
    ) -> Result<(Option<Vec<u8>>, Map<String, Value>, Vec<DetectedObject>), PrivacyError> {
        let detection = &self.config.detection;
        let mut rgb = image::load_from_memory(payload)
            .map_err(PrivacyError::Decode)?
            .to_rgb8();
        let grid = grid::BlockGrid::from_rgb(&rgb, detection.block_size);

        let mut objects = regions::detect_faces(&grid, detection);
        let faces = objects.len();
        objects.extend(regions::detect_text(&grid, detection));
        let text = objects.len() - faces;
        regions::blur_regions(&mut rgb, &objects, detection);

        let (width, height) = rgb.dimensions();
        let mut encoded = Vec::new();
        DynamicImage::ImageRgb8(rgb)
            .write_to(&mut Cursor::new(&mut encoded), ImageOutputFormat::Png)
            .map_err(PrivacyError::Encode)?;

        let mut meta = Map::new();
        meta.insert("width".into(), json!(width));
        meta.insert("height".into(), json!(height));
        meta.insert("format".into(), json!("png"));
        meta.insert("faces_blurred".into(), json!(faces));
        meta.insert("text_regions_blurred".into(), json!(text));
        meta.insert(
            "content_digest".into(),
            json!(blake3::hash(&encoded).to_hex().to_string()),
        );
        Ok((Some(encoded), meta, objects))
    }
}

fn passthrough_metadata(payload: &[u8], local_only: bool) -> Map<String, Value> {
    let mut meta = Map::new();
    meta.insert("size_bytes".into(), json!(payload.len()));
    meta.insert(
        "content_digest".into(),
        json!(blake3::hash(payload).to_hex().to_string()),
    );
    if local_only {
        meta.insert("local_only".into(), json!(true));
    }
    meta
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn png(img: RgbImage) -> Vec<u8> {
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
            .unwrap();
        buf
    }

    fn face_png() -> Vec<u8> {
        png(RgbImage::from_fn(96, 96, |x, y| {
            if (32..64).contains(&x) && (32..64).contains(&y) {
                Rgb([220, 170, 140])
            } else {
                Rgb([20, 40, 160])
            }
        }))
    }

    #[test]
    fn test_raw_is_passthrough() {
        let processor = PrivacyProcessor::default();
        let payload = face_png();
        let result = processor.process(&payload, PrivacyLevel::Raw).unwrap();
        assert_eq!(result.sanitized_payload.as_deref(), Some(payload.as_slice()));
        assert!(result.objects_detected.is_empty());
        assert!(!result.local_only());
    }

    #[test]
    fn test_metadata_only_never_forwards_bytes() {
        let processor = PrivacyProcessor::default();
        let payload = png(RgbImage::from_pixel(40, 30, Rgb([200, 30, 30])));
        let result = processor.process(&payload, PrivacyLevel::MetadataOnly).unwrap();
        assert!(result.sanitized_payload.is_none());
        assert!(!result.metadata.is_empty());
        assert_eq!(result.metadata["width"], json!(40));
        assert_eq!(result.metadata["height"], json!(30));
        assert_eq!(result.metadata["dominant_color"], json!("#e02020"));
        assert_eq!(result.metadata["object_count_estimate"], json!(0));
        assert_eq!(result.metadata["format"], json!("png"));
    }

    #[test]
    fn test_sanitized_blurs_face() {
        let processor = PrivacyProcessor::default();
        let result = processor.process(&face_png(), PrivacyLevel::Sanitized).unwrap();
        assert_eq!(result.objects_detected.len(), 1);
        assert_eq!(result.objects_detected[0].kind, ObjectKind::Face);
        assert_eq!(result.metadata["faces_blurred"], json!(1));

        let bytes = result.sanitized_payload.expect("sanitized bytes");
        let out = image::load_from_memory(&bytes).unwrap().to_rgb8();
        assert_eq!(out.dimensions(), (96, 96));
        assert_ne!(*out.get_pixel(33, 33), Rgb([220, 170, 140]));
    }

    #[test]
    fn test_local_marks_local_only() {
        let processor = PrivacyProcessor::default();
        let result = processor.process(&face_png(), PrivacyLevel::Local).unwrap();
        assert!(result.local_only());
        assert!(result.sanitized_payload.is_some());
        assert_eq!(result.metadata["local_only"], json!(true));
    }

    #[test]
    fn test_empty_payload_rejected() {
        let processor = PrivacyProcessor::default();
        assert!(matches!(
            processor.process(&[], PrivacyLevel::Raw),
            Err(PrivacyError::EmptyPayload)
        ));
    }

    #[test]
    fn test_sanitized_rejects_undecodable() {
        let processor = PrivacyProcessor::default();
        assert!(matches!(
            processor.process(b"garbage", PrivacyLevel::Sanitized),
            Err(PrivacyError::Decode(_))
        ));
    }

    #[test]
    fn test_level_resolution_order() {
        let mut config = PrivacyConfig::default();
        config.default_level = PrivacyLevel::Raw;
        config.zones.insert("bedroom".into(), PrivacyLevel::Local);
        let processor = PrivacyProcessor::new(config);
        assert_eq!(processor.level_for("kitchen", None), PrivacyLevel::Raw);
        assert_eq!(processor.level_for("bedroom", None), PrivacyLevel::Local);
        assert_eq!(
            processor.level_for("bedroom", Some(PrivacyLevel::MetadataOnly)),
            PrivacyLevel::MetadataOnly
        );
    }

    #[test]
    fn test_local_network_policy_flag() {
        let mut config = PrivacyConfig {
            default_level: PrivacyLevel::Local,
            ..PrivacyConfig::default()
        };
        assert!(PrivacyProcessor::new(config.clone()).remote_health_checks_allowed());
        config.local_network_policy = LocalNetworkPolicy::AllTraffic;
        assert!(!PrivacyProcessor::new(config.clone()).remote_health_checks_allowed());
        config.default_level = PrivacyLevel::Sanitized;
        assert!(PrivacyProcessor::new(config).remote_health_checks_allowed());
    }
}

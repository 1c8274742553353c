// THEORY:
// The `detection` module is the entry gate of the pipeline. It turns the JSON
// detection-result document handed over by the request layer into a canonical
// `DetectionSet`: plain (x, y, weight) points in image pixel coordinates.
//
// Key principles:
// 1.  **Strict schema**: A record without a usable location is a hard error. We
//     never drop a malformed record silently and never return a partial set.
// 2.  **Centroids**: Bounding boxes are reduced to their centre. Downstream stages
//     only ever see points.
// 3.  **Person filter**: Records explicitly labelled as something other than a
//     person are skipped. Unlabelled records are assumed to be people.
// 4.  **Empty is valid**: A document with zero detections parses successfully.
//     "Nobody in frame" is an ordinary answer, not a failure.

use crate::error::{HeatmapError, Result};
use log::debug;
use serde::Deserialize;

const PERSON_LABEL: &str = "person";

/// Largest accepted splat weight. Keeps any realistic pile-up of detections
/// well inside `f32` range.
pub const MAX_WEIGHT: f32 = 1.0e6;

/// A single person location, in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    /// Confidence used as the splat weight. Defaults to 1.0.
    pub weight: f32,
}

impl Detection {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y, weight: 1.0 }
    }

    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }

    /// Builds a detection at the centre of a bounding box.
    pub fn from_bounding_box(bbox: &BoundingBox) -> Self {
        let (x, y) = bbox.centroid();
        Self::new(x, y)
    }
}

/// An axis-aligned box given by its corners.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl BoundingBox {
    pub fn centroid(&self) -> (f32, f32) {
        ((self.x_min + self.x_max) / 2.0, (self.y_min + self.y_max) / 2.0)
    }
}

/// An ordered collection of detections. May be empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionSet {
    detections: Vec<Detection>,
}

impl DetectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, detection: Detection) {
        self.detections.push(detection);
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
        self.detections.iter()
    }

    pub fn as_slice(&self) -> &[Detection] {
        &self.detections
    }
}

impl From<Vec<Detection>> for DetectionSet {
    fn from(detections: Vec<Detection>) -> Self {
        Self { detections }
    }
}

impl FromIterator<Detection> for DetectionSet {
    fn from_iter<I: IntoIterator<Item = Detection>>(iter: I) -> Self {
        Self { detections: iter.into_iter().collect() }
    }
}

impl<'a> IntoIterator for &'a DetectionSet {
    type Item = &'a Detection;
    type IntoIter = std::slice::Iter<'a, Detection>;

    fn into_iter(self) -> Self::IntoIter {
        self.detections.iter()
    }
}

/// The parsed form of a detection-result document.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionDocument {
    pub detections: DetectionSet,
    /// Image size the detector reported, if the document carries one.
    pub declared_size: Option<(u32, u32)>,
    /// Number of records skipped because they were labelled as non-persons.
    pub skipped: usize,
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    image_width: Option<u32>,
    image_height: Option<u32>,
    detections: Vec<RawDetection>,
}

#[derive(Debug, Deserialize)]
struct RawDetection {
    x: Option<f64>,
    y: Option<f64>,
    bbox: Option<RawBoundingBox>,
    confidence: Option<f64>,
    label: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawBoundingBox {
    x_min: f64,
    y_min: f64,
    x_max: f64,
    y_max: f64,
}

/// Parses a detection document from raw JSON bytes.
pub fn parse_document(bytes: &[u8]) -> Result<DetectionDocument> {
    let raw: RawDocument = serde_json::from_slice(bytes)?;
    raw.into_document()
}

pub fn parse_document_str(json: &str) -> Result<DetectionDocument> {
    let raw: RawDocument = serde_json::from_str(json)?;
    raw.into_document()
}

/// Parses a detection document and keeps only the detections.
pub fn parse_detections(bytes: &[u8]) -> Result<DetectionSet> {
    parse_document(bytes).map(|document| document.detections)
}

impl RawDocument {
    fn into_document(self) -> Result<DetectionDocument> {
        let declared_size = match (self.image_width, self.image_height) {
            (Some(width), Some(height)) => Some((width, height)),
            (None, None) => None,
            _ => {
                return Err(HeatmapError::validation(
                    "image_width and image_height must be given together",
                ));
            }
        };

        let mut detections = DetectionSet::new();
        let mut skipped = 0;
        for (index, record) in self.detections.into_iter().enumerate() {
            if !record.is_person() {
                skipped += 1;
                continue;
            }
            detections.push(record.into_detection(index)?);
        }

        debug!(
            "Parsed {} detections ({} non-person records skipped)",
            detections.len(),
            skipped
        );

        Ok(DetectionDocument {
            detections,
            declared_size,
            skipped,
        })
    }
}

impl RawDetection {
    fn is_person(&self) -> bool {
        match &self.label {
            Some(label) => label.trim().eq_ignore_ascii_case(PERSON_LABEL),
            None => true,
        }
    }

    fn into_detection(self, index: usize) -> Result<Detection> {
        let (x, y) = match (self.x, self.y, &self.bbox) {
            (Some(x), Some(y), _) => (finite(x, "x", index)?, finite(y, "y", index)?),
            (None, None, Some(bbox)) => bbox.validated(index)?.centroid(),
            (Some(_), None, _) | (None, Some(_), _) => {
                return Err(HeatmapError::validation(format!(
                    "detection {index}: x and y must be given together"
                )));
            }
            (None, None, None) => {
                return Err(HeatmapError::validation(format!(
                    "detection {index}: missing location (x/y or bbox)"
                )));
            }
        };

        let weight = match self.confidence {
            Some(confidence) => {
                let confidence = finite(confidence, "confidence", index)?;
                if confidence < 0.0 {
                    return Err(HeatmapError::validation(format!(
                        "detection {index}: confidence must not be negative"
                    )));
                }
                if confidence > MAX_WEIGHT {
                    return Err(HeatmapError::validation(format!(
                        "detection {index}: confidence {confidence} exceeds {MAX_WEIGHT}"
                    )));
                }
                confidence
            }
            None => 1.0,
        };

        Ok(Detection { x, y, weight })
    }
}

impl RawBoundingBox {
    fn validated(&self, index: usize) -> Result<BoundingBox> {
        let bbox = BoundingBox {
            x_min: finite(self.x_min, "bbox.x_min", index)?,
            y_min: finite(self.y_min, "bbox.y_min", index)?,
            x_max: finite(self.x_max, "bbox.x_max", index)?,
            y_max: finite(self.y_max, "bbox.y_max", index)?,
        };
        if bbox.x_min > bbox.x_max || bbox.y_min > bbox.y_max {
            return Err(HeatmapError::validation(format!(
                "detection {index}: bbox corners are inverted"
            )));
        }
        Ok(bbox)
    }
}

fn finite(value: f64, field: &str, index: usize) -> Result<f32> {
    let narrowed = value as f32;
    if !narrowed.is_finite() {
        return Err(HeatmapError::validation(format!(
            "detection {index}: {field} is not a finite number"
        )));
    }
    Ok(narrowed)
}

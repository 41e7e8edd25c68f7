//! Object detections reported by the video analytics server.
//!
//! Each `liveData` envelope carries the complete list of objects detected in
//! the accompanying frame.  Detections are ephemeral: a new list replaces the
//! previous one wholesale, it is never merged.
//!
//! Bounding boxes use a fixed 0–100 coordinate space on both axes, so an
//! overlay consumer must scale them to the raster it is drawing on
//! (see [`ObjectDetection::pixel_rect`]).

use serde::{Deserialize, Serialize};

/// Extent of the normalized coordinate space used by detection boxes.
pub const DETECTION_COORDINATE_SPACE: f32 = 100.0;

/// One detected object.
///
/// # Serde representation
///
/// ```json
/// {"type":"PERSON","x":12.5,"y":40.0,"width":8.0,"height":22.0,"detectionScore":0.91}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectDetection {
    /// Class label as reported by the server (`"PERSON"`, `"CAR"`, …).
    #[serde(rename = "type")]
    pub class_label: String,
    /// Left edge, 0–100.
    pub x: f32,
    /// Top edge, 0–100.
    pub y: f32,
    /// Box width, 0–100.
    pub width: f32,
    /// Box height, 0–100.
    pub height: f32,
    /// Confidence score in `0.0..=1.0`.
    pub detection_score: f32,
}

/// Coarse grouping of class labels, used by overlay consumers to pick a style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectCategory {
    Person,
    Vehicle,
    Face,
    Other,
}

/// A bounding box in raster pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl ObjectDetection {
    /// Returns the category of this detection's class label.
    pub fn category(&self) -> ObjectCategory {
        match self.class_label.as_str() {
            "PERSON" => ObjectCategory::Person,
            "CAR" | "SUV" | "VAN" => ObjectCategory::Vehicle,
            "FACE_FULL" | "FACE_SIDE" => ObjectCategory::Face,
            _ => ObjectCategory::Other,
        }
    }

    /// Confidence rounded to a whole percentage, for overlay labels.
    pub fn confidence_percent(&self) -> u32 {
        (self.detection_score.clamp(0.0, 1.0) * 100.0).round() as u32
    }

    /// Scales the normalized box onto a raster of `width` × `height` pixels.
    pub fn pixel_rect(&self, width: u32, height: u32) -> PixelRect {
        let sx = width as f32 / DETECTION_COORDINATE_SPACE;
        let sy = height as f32 / DETECTION_COORDINATE_SPACE;
        PixelRect {
            x: self.x * sx,
            y: self.y * sy,
            width: self.width * sx,
            height: self.height * sy,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

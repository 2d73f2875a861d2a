//! JSON output
//!
//! Reshapes detections into fixed records and writes them as one array.

use serde::Serialize;
use std::io::Write;
use tracing::debug;

use crate::vision::Detection;

/// Confidence reported when the engine gave none
pub const DEFAULT_CONFIDENCE: f64 = 1.0;

/// One detected text span
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputRecord {
    pub text: String,
    pub confidence: f64,
    /// `[min_x, min_y, max_x, max_y]`
    pub bbox: [i64; 4],
}

impl OutputRecord {
    /// Build a record, or `None` if the polygon is empty or not finite
    pub fn from_detection(detection: Detection) -> Option<Self> {
        let bbox = bounding_box(&detection.polygon)?;
        Some(Self {
            text: detection.text,
            confidence: detection.confidence.unwrap_or(DEFAULT_CONFIDENCE),
            bbox,
        })
    }
}

/// Axis-aligned extrema, truncated toward zero
fn bounding_box(polygon: &[(f32, f32)]) -> Option<[i64; 4]> {
    if polygon.is_empty() || polygon.iter().any(|p| !p.0.is_finite() || !p.1.is_finite()) {
        return None;
    }

    let min_x = polygon.iter().map(|p| p.0).fold(f32::INFINITY, f32::min);
    let min_y = polygon.iter().map(|p| p.1).fold(f32::INFINITY, f32::min);
    let max_x = polygon.iter().map(|p| p.0).fold(f32::NEG_INFINITY, f32::max);
    let max_y = polygon.iter().map(|p| p.1).fold(f32::NEG_INFINITY, f32::max);

    Some([min_x as i64, min_y as i64, max_x as i64, max_y as i64])
}

/// Convert detections to records in order, dropping malformed ones
pub fn format_detections(detections: Vec<Detection>) -> Vec<OutputRecord> {
    detections
        .into_iter()
        .filter_map(|detection| {
            let text = detection.text.clone();
            let record = OutputRecord::from_detection(detection);
            if record.is_none() {
                debug!("Dropping malformed detection {:?}", text);
            }
            record
        })
        .collect()
}

/// Write records as a single JSON array followed by a newline.
/// Non-ASCII text is written as UTF-8, not escaped.
pub fn write_json<W: Write>(mut writer: W, records: &[OutputRecord]) -> serde_json::Result<()> {
    serde_json::to_writer(&mut writer, records)?;
    writer.write_all(b"\n").map_err(serde_json::Error::io)?;
    writer.flush().map_err(serde_json::Error::io)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(polygon: Vec<(f32, f32)>, text: &str, confidence: Option<f64>) -> Detection {
        Detection {
            polygon,
            text: text.to_string(),
            confidence,
        }
    }

    fn to_json(records: &[OutputRecord]) -> String {
        let mut out = Vec::new();
        write_json(&mut out, records).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_reference_record() {
        let records = format_detections(vec![detection(
            vec![(10.0, 20.0), (50.0, 20.0), (50.0, 40.0), (10.0, 40.0)],
            "Hi",
            Some(0.87),
        )]);

        assert_eq!(
            to_json(&records),
            "[{\"text\":\"Hi\",\"confidence\":0.87,\"bbox\":[10,20,50,40]}]\n"
        );
    }

    #[test]
    fn test_missing_confidence_defaults_to_one() {
        let records = format_detections(vec![detection(vec![(0.0, 0.0)], "x", None)]);
        assert_eq!(records[0].confidence, 1.0);
    }

    #[test]
    fn test_zero_detections_is_empty_array() {
        assert_eq!(to_json(&format_detections(vec![])), "[]\n");
    }

    #[test]
    fn test_bbox_truncates_toward_zero() {
        let records = format_detections(vec![detection(
            vec![(10.9, 20.2), (50.7, 19.8), (49.99, 40.6), (10.1, 39.5)],
            "t",
            Some(0.5),
        )]);
        assert_eq!(records[0].bbox, [10, 19, 50, 40]);

        let records = format_detections(vec![detection(vec![(-0.7, -1.5), (3.5, 2.5)], "n", None)]);
        assert_eq!(records[0].bbox, [0, -1, 3, 2]);
    }

    #[test]
    fn test_rotated_polygon_uses_extrema() {
        let records = format_detections(vec![detection(
            vec![(30.0, 10.0), (60.0, 30.0), (40.0, 60.0), (10.0, 40.0)],
            "r",
            Some(0.9),
        )]);

        let [min_x, min_y, max_x, max_y] = records[0].bbox;
        assert_eq!([min_x, min_y, max_x, max_y], [10, 10, 60, 60]);
        assert!(min_x <= max_x && min_y <= max_y);
    }

    #[test]
    fn test_malformed_detections_are_dropped_in_order() {
        let detections = vec![
            detection(vec![(1.0, 1.0), (2.0, 2.0)], "first", Some(0.1)),
            detection(vec![], "empty", Some(0.2)),
            detection(vec![(f32::NAN, 1.0)], "nan", Some(0.3)),
            detection(vec![(3.0, 3.0), (4.0, 4.0)], "last", Some(0.4)),
        ];
        let count = detections.len();

        let records = format_detections(detections);

        assert!(records.len() <= count);
        let texts: Vec<&str> = records.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "last"]);
    }

    #[test]
    fn test_non_ascii_is_not_escaped() {
        let records = format_detections(vec![detection(vec![(0.0, 0.0)], "Größe 東京", Some(0.5))]);
        let json = to_json(&records);

        assert!(json.contains("Größe 東京"));
        assert!(!json.contains("\\u"));
    }
}

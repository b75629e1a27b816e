//! Edit records: finished strokes drawn by a view

use crate::color::parse_color;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Maximum number of points in a single stroke
pub const MAX_STROKE_POINTS: usize = 65_536;

/// Maximum color name length in bytes
pub const MAX_COLOR_LEN: usize = 64;

/// A point in image coordinates, serialized as `[x, y]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point(pub f64, pub f64);

impl Point {
    pub fn x(&self) -> f64 {
        self.0
    }

    pub fn y(&self) -> f64 {
        self.1
    }

    fn is_finite(&self) -> bool {
        self.0.is_finite() && self.1.is_finite()
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Point(x, y)
    }
}

/// One immutable, finished user action.
///
/// Fields are private so a stroke can only be built through [`Stroke::new`],
/// which validates it. Strokes that arrive over the wire bypass the
/// constructor, so the authority calls [`Stroke::validate`] again before
/// appending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    color: String,
    points: Vec<Point>,
}

impl Stroke {
    /// Create a validated stroke
    pub fn new(color: impl Into<String>, points: Vec<Point>) -> Result<Self> {
        let stroke = Self {
            color: color.into(),
            points,
        };
        stroke.validate()?;
        Ok(stroke)
    }

    pub fn color(&self) -> &str {
        &self.color
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Check the record is well formed
    pub fn validate(&self) -> Result<()> {
        if self.color.is_empty() {
            return Err(Error::InvalidRecord("color cannot be empty".into()));
        }

        if self.color.len() > MAX_COLOR_LEN {
            return Err(Error::InvalidRecord(format!(
                "color exceeds {} bytes",
                MAX_COLOR_LEN
            )));
        }

        parse_color(&self.color)?;

        if self.points.is_empty() {
            return Err(Error::InvalidRecord("stroke has no points".into()));
        }

        if self.points.len() > MAX_STROKE_POINTS {
            return Err(Error::InvalidRecord(format!(
                "stroke has {} points, limit is {}",
                self.points.len(),
                MAX_STROKE_POINTS
            )));
        }

        if let Some(idx) = self.points.iter().position(|p| !p.is_finite()) {
            return Err(Error::InvalidRecord(format!(
                "point {} has a non-finite coordinate",
                idx
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_stroke() {
        let stroke = Stroke::new("red", vec![Point(0.0, 0.0), Point(1.0, 1.0)]).unwrap();
        assert_eq!(stroke.color(), "red");
        assert_eq!(stroke.points().len(), 2);
    }

    #[test]
    fn test_empty_points_rejected() {
        let err = Stroke::new("red", vec![]).unwrap_err();
        assert!(matches!(err, Error::InvalidRecord(_)));
    }

    #[test]
    fn test_empty_color_rejected() {
        assert!(Stroke::new("", vec![Point(1.0, 1.0)]).is_err());
    }

    #[test]
    fn test_unknown_color_rejected() {
        let err = Stroke::new("chartreuse", vec![Point(1.0, 1.0)]).unwrap_err();
        assert!(matches!(err, Error::InvalidRecord(_)));
        assert!(Stroke::new("#12345", vec![Point(1.0, 1.0)]).is_err());
        assert!(Stroke::new("#00ff00", vec![Point(1.0, 1.0)]).is_ok());
    }

    #[test]
    fn test_non_finite_rejected() {
        assert!(Stroke::new("blue", vec![Point(f64::NAN, 1.0)]).is_err());
        assert!(Stroke::new("blue", vec![Point(0.0, f64::INFINITY)]).is_err());
    }

    #[test]
    fn test_wire_shape() {
        let stroke = Stroke::new("green", vec![Point(1.5, 2.0)]).unwrap();
        let json = serde_json::to_value(&stroke).unwrap();
        assert_eq!(json, serde_json::json!({"color": "green", "points": [[1.5, 2.0]]}));
    }

    #[test]
    fn test_deserialized_stroke_is_validated_separately() {
        let stroke: Stroke = serde_json::from_str(r#"{"color":"red","points":[]}"#).unwrap();
        assert!(stroke.validate().is_err());
    }
}

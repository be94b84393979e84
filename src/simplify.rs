use geo::{LineString, MultiPolygon, Polygon, SimplifyVwPreserve};

use crate::error::SimplifyError;

pub const MIN_TOLERANCE: f64 = 0.0001;
pub const MAX_TOLERANCE: f64 = 0.01;
pub const DEFAULT_TOLERANCE: f64 = 0.001;
pub const TOLERANCE_STEP: f64 = 0.0001;

/// Simplification tolerance in coordinate units, always within
/// [`MIN_TOLERANCE`]..=[`MAX_TOLERANCE`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tolerance(f64);

impl Tolerance {
    pub fn new(value: f64) -> Result<Self, SimplifyError> {
        if (MIN_TOLERANCE..=MAX_TOLERANCE).contains(&value) {
            Ok(Self(value))
        } else {
            Err(SimplifyError::ToleranceOutOfRange {
                value,
                min: MIN_TOLERANCE,
                max: MAX_TOLERANCE,
            })
        }
    }

    pub fn value(self) -> f64 {
        self.0
    }

    // Visvalingam-Whyatt thresholds on triangle area, so square the linear tolerance.
    fn epsilon(self) -> f64 {
        self.0 * self.0
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Self(DEFAULT_TOLERANCE)
    }
}

impl TryFrom<f64> for Tolerance {
    type Error = SimplifyError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Simplifies every polygon without introducing self-intersections. Holes are kept; a ring that
/// would collapse below a valid ring keeps its original coordinates.
pub fn simplify(geometry: &MultiPolygon<f64>, tolerance: Tolerance) -> MultiPolygon<f64> {
    let epsilon = tolerance.epsilon();
    MultiPolygon::new(
        geometry
            .iter()
            .map(|polygon| simplify_polygon(polygon, epsilon))
            .collect(),
    )
}

fn simplify_polygon(polygon: &Polygon<f64>, epsilon: f64) -> Polygon<f64> {
    let simplified = polygon.simplify_vw_preserve(&epsilon);
    if simplified.interiors().len() != polygon.interiors().len() {
        return polygon.clone();
    }
    let exterior = valid_ring(simplified.exterior(), polygon.exterior());
    let interiors = simplified
        .interiors()
        .iter()
        .zip(polygon.interiors())
        .map(|(ring, original)| valid_ring(ring, original))
        .collect();
    Polygon::new(exterior, interiors)
}

fn valid_ring(ring: &LineString<f64>, original: &LineString<f64>) -> LineString<f64> {
    if ring.0.len() < 4 {
        original.clone()
    } else {
        ring.clone()
    }
}

#[cfg(test)]
mod tests {
    use geo::{polygon, Area, CoordsIter};

    use super::*;

    fn jagged() -> Polygon<f64> {
        // unit square with tiny bumps along the bottom edge and a square hole
        polygon!(
            exterior: [
                (x: 0.0, y: 0.0),
                (x: 0.25, y: 0.0001),
                (x: 0.5, y: 0.0),
                (x: 0.75, y: 0.0001),
                (x: 1.0, y: 0.0),
                (x: 1.0, y: 1.0),
                (x: 0.0, y: 1.0),
                (x: 0.0, y: 0.0),
            ],
            interiors: [
                [
                    (x: 0.4, y: 0.4),
                    (x: 0.6, y: 0.4),
                    (x: 0.6, y: 0.6),
                    (x: 0.4, y: 0.6),
                    (x: 0.4, y: 0.4),
                ],
            ],
        )
    }

    #[test]
    fn tolerance_bounds() {
        assert!(Tolerance::new(MIN_TOLERANCE).is_ok());
        assert!(Tolerance::new(MAX_TOLERANCE).is_ok());
        assert_eq!(
            Tolerance::new(0.02),
            Err(SimplifyError::ToleranceOutOfRange {
                value: 0.02,
                min: MIN_TOLERANCE,
                max: MAX_TOLERANCE
            })
        );
        assert!(Tolerance::try_from(0.0).is_err());
        assert_eq!(Tolerance::default().value(), DEFAULT_TOLERANCE);
    }

    #[test]
    fn bumps_are_removed_and_hole_is_kept() {
        let input = MultiPolygon::new(vec![jagged()]);
        let output = simplify(&input, Tolerance::new(MAX_TOLERANCE).unwrap());
        let polygon = &output.0[0];
        assert!(polygon.exterior().coords_count() < jagged().exterior().coords_count());
        assert_eq!(polygon.interiors().len(), 1);
        assert!(polygon.exterior().is_closed());
        assert!((polygon.unsigned_area() - input.unsigned_area()).abs() < 1e-3);
    }

    #[test]
    fn triangles_are_not_collapsed() {
        let triangle = polygon![(x: 0.0, y: 0.0), (x: 0.001, y: 0.0), (x: 0.0, y: 0.001)];
        let output = simplify(
            &MultiPolygon::new(vec![triangle.clone()]),
            Tolerance::new(MAX_TOLERANCE).unwrap(),
        );
        assert_eq!(output.0[0].exterior(), triangle.exterior());
    }
}

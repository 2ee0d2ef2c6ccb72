use geo_types::Point;
use serde::{Deserialize, Serialize};

use crate::{
    units::{Degrees, Meters},
    Error,
};

/// Estimated error bounds of a fix. Absent means the producer did not
/// report one, never "zero".
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Accuracy {
    pub horizontal: Option<Meters>,
    pub vertical: Option<Meters>,
}

/// A WGS84 position. Latitude and longitude are validated on
/// construction; a `Position` that exists is always on the globe.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    latitude: Degrees,
    longitude: Degrees,
    pub altitude: Option<Meters>,
    pub accuracy: Accuracy,
}

impl Position {
    pub fn new(latitude: Degrees, longitude: Degrees) -> Result<Self, Error> {
        if !latitude.0.is_finite() || !(-90.0..=90.0).contains(&latitude.0) {
            return Err(Error::InvalidCoordinate(format!(
                "latitude {} outside [-90, 90]",
                latitude.0
            )));
        }
        if !longitude.0.is_finite() || longitude.0 <= -180.0 || longitude.0 > 180.0 {
            return Err(Error::InvalidCoordinate(format!(
                "longitude {} outside (-180, 180]",
                longitude.0
            )));
        }

        Ok(Self {
            latitude,
            longitude,
            altitude: None,
            accuracy: Accuracy::default(),
        })
    }

    pub fn with_altitude(mut self, altitude: Meters) -> Self {
        self.altitude = Some(altitude);
        self
    }

    pub fn with_horizontal_accuracy(mut self, accuracy: Meters) -> Result<Self, Error> {
        if !accuracy.0.is_finite() || accuracy.0 < 0.0 {
            return Err(Error::InvalidCoordinate(format!(
                "horizontal accuracy {} must be non-negative",
                accuracy.0
            )));
        }
        self.accuracy.horizontal = Some(accuracy);
        Ok(self)
    }

    pub fn with_vertical_accuracy(mut self, accuracy: Meters) -> Result<Self, Error> {
        if !accuracy.0.is_finite() || accuracy.0 < 0.0 {
            return Err(Error::InvalidCoordinate(format!(
                "vertical accuracy {} must be non-negative",
                accuracy.0
            )));
        }
        self.accuracy.vertical = Some(accuracy);
        Ok(self)
    }

    pub fn latitude(&self) -> Degrees {
        self.latitude
    }

    pub fn longitude(&self) -> Degrees {
        self.longitude
    }

    /// Re-checks the constructor invariants. Updates crossing a trust
    /// boundary (deserialized, or produced by an out-of-tree provider)
    /// go through this before they are fanned out.
    pub fn is_valid(&self) -> bool {
        self.latitude.0.is_finite()
            && (-90.0..=90.0).contains(&self.latitude.0)
            && self.longitude.0.is_finite()
            && self.longitude.0 > -180.0
            && self.longitude.0 <= 180.0
            && self.accuracy.horizontal.map_or(true, |a| a.0.is_finite() && a.0 >= 0.0)
            && self.accuracy.vertical.map_or(true, |a| a.0.is_finite() && a.0 >= 0.0)
    }

    /// Lon/lat point for interop with geo tooling.
    pub fn point(&self) -> Point<f64> {
        Point::new(self.longitude.0, self.latitude.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_latitude() {
        assert!(Position::new(Degrees(90.5), Degrees(0.0)).is_err());
        assert!(Position::new(Degrees(-91.0), Degrees(0.0)).is_err());
        assert!(Position::new(Degrees(f64::NAN), Degrees(0.0)).is_err());
    }

    #[test]
    fn longitude_interval_is_half_open() {
        assert!(Position::new(Degrees(0.0), Degrees(-180.0)).is_err());
        assert!(Position::new(Degrees(0.0), Degrees(180.0)).is_ok());
    }

    #[test]
    fn rejects_negative_accuracy() {
        let position = Position::new(Degrees(51.5), Degrees(-0.1)).unwrap();
        assert!(position.with_horizontal_accuracy(Meters(-1.0)).is_err());
        assert!(position.with_vertical_accuracy(Meters(f64::NAN)).is_err());
    }

    #[test]
    fn converts_to_point() {
        let position = Position::new(Degrees(51.5), Degrees(-0.1)).unwrap();
        assert_eq!(position.point().x(), -0.1);
        assert_eq!(position.point().y(), 51.5);
    }
}

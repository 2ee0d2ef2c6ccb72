use core::fmt;

use serde::{Deserialize, Serialize};

/// Plane angle in degrees.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Degrees(pub f64);

impl fmt::Display for Degrees {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} deg", self.0)
    }
}

/// Length in meters.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Meters(pub f64);

impl fmt::Display for Meters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} m", self.0)
    }
}

/// Speed in meters per second.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct MetersPerSecond(pub f64);

impl fmt::Display for MetersPerSecond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} m/s", self.0)
    }
}

/// Radio frequency in megahertz.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Megahertz(pub u32);

impl Megahertz {
    /// Wireless drivers report frequencies in Hz.
    pub fn from_hz(hz: u64) -> Self {
        Self((hz / 1_000_000) as u32)
    }
}

impl fmt::Display for Megahertz {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} MHz", self.0)
    }
}

/// Direction of travel, measured clockwise from true north.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Heading(pub Degrees);

impl Heading {
    pub fn from_degrees(value: f64) -> Self {
        Self(Degrees(value))
    }

    pub fn degrees(&self) -> f64 {
        self.0 .0
    }

    pub fn is_finite(&self) -> bool {
        self.degrees().is_finite()
    }
}

impl fmt::Display for Heading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Speed over ground.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Velocity(pub MetersPerSecond);

impl Velocity {
    pub fn from_meters_per_second(value: f64) -> Self {
        Self(MetersPerSecond(value))
    }

    pub fn meters_per_second(&self) -> f64 {
        self.0 .0
    }

    pub fn is_finite(&self) -> bool {
        self.meters_per_second().is_finite()
    }
}

impl fmt::Display for Velocity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

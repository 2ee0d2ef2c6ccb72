use serde::{Deserialize, Serialize};

use crate::{
    provider::Features,
    units::{Degrees, Meters, MetersPerSecond},
};

/// Requested quality bounds, one per update kind. `None` means the
/// client does not care.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AccuracyBounds {
    pub horizontal: Option<Meters>,
    pub vertical: Option<Meters>,
    pub velocity: Option<MetersPerSecond>,
    pub heading: Option<Degrees>,
}

/// What a client asks for when opening a session.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Criteria {
    pub wants_heading: bool,
    pub wants_velocity: bool,
    pub wants_space_vehicles: bool,
    pub accuracy: AccuracyBounds,
}

impl Default for Criteria {
    fn default() -> Self {
        Self {
            wants_heading: false,
            wants_velocity: false,
            wants_space_vehicles: false,
            accuracy: AccuracyBounds {
                // City-block resolution is enough for a client that does
                // not state otherwise.
                horizontal: Some(Meters(3000.0)),
                vertical: None,
                velocity: None,
                heading: None,
            },
        }
    }
}

impl Criteria {
    /// The feature set a provider has to cover to serve this criteria.
    /// Position is always part of it.
    pub fn required_features(&self) -> Features {
        let mut features = Features::POSITION;
        if self.wants_heading {
            features |= Features::HEADING;
        }
        if self.wants_velocity {
            features |= Features::VELOCITY;
        }
        features
    }
}

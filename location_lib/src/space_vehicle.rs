use serde::{Deserialize, Serialize};

use crate::units::Degrees;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Constellation {
    Unknown,
    Gps,
    Glonass,
    Galileo,
    Beidou,
    Qzss,
    Sbas,
}

/// Unique identity of a satellite: constellation plus its 1-based PRN.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SpaceVehicleKey {
    pub constellation: Constellation,
    pub prn: u32,
}

/// A navigation satellite as last reported by a chipset.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpaceVehicle {
    pub key: SpaceVehicleKey,
    pub snr: f32,
    pub has_almanac: bool,
    pub has_ephemeris: bool,
    pub used_in_fix: bool,
    pub azimuth: Degrees,
    pub elevation: Degrees,
}

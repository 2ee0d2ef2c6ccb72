//! Reporter speaking the Mozilla-style geolocation submission protocol.

use std::time::Duration;

use location_lib::{
    connectivity::{RadioCell, WirelessNetwork},
    position::Position,
    update::Update,
    Error,
};
use serde::Serialize;
use tracing::debug;

use crate::harvester::Reporter;

pub const INSTANCE_URL_ENV: &str = "COM_UBUNTU_LOCATION_GPS_PROVIDER_ICHNAEA_INSTANCE_URL";
pub const API_KEY_ENV: &str = "COM_UBUNTU_LOCATION_GPS_PROVIDER_ICHNAEA_API_KEY";

const SUBMIT_PATH: &str = "/v1/submit";
const API_KEY_HEADER: &str = "X-Api-Key";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct IchnaeaConfig {
    pub instance_url: String,
    pub api_key: String,
}

impl IchnaeaConfig {
    pub fn from_env() -> Option<Self> {
        Some(Self {
            instance_url: std::env::var(INSTANCE_URL_ENV).ok()?,
            api_key: std::env::var(API_KEY_ENV).ok()?,
        })
    }
}

#[derive(Serialize)]
struct SubmitBody {
    items: Vec<Item>,
}

#[derive(Serialize)]
struct Item {
    lat: f64,
    lon: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    altitude: Option<f64>,
    time: String,
    cell: Vec<CellObservation>,
    wifi: Vec<WifiObservation>,
}

#[derive(Serialize)]
struct CellObservation {
    radio: &'static str,
    mcc: u16,
    mnc: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    lac: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    psc: Option<u16>,
}

#[derive(Serialize)]
struct WifiObservation {
    key: String,
    frequency: u32,
    signal: i8,
}

fn build_submission(
    update: &Update<Position>,
    wifis: &[WirelessNetwork],
    cells: &[RadioCell],
) -> SubmitBody {
    let cell = cells
        .iter()
        .map(|cell| match cell {
            RadioCell::Gsm(gsm) => CellObservation {
                radio: "gsm",
                mcc: gsm.mcc,
                mnc: gsm.mnc,
                lac: Some(gsm.location_area_code),
                cid: Some(gsm.cell_id),
                psc: None,
            },
            RadioCell::Umts(umts) => CellObservation {
                radio: "wcdma",
                mcc: umts.mcc,
                mnc: umts.mnc,
                lac: Some(umts.location_area_code),
                cid: Some(umts.cell_id),
                psc: None,
            },
            RadioCell::Lte(lte) => CellObservation {
                radio: "lte",
                mcc: lte.mcc,
                mnc: lte.mnc,
                lac: Some(lte.tracking_area_code),
                cid: Some(lte.cell_id),
                psc: Some(lte.physical_cell_id),
            },
            RadioCell::Cdma(cdma) => CellObservation {
                radio: "cdma",
                mcc: cdma.mcc,
                mnc: cdma.mnc,
                lac: Some(cdma.network_id),
                cid: Some(cdma.base_station_id as u32),
                psc: None,
            },
        })
        .collect();

    let wifi = wifis
        .iter()
        .map(|network| WifiObservation {
            key: network.bssid.to_string(),
            frequency: network.frequency.0,
            signal: network.strength,
        })
        .collect();

    SubmitBody {
        items: vec![Item {
            lat: update.value.latitude().0,
            lon: update.value.longitude().0,
            accuracy: update.value.accuracy.horizontal.map(|a| a.0),
            altitude: update.value.altitude.map(|a| a.0),
            time: update.when.to_rfc3339(),
            cell,
            wifi,
        }],
    }
}

pub struct IchnaeaReporter {
    config: IchnaeaConfig,
    client: reqwest::blocking::Client,
}

impl IchnaeaReporter {
    pub fn new(config: IchnaeaConfig) -> Result<Self, Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| Error::ReporterPermanent(err.to_string()))?;
        Ok(Self { config, client })
    }

    fn submit_url(&self) -> String {
        format!(
            "{}{}",
            self.config.instance_url.trim_end_matches('/'),
            SUBMIT_PATH
        )
    }
}

impl Reporter for IchnaeaReporter {
    fn report(
        &self,
        update: &Update<Position>,
        wifis: &[WirelessNetwork],
        cells: &[RadioCell],
    ) -> Result<(), Error> {
        let body = build_submission(update, wifis, cells);

        let response = self
            .client
            .post(self.submit_url())
            .header(API_KEY_HEADER, &self.config.api_key)
            .json(&body)
            .send()
            .map_err(|err| Error::ReporterTransient(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!("observation accepted by {}", self.submit_url());
            Ok(())
        } else if status.is_server_error() {
            Err(Error::ReporterTransient(format!("http status {status}")))
        } else {
            Err(Error::ReporterPermanent(format!("http status {status}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use location_lib::{
        connectivity::{Bssid, GsmCell, WirelessMode},
        units::{Degrees, Megahertz, Meters},
    };

    use super::*;

    #[test]
    fn submission_body_matches_the_wire_format() {
        let position = Position::new(Degrees(51.5), Degrees(-0.1))
            .unwrap()
            .with_horizontal_accuracy(Meters(25.0))
            .unwrap();
        let update = Update::new(position, Utc.timestamp_millis_opt(0).unwrap());

        let wifis = vec![WirelessNetwork {
            ssid: b"office".to_vec(),
            bssid: Bssid([0xaa, 0xbb, 0xcc, 0, 0x11, 0xff]),
            frequency: Megahertz(2412),
            mode: WirelessMode::Infrastructure,
            strength: -55,
        }];
        let cells = vec![RadioCell::Gsm(GsmCell {
            mcc: 262,
            mnc: 2,
            location_area_code: 5313,
            cell_id: 131948771,
        })];

        let body = serde_json::to_value(build_submission(&update, &wifis, &cells)).unwrap();
        let item = &body["items"][0];

        assert_eq!(item["lat"], 51.5);
        assert_eq!(item["lon"], -0.1);
        assert_eq!(item["accuracy"], 25.0);
        assert!(item.get("altitude").is_none());
        assert_eq!(item["cell"][0]["radio"], "gsm");
        assert_eq!(item["cell"][0]["mcc"], 262);
        assert_eq!(item["cell"][0]["lac"], 5313);
        assert_eq!(item["wifi"][0]["key"], "aa:bb:cc:00:11:ff");
        assert_eq!(item["wifi"][0]["signal"], -55);
    }

    #[test]
    fn config_requires_both_environment_variables() {
        // Guard against parallel tests touching the same variables.
        std::env::remove_var(INSTANCE_URL_ENV);
        std::env::remove_var(API_KEY_ENV);
        assert!(IchnaeaConfig::from_env().is_none());
    }
}

//! `gps.conf` handling. The vendor stack ships an INI-style file with
//! `KEY=VALUE` lines and `#` comments; unknown keys are ignored so new
//! vendor drops do not break the service.

use super::hal::Capabilities;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SuplServer {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct XtraConfig {
    /// When set, the hosts below are ignored and the modem is queried
    /// instead.
    pub server_query: bool,
    pub hosts: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GpsConfig {
    pub supl: Option<SuplServer>,
    pub xtra: XtraConfig,
    pub ntp_server: Option<String>,
    pub debug_level: Option<u8>,
    pub intermediate_positions: bool,
    pub supl_version: Option<u32>,
    pub capabilities: Option<Capabilities>,
    pub lpp_profile: Option<u8>,
    pub nmea_provider: Option<u8>,
    pub a_glonass_pos_protocol: Option<u8>,
}

impl GpsConfig {
    pub fn from_ini_str(contents: &str) -> Self {
        let mut config = GpsConfig::default();
        let mut supl_host: Option<String> = None;
        let mut supl_port: Option<u16> = None;
        let mut xtra_hosts: [Option<String>; 3] = [None, None, None];

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();

            match key {
                "SUPL_HOST" => supl_host = Some(value.to_owned()),
                "SUPL_PORT" => supl_port = value.parse().ok(),
                "XTRA_SERVER_1" => xtra_hosts[0] = Some(value.to_owned()),
                "XTRA_SERVER_2" => xtra_hosts[1] = Some(value.to_owned()),
                "XTRA_SERVER_3" => xtra_hosts[2] = Some(value.to_owned()),
                "XTRA_SERVER_QUERY" => config.xtra.server_query = value == "1",
                "NTP_SERVER" => config.ntp_server = Some(value.to_owned()),
                "DEBUG_LEVEL" => config.debug_level = value.parse().ok(),
                "INTERMEDIATE_POS" => config.intermediate_positions = value == "1",
                "SUPL_VER" => config.supl_version = parse_numeric(value),
                "CAPABILITIES" => {
                    config.capabilities =
                        parse_numeric(value).map(Capabilities::from_bits_truncate)
                }
                "LPP_PROFILE" => config.lpp_profile = value.parse().ok(),
                "NMEA_PROVIDER" => config.nmea_provider = value.parse().ok(),
                "A_GLONASS_POS_PROTOCOL_SELECT" => {
                    config.a_glonass_pos_protocol = parse_numeric(value).map(|v| v as u8)
                }
                _ => {}
            }
        }

        config.xtra.hosts = xtra_hosts.into_iter().flatten().collect();
        if let (Some(host), Some(port)) = (supl_host, supl_port) {
            config.supl = Some(SuplServer { host, port });
        }

        config
    }
}

fn parse_numeric(value: &str) -> Option<u32> {
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

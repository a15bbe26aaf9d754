//! Observation/event-attached locations.
//!
//! Watches report up to three position sources per message; the
//! preference order is GPS, then cell triangulation, then WiFi scan.
//! Coordinates are decimal degrees.

use serde::{Deserialize, Serialize};

/// One network seen in a WiFi scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WifiNetwork {
    pub ssid: String,
    pub mac: String,
    pub rssi: i32,
}

/// A resolved position with its source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Location {
    Gps {
        lat: f64,
        lng: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        speed: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        heading: Option<f64>,
    },
    CellTriangulation {
        mcc: u32,
        mnc: u32,
        lac: u32,
        cid: u32,
    },
    WifiScan {
        networks: Vec<WifiNetwork>,
    },
}

impl Location {
    /// Pick the best available source: gps > cell_triangulation > wifi_scan.
    pub fn preferred(
        gps: Option<Location>,
        cell: Option<Location>,
        wifi: Option<Location>,
    ) -> Option<Location> {
        gps.or(cell).or(wifi)
    }

    pub fn source_name(&self) -> &'static str {
        match self {
            Location::Gps { .. } => "gps",
            Location::CellTriangulation { .. } => "cell_triangulation",
            Location::WifiScan { .. } => "wifi_scan",
        }
    }
}

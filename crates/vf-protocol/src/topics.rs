//! The closed topic ↔ family mapping.
//!
//! Each device family owns a distinct topic namespace; the bus adapter
//! subscribes to exactly these and routes by family.

use vf_model::DeviceFamily;

/// Gateway box status heartbeats.
pub const GATEWAY_STATUS: &str = "ESP32_BLE_GW_TX";
/// Gateway box medical sub-device data.
pub const GATEWAY_MEDICAL: &str = "dusun_pub";
/// Hospital kiosk reports.
pub const KIOSK: &str = "CM4_BLE_GW_TX";
/// Watch topic namespace prefix.
pub const WATCH_PREFIX: &str = "iMEDE_watch/";

pub const WATCH_VITALS: &str = "iMEDE_watch/VitalSign";
pub const WATCH_BATCH: &str = "iMEDE_watch/AP55";
pub const WATCH_HEARTBEAT: &str = "iMEDE_watch/hb";
pub const WATCH_LOCATION: &str = "iMEDE_watch/location";
pub const WATCH_SLEEP: &str = "iMEDE_watch/sleepdata";
pub const WATCH_SOS: &str = "iMEDE_watch/SOS";
pub const WATCH_SOS_LOWER: &str = "iMEDE_watch/sos";
pub const WATCH_FALL: &str = "iMEDE_watch/fallDown";
pub const WATCH_ONLINE: &str = "iMEDE_watch/onlineTrigger";

/// Subscription list for the gateway-box pipeline.
pub const GATEWAY_TOPICS: [&str; 2] = [GATEWAY_STATUS, GATEWAY_MEDICAL];

/// Subscription list for the watch pipeline.
pub const WATCH_TOPICS: [&str; 9] = [
    WATCH_VITALS,
    WATCH_BATCH,
    WATCH_HEARTBEAT,
    WATCH_LOCATION,
    WATCH_SLEEP,
    WATCH_SOS,
    WATCH_SOS_LOWER,
    WATCH_FALL,
    WATCH_ONLINE,
];

/// Subscription list for the hospital-kiosk pipeline.
pub const KIOSK_TOPICS: [&str; 1] = [KIOSK];

/// Map a topic to its owning family.  Unknown topics return `None`
/// and are dropped by the bus router.
pub fn family_for_topic(topic: &str) -> Option<DeviceFamily> {
    match topic {
        GATEWAY_STATUS | GATEWAY_MEDICAL => Some(DeviceFamily::GatewayBox),
        KIOSK => Some(DeviceFamily::HospitalKiosk),
        _ if topic.starts_with(WATCH_PREFIX) => Some(DeviceFamily::Watch),
        _ => None,
    }
}

/// The watch topic suffix after `iMEDE_watch/`, if this is a watch topic.
pub fn watch_suffix(topic: &str) -> Option<&str> {
    topic.strip_prefix(WATCH_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_family_mapping_is_closed() {
        assert_eq!(
            family_for_topic("ESP32_BLE_GW_TX"),
            Some(DeviceFamily::GatewayBox)
        );
        assert_eq!(family_for_topic("dusun_pub"), Some(DeviceFamily::GatewayBox));
        assert_eq!(
            family_for_topic("CM4_BLE_GW_TX"),
            Some(DeviceFamily::HospitalKiosk)
        );
        assert_eq!(
            family_for_topic("iMEDE_watch/VitalSign"),
            Some(DeviceFamily::Watch)
        );
        assert_eq!(
            family_for_topic("iMEDE_watch/fallDown"),
            Some(DeviceFamily::Watch)
        );
        assert_eq!(family_for_topic("some/other/topic"), None);
    }

    #[test]
    fn watch_suffix_strips_the_prefix() {
        assert_eq!(watch_suffix("iMEDE_watch/SOS"), Some("SOS"));
        assert_eq!(watch_suffix("dusun_pub"), None);
    }
}

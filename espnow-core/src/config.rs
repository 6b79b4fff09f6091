//! Core configuration. Hosts fill this from their own config layer.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Master switch. When off, `EspNow::init` returns an inactive context.
    pub enable: bool,
    /// Register the all-ones hardware peer so broadcasts can be sent.
    pub enable_broadcast: bool,
    /// Log every received datagram and send result.
    pub trace_events: bool,
    pub wifi: WifiConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WifiConfig {
    pub sta_enable: bool,
    pub ap_enable: bool,
    /// Channel used for peers added without one, and for the broadcast peer.
    pub ap_channel: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable: true,
            enable_broadcast: true,
            trace_events: false,
            wifi: WifiConfig::default(),
        }
    }
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            sta_enable: true,
            ap_enable: false,
            ap_channel: 6,
        }
    }
}

impl Config {
    /// At least one wifi interface must be up for the radio to work.
    pub fn has_interface(&self) -> bool {
        self.wifi.sta_enable || self.wifi.ap_enable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let c: Config = serde_json::from_str(r#"{"wifi": {"ap_channel": 11}}"#).unwrap();
        assert!(c.enable);
        assert!(c.enable_broadcast);
        assert_eq!(c.wifi.ap_channel, 11);
        assert!(c.wifi.sta_enable);
    }

    #[test]
    fn unknown_fields_rejected() {
        assert!(serde_json::from_str::<Config>(r#"{"bogus": 1}"#).is_err());
    }

    #[test]
    fn interface_check() {
        let mut c = Config::default();
        assert!(c.has_interface());
        c.wifi.sta_enable = false;
        assert!(!c.has_interface());
        c.wifi.ap_enable = true;
        assert!(c.has_interface());
    }
}

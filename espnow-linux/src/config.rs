//! Load config from file and environment.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use espnow_core::MacAddress;
use serde::Deserialize;

/// Node configuration. File: ~/.config/espnow/config.toml or /etc/espnow/config.toml.
/// Env overrides: ESPNOW_MAC, ESPNOW_PORT, ESPNOW_PEERS_FILE, ESPNOW_AP_CHANNEL.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub espnow: espnow_core::Config,
    #[serde(default)]
    pub radio: RadioConfig,
}

/// Emulated radio: UDP multicast on the LAN.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RadioConfig {
    /// Own address. Random locally administered address when unset.
    #[serde(default)]
    pub mac: Option<MacAddress>,
    /// Multicast group (default 239.255.70.70).
    #[serde(default = "default_group")]
    pub group: Ipv4Addr,
    /// UDP port shared by every node (default 47000).
    #[serde(default = "default_port")]
    pub port: u16,
    /// How long a unicast send waits for the receiver's ack (default 100 ms).
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    #[serde(default = "default_peers_file")]
    pub peers_file: PathBuf,
}

fn default_group() -> Ipv4Addr {
    Ipv4Addr::new(239, 255, 70, 70)
}
fn default_port() -> u16 {
    47000
}
fn default_ack_timeout_ms() -> u64 {
    100
}
fn default_peers_file() -> PathBuf {
    PathBuf::from("espnow_peers.json")
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            mac: None,
            group: default_group(),
            port: default_port(),
            ack_timeout_ms: default_ack_timeout_ms(),
            peers_file: default_peers_file(),
        }
    }
}

impl RadioConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    apply_env(&mut c, |k| std::env::var(k).ok());
    c
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(s) = var("ESPNOW_MAC") {
        match s.parse::<MacAddress>() {
            Ok(mac) => c.radio.mac = Some(mac),
            Err(e) => tracing::warn!(value = %s, error = %e, "ignoring ESPNOW_MAC"),
        }
    }
    if let Some(s) = var("ESPNOW_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.radio.port = p;
        }
    }
    if let Some(s) = var("ESPNOW_PEERS_FILE") {
        c.radio.peers_file = PathBuf::from(s);
    }
    if let Some(s) = var("ESPNOW_AP_CHANNEL") {
        if let Ok(ch) = s.parse::<u8>() {
            c.espnow.wifi.ap_channel = ch;
        }
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/espnow/config.toml"));
    }
    out.push(PathBuf::from("/etc/espnow/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            match std::fs::read_to_string(&p) {
                Ok(s) => match toml::from_str::<Config>(&s) {
                    Ok(c) => return Some(c),
                    Err(e) => tracing::warn!(path = %p.display(), error = %e, "bad config file, using defaults"),
                },
                Err(e) => tracing::warn!(path = %p.display(), error = %e, "cannot read config file"),
            }
            break;
        }
    }
    None
}

/// Random unicast, locally administered address.
pub fn random_mac() -> MacAddress {
    let mut bytes: [u8; 6] = rand::random();
    bytes[0] = (bytes[0] | 0x02) & !0x01;
    MacAddress::new(bytes)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn toml_sections_merge_with_defaults() {
        let c: Config = toml::from_str(
            r#"
            [espnow]
            trace_events = true

            [espnow.wifi]
            ap_channel = 11

            [radio]
            mac = "02:00:00:00:00:01"
            port = 47100
            "#,
        )
        .unwrap();
        assert!(c.espnow.trace_events);
        assert!(c.espnow.enable_broadcast);
        assert_eq!(c.espnow.wifi.ap_channel, 11);
        assert_eq!(c.radio.mac, Some("02:00:00:00:00:01".parse().unwrap()));
        assert_eq!(c.radio.port, 47100);
        assert_eq!(c.radio.group, Ipv4Addr::new(239, 255, 70, 70));
        assert_eq!(c.radio.ack_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(toml::from_str::<Config>("[radio]\nbogus = 1\n").is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("ESPNOW_MAC", "02:aa:bb:cc:dd:ee"),
            ("ESPNOW_PORT", "47001"),
            ("ESPNOW_PEERS_FILE", "/tmp/p.json"),
            ("ESPNOW_AP_CHANNEL", "not-a-number"),
        ]
        .into_iter()
        .collect();
        let mut c = Config::default();
        apply_env(&mut c, |k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(c.radio.mac, Some("02:aa:bb:cc:dd:ee".parse().unwrap()));
        assert_eq!(c.radio.port, 47001);
        assert_eq!(c.radio.peers_file, PathBuf::from("/tmp/p.json"));
        assert_eq!(c.espnow.wifi.ap_channel, 6);
    }

    #[test]
    fn random_mac_is_local_unicast() {
        for _ in 0..32 {
            let mac = random_mac();
            let first = mac.as_bytes()[0];
            assert_eq!(first & 0x02, 0x02);
            assert_eq!(first & 0x01, 0);
            assert!(!mac.is_broadcast());
        }
    }
}

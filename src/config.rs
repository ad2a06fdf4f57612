use serde::Deserialize;

/// Top level settings, loaded from an optional TOML file the same way the
/// teacher framework hands a `Settings` struct to `register` — every field
/// defaults so a config file is never required to boot.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub bind_addr: String,
    pub admission: AdmissionConfig,
    pub room: RoomConfig,
    pub dialects: Vec<DialectConfig>,
    pub lookup_table_path: String,
    pub map_catalog_root: String,
    pub script_cache_dir: String,
    /// §6's `/pixsim-api/controllers/<path>` route resolves `path` under
    /// this directory to a PixSimAssembly source file.
    pub controllers_root: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            admission: AdmissionConfig::default(),
            room: RoomConfig::default(),
            dialects: Vec::new(),
            lookup_table_path: "data/lookup.csv".to_string(),
            map_catalog_root: "data/maps".to_string(),
            script_cache_dir: "data/script-cache".to_string(),
            controllers_root: "data/controllers".to_string(),
        }
    }
}

impl RelayConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// §4.7: more than this many accepted connections from one IP within the
    /// rolling window drops the connection without handshake.
    pub max_connects_per_ip_per_sec: u32,
    /// §4.5/§5: no inbound frame for this long destroys the connection.
    pub idle_timeout_secs: u64,
    /// §4.5: sustained decayed event rate above this destroys the connection.
    pub flood_events_per_sec: u32,
    /// §6: websocket ping interval while idle.
    pub ping_interval_secs: u64,
    /// §6: upgrade handshake timeout.
    pub upgrade_timeout_secs: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_connects_per_ip_per_sec: 3,
            idle_timeout_secs: 300,
            flood_events_per_sec: 250,
            ping_interval_secs: 10,
            upgrade_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    pub min_team_size: u8,
    pub max_team_size: u8,
    pub default_team_size: u8,
    pub create_game_cooldown_secs: u64,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            min_team_size: 1,
            max_team_size: 3,
            default_team_size: 1,
            create_game_cooldown_secs: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DialectConfig {
    pub id: String,
    pub lookup_script_url: String,
    pub lookup_script_fallback_url: Option<String>,
    pub extractor_expr: String,
    pub allow_insecure: bool,
}

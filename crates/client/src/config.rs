use riftline::NetcodeConfig;

/// Client-side knobs. The netcode block is shared verbatim with the server
/// so both ends agree on tick timing and thresholds.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: String,
    pub connect_timeout_ms: u64,
    pub netcode: NetcodeConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:27900".to_string(),
            connect_timeout_ms: 5000,
            netcode: NetcodeConfig::default(),
        }
    }
}

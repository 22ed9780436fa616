use riftline::NetcodeConfig;

pub const DEFAULT_PORT: u16 = 27900;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub max_players: usize,
    pub game_id: String,
    /// Outbound per-session buffer, in messages. A session that falls this
    /// far behind starts losing deltas to back-pressure.
    pub send_buffer: usize,
    pub netcode: NetcodeConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_players: 10,
            game_id: "riftline-1".to_string(),
            send_buffer: 256,
            netcode: NetcodeConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

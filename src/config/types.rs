use serde::{Deserialize, Serialize};

/// Top-level gateway configuration. Business behavior (budgets) is derived
/// deterministically from the credential (§4.2), so there is no business
/// config to load here — only infrastructure settings, following the
/// teacher's split between infra config (file/env) and business config
/// (elsewhere).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub redis: RedisConfig,
    pub generator: GeneratorSettings,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            redis: RedisConfig::default(),
            generator: GeneratorSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    /// Number of connection attempts before falling back to the in-memory
    /// store. A production deployment should set this high; tests and local
    /// runs typically want a fast fallback.
    pub connect_retries: u32,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connect_retries: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorSettings {
    pub min_output_tokens: u32,
    pub max_output_tokens: u32,
    pub avg_output_tokens: u32,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            min_output_tokens: 50,
            max_output_tokens: 500,
            avg_output_tokens: 150,
        }
    }
}

pub mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use anyhow::Result;
use std::path::Path;

impl GatewayConfig {
    /// Load configuration from a file (if it exists) and apply environment
    /// variable overrides. When the file does not exist, built-in defaults
    /// are used, so the gateway starts with zero configuration for local
    /// development — following the teacher's `GatewayConfig::load`.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: GatewayConfig = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            match path.extension().and_then(|e| e.to_str()) {
                Some("toml") => toml::from_str(&content)?,
                Some("json") => serde_json::from_str(&content)?,
                Some(ext) => anyhow::bail!("unsupported config format: .{ext}, use .toml or .json"),
                None => anyhow::bail!("config file has no extension, use .toml or .json"),
            }
        } else {
            tracing::info!(
                "config file not found at {}, using defaults",
                path.display()
            );
            GatewayConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        tracing::info!("loaded gateway configuration");
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("GATEWAY_REDIS_URL") {
            self.redis.url = v;
        }
        if let Ok(v) = std::env::var("GATEWAY_REDIS_CONNECT_RETRIES") {
            if let Ok(n) = v.parse::<u32>() {
                self.redis.connect_retries = n;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.redis.url.is_empty() {
            anyhow::bail!("redis.url must not be empty");
        }
        if self.generator.min_output_tokens == 0 {
            anyhow::bail!("generator.min_output_tokens must be positive");
        }
        if self.generator.min_output_tokens > self.generator.max_output_tokens {
            anyhow::bail!("generator.min_output_tokens must be <= max_output_tokens");
        }
        Ok(())
    }
}

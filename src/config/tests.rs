use super::types::*;
use super::GatewayConfig;

#[test]
fn test_load_missing_file_uses_defaults() {
    let cfg = GatewayConfig::load(std::path::Path::new("no-such-config.toml")).unwrap();
    assert_eq!(cfg.redis.url, "redis://localhost:6379");
    assert_eq!(cfg.generator.avg_output_tokens, 150);
}

#[test]
fn test_load_toml_config() {
    let toml_str = r#"
[redis]
url = "redis://cache:6379"
connect_retries = 2

[generator]
min_output_tokens = 10
max_output_tokens = 100
avg_output_tokens = 40
"#;
    let tmp = std::env::temp_dir().join("gateway_test_config.toml");
    std::fs::write(&tmp, toml_str).unwrap();
    let cfg = GatewayConfig::load(&tmp).unwrap();
    assert_eq!(cfg.redis.url, "redis://cache:6379");
    assert_eq!(cfg.redis.connect_retries, 2);
    assert_eq!(cfg.generator.min_output_tokens, 10);
    std::fs::remove_file(&tmp).ok();
}

#[test]
fn test_load_json_config() {
    let json = r#"{"redis": {"url": "redis://cache:6379", "connect_retries": 1}}"#;
    let tmp = std::env::temp_dir().join("gateway_test_config.json");
    std::fs::write(&tmp, json).unwrap();
    let cfg = GatewayConfig::load(&tmp).unwrap();
    assert_eq!(cfg.redis.url, "redis://cache:6379");
    std::fs::remove_file(&tmp).ok();
}

#[test]
fn test_validate_empty_redis_url_fails() {
    let cfg = GatewayConfig {
        redis: RedisConfig {
            url: "".to_string(),
            connect_retries: 1,
        },
        generator: GeneratorSettings::default(),
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_validate_inverted_output_bounds_fails() {
    let cfg = GatewayConfig {
        redis: RedisConfig::default(),
        generator: GeneratorSettings {
            min_output_tokens: 500,
            max_output_tokens: 50,
            avg_output_tokens: 150,
        },
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_validate_valid_config() {
    let cfg = GatewayConfig::default();
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_deserialize_defaults() {
    let toml_str = r#"
[redis]
url = "redis://custom:6379"
"#;
    let cfg: GatewayConfig = toml::from_str(toml_str).unwrap();
    assert_eq!(cfg.redis.url, "redis://custom:6379");
    assert_eq!(cfg.redis.connect_retries, 5);
    assert_eq!(cfg.generator.avg_output_tokens, 150);
}

#[test]
fn test_unsupported_format() {
    let tmp = std::env::temp_dir().join("gateway_test.yml");
    std::fs::write(&tmp, "key: value").unwrap();
    assert!(GatewayConfig::load(&tmp).is_err());
    std::fs::remove_file(&tmp).ok();
}

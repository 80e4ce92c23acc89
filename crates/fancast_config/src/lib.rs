//! Configuration loading for the fancast server.
//!
//! Settings come from four layers, later layers winning:
//! defaults -> `FANCAST_*` environment variables -> optional config file
//! (`--config`, YAML or any format the `config` crate recognizes by
//! extension) -> CLI flags. File keys mirror the flag names; both hyphen and
//! underscore spellings are accepted.

pub mod settings;

use std::path::Path;

use config::{Config, ConfigError, Environment, File};

pub use settings::{
    DeliverySettings, LogSettings, Mode, PartialSettings, PublishSettings, ServerSettings, Settings,
};

pub fn load_config(file: Option<&Path>, cli: PartialSettings) -> Result<Settings, ConfigError> {
    let mut builder =
        Config::builder().add_source(Environment::with_prefix("FANCAST").try_parsing(true));

    if let Some(path) = file {
        // An explicitly named config file that is missing is an error.
        builder = builder.add_source(File::from(path));
    }

    let sources: PartialSettings = builder.build()?.try_deserialize()?;
    let settings = Settings::from_partial(sources.overlay(cli));
    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn defaults_when_nothing_is_given() {
        let cfg = load_config(None, PartialSettings::default()).expect("load_config failed");
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.server.port, 8765);
        assert_eq!(cfg.delivery.mode, Mode::Queue);
        assert_eq!(cfg.delivery.maxsize, 100);
        assert_eq!(cfg.delivery.drop_limit, 50);
        assert_eq!(cfg.publish.rate, 100.0);
        assert_eq!(cfg.publish.payload_bytes, 64);
        assert!(!cfg.logging.json);
    }

    #[test]
    fn config_file_overrides_defaults() {
        let tmp = TempDir::new().expect("create tempdir");
        let path = tmp.path().join("server.yaml");
        let yaml = r#"
mode: naive
port: 9100
rate: 250.5
payload-bytes: 32
drop-limit: 10
full-timeout: 2.5
log-json: true
"#;
        fs::write(&path, yaml).expect("write config file");

        let cfg = load_config(Some(&path), PartialSettings::default()).expect("load_config failed");
        assert_eq!(cfg.delivery.mode, Mode::Naive);
        assert_eq!(cfg.server.port, 9100);
        assert_eq!(cfg.publish.rate, 250.5);
        assert_eq!(cfg.publish.payload_bytes, 32);
        assert_eq!(cfg.delivery.drop_limit, 10);
        assert_eq!(cfg.delivery.full_timeout_secs, 2.5);
        assert!(cfg.logging.json);
        // Untouched keys keep their defaults.
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.delivery.maxsize, 100);
    }

    #[test]
    fn cli_flags_override_config_file() {
        let tmp = TempDir::new().expect("create tempdir");
        let path = tmp.path().join("server.yaml");
        fs::write(&path, "port: 9100\nrate: 10\n").expect("write config file");

        let cli = PartialSettings {
            port: Some(9200),
            ..PartialSettings::default()
        };
        let cfg = load_config(Some(&path), cli).expect("load_config failed");
        assert_eq!(cfg.server.port, 9200);
        assert_eq!(cfg.publish.rate, 10.0);
    }

    #[test]
    fn missing_explicit_config_file_is_an_error() {
        let tmp = TempDir::new().expect("create tempdir");
        let path = tmp.path().join("nope.yaml");
        assert!(load_config(Some(&path), PartialSettings::default()).is_err());
    }

    #[test]
    fn zero_rate_is_rejected() {
        let cli = PartialSettings {
            rate: Some(0.0),
            ..PartialSettings::default()
        };
        assert!(load_config(None, cli).is_err());
    }

    #[test]
    fn zero_capacity_queue_is_rejected() {
        let cli = PartialSettings {
            maxsize: Some(0),
            ..PartialSettings::default()
        };
        assert!(load_config(None, cli).is_err());
    }
}

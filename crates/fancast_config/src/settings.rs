use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;

/// Fan-out strategy, fixed for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Sequential awaited sends; a slow subscriber stalls the broadcast.
    Naive,
    /// Per-subscriber bounded queues with drop-oldest and disconnect policies.
    Queue,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Naive => write!(f, "naive"),
            Mode::Queue => write!(f, "queue"),
        }
    }
}

/// Fully resolved configuration, grouped by the component that consumes it.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub publish: PublishSettings,
    pub delivery: DeliverySettings,
    pub logging: LogSettings,
}

/// Listener and connection keepalive parameters.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub ping_interval_secs: f64,
    pub ping_timeout_secs: f64,
    pub shutdown_grace_secs: f64,
}

/// Publisher parameters: message rate and synthetic payload size.
#[derive(Debug, Clone)]
pub struct PublishSettings {
    pub rate: f64,
    pub payload_bytes: u32,
    pub metrics_period_secs: f64,
}

/// Dispatcher and per-session queue/policy parameters.
#[derive(Debug, Clone)]
pub struct DeliverySettings {
    pub mode: Mode,
    pub maxsize: u32,
    pub drop_limit: u32,
    pub drop_window_secs: f64,
    pub full_timeout_secs: f64,
    pub send_timeout_secs: f64,
}

#[derive(Debug, Clone)]
pub struct LogSettings {
    pub json: bool,
    pub level: String,
}

impl ServerSettings {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs_f64(self.ping_interval_secs)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.ping_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs_f64(self.shutdown_grace_secs)
    }
}

impl PublishSettings {
    pub fn metrics_period(&self) -> Duration {
        Duration::from_secs_f64(self.metrics_period_secs)
    }
}

impl DeliverySettings {
    pub fn drop_window(&self) -> Duration {
        Duration::from_secs_f64(self.drop_window_secs)
    }

    pub fn full_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.full_timeout_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.send_timeout_secs)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings::from_partial(PartialSettings::default())
    }
}

/// Partially specified settings, one optional field per flag/config key.
///
/// The config file and the environment deserialize into this; the CLI layer
/// builds one from its flags. Keys accept both the hyphenated flag spelling
/// and the underscore spelling.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct PartialSettings {
    pub mode: Option<Mode>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub rate: Option<f64>,
    #[serde(alias = "payload-bytes")]
    pub payload_bytes: Option<u32>,
    pub maxsize: Option<u32>,
    #[serde(alias = "drop-limit")]
    pub drop_limit: Option<u32>,
    #[serde(alias = "drop-window-secs")]
    pub drop_window_secs: Option<f64>,
    #[serde(alias = "full-timeout")]
    pub full_timeout: Option<f64>,
    #[serde(alias = "send-timeout")]
    pub send_timeout: Option<f64>,
    #[serde(alias = "ping-interval")]
    pub ping_interval: Option<f64>,
    #[serde(alias = "ping-timeout")]
    pub ping_timeout: Option<f64>,
    #[serde(alias = "shutdown-grace")]
    pub shutdown_grace: Option<f64>,
    #[serde(alias = "metrics-period")]
    pub metrics_period: Option<f64>,
    #[serde(alias = "log-json")]
    pub log_json: Option<bool>,
    #[serde(alias = "log-level")]
    pub log_level: Option<String>,
}

impl PartialSettings {
    /// Layer `other` on top of `self`: fields set in `other` win.
    pub fn overlay(self, other: PartialSettings) -> PartialSettings {
        PartialSettings {
            mode: other.mode.or(self.mode),
            host: other.host.or(self.host),
            port: other.port.or(self.port),
            rate: other.rate.or(self.rate),
            payload_bytes: other.payload_bytes.or(self.payload_bytes),
            maxsize: other.maxsize.or(self.maxsize),
            drop_limit: other.drop_limit.or(self.drop_limit),
            drop_window_secs: other.drop_window_secs.or(self.drop_window_secs),
            full_timeout: other.full_timeout.or(self.full_timeout),
            send_timeout: other.send_timeout.or(self.send_timeout),
            ping_interval: other.ping_interval.or(self.ping_interval),
            ping_timeout: other.ping_timeout.or(self.ping_timeout),
            shutdown_grace: other.shutdown_grace.or(self.shutdown_grace),
            metrics_period: other.metrics_period.or(self.metrics_period),
            log_json: other.log_json.or(self.log_json),
            log_level: other.log_level.or(self.log_level),
        }
    }
}

impl Settings {
    /// Fill the gaps in a partial specification with the documented defaults.
    pub fn from_partial(p: PartialSettings) -> Settings {
        Settings {
            server: ServerSettings {
                host: p.host.unwrap_or_else(|| "0.0.0.0".to_string()),
                port: p.port.unwrap_or(8765),
                ping_interval_secs: p.ping_interval.unwrap_or(20.0),
                ping_timeout_secs: p.ping_timeout.unwrap_or(20.0),
                shutdown_grace_secs: p.shutdown_grace.unwrap_or(5.0),
            },
            publish: PublishSettings {
                rate: p.rate.unwrap_or(100.0),
                payload_bytes: p.payload_bytes.unwrap_or(64),
                metrics_period_secs: p.metrics_period.unwrap_or(5.0),
            },
            delivery: DeliverySettings {
                mode: p.mode.unwrap_or(Mode::Queue),
                maxsize: p.maxsize.unwrap_or(100),
                drop_limit: p.drop_limit.unwrap_or(50),
                drop_window_secs: p.drop_window_secs.unwrap_or(10.0),
                full_timeout_secs: p.full_timeout.unwrap_or(5.0),
                send_timeout_secs: p.send_timeout.unwrap_or(1.0),
            },
            logging: LogSettings {
                json: p.log_json.unwrap_or(false),
                level: p.log_level.unwrap_or_else(|| "info".to_string()),
            },
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(name: &str, value: f64) -> Result<(), ConfigError> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(ConfigError::Message(format!(
                    "{name} must be a positive number, got {value}"
                )))
            }
        }

        positive("rate", self.publish.rate)?;
        positive("drop-window-secs", self.delivery.drop_window_secs)?;
        positive("full-timeout", self.delivery.full_timeout_secs)?;
        positive("send-timeout", self.delivery.send_timeout_secs)?;
        positive("ping-interval", self.server.ping_interval_secs)?;
        positive("ping-timeout", self.server.ping_timeout_secs)?;
        positive("metrics-period", self.publish.metrics_period_secs)?;

        if self.delivery.maxsize == 0 {
            return Err(ConfigError::Message(
                "maxsize must be at least 1".to_string(),
            ));
        }
        if self.delivery.drop_limit == 0 {
            return Err(ConfigError::Message(
                "drop-limit must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_prefers_the_top_layer() {
        let base = PartialSettings {
            port: Some(9000),
            rate: Some(50.0),
            ..PartialSettings::default()
        };
        let top = PartialSettings {
            port: Some(9001),
            ..PartialSettings::default()
        };
        let merged = base.overlay(top);
        assert_eq!(merged.port, Some(9001));
        assert_eq!(merged.rate, Some(50.0));
    }

    #[test]
    fn durations_convert_from_fractional_seconds() {
        let cfg = Settings::default();
        assert_eq!(cfg.server.ping_interval(), Duration::from_secs(20));
        assert_eq!(cfg.delivery.full_timeout(), Duration::from_secs(5));

        let cfg = Settings::from_partial(PartialSettings {
            full_timeout: Some(0.5),
            ..PartialSettings::default()
        });
        assert_eq!(cfg.delivery.full_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn mode_displays_as_flag_value() {
        assert_eq!(Mode::Naive.to_string(), "naive");
        assert_eq!(Mode::Queue.to_string(), "queue");
    }
}

//! Settings file and command line overrides

use std::{fs, net::SocketAddr, path::Path, time::Duration};

use anyhow::{bail, Context};
use lpms::{FilterMode, MagnetometerCorrection, OperationOptions, OutputFields};
use serde::Deserialize;
use tracing::{debug, Level};

use crate::Args;

fn default_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5000))
}

fn default_output_fields() -> Vec<String> {
    vec!["quaternion".to_owned()]
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub address: SocketAddr,
    pub connect_timeout_ms: u64,
    pub log_level: String,
    pub stream_frequency: u32,
    pub output_fields: Vec<String>,
    pub operation_options: Option<Vec<String>>,
    pub filter_mode: String,
    pub magnetometer_correction: Option<String>,
    pub temporal_filter_alpha: Option<f32>,
    pub reset_timestamp: bool,
    /// Print the raw bytes that follow the timestamp of every sample
    pub raw: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            address: default_address(),
            connect_timeout_ms: 10_000,
            log_level: "info".to_owned(),
            stream_frequency: 100,
            output_fields: default_output_fields(),
            operation_options: None,
            filter_mode: FilterMode::GyroscopeAccelerometerMagnetometer.to_string(),
            magnetometer_correction: None,
            temporal_filter_alpha: None,
            reset_timestamp: true,
            raw: false,
        }
    }
}

/// Sensor configuration to apply after connecting, `None` leaves the device's value alone
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSetup {
    pub stream_frequency: u32,
    pub output_fields: OutputFields,
    pub operation_options: Option<OperationOptions>,
    pub filter_mode: FilterMode,
    pub magnetometer_correction: Option<MagnetometerCorrection>,
    pub temporal_filter_alpha: Option<f32>,
}

impl Settings {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        debug!(path = %path.display(), "Loading settings");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Read settings file {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("Parse settings file {}", path.display()))
    }

    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        let settings = toml::from_str::<Settings>(contents)?;
        settings.setup()?;
        Ok(settings)
    }

    /// Command line flags win over the file
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(address) = args.address {
            self.address = address;
        }
        if let Some(frequency) = args.frequency {
            self.stream_frequency = frequency;
        }
        if let Some(fields) = &args.fields {
            self.output_fields = fields.clone();
        }
        if let Some(log_level) = &args.log_level {
            self.log_level = log_level.clone();
        }
        if args.raw {
            self.raw = true;
        }
        if args.keep_timestamp {
            self.reset_timestamp = false;
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn level(&self) -> anyhow::Result<Level> {
        self.log_level
            .parse()
            .with_context(|| format!("Invalid log level \"{}\"", self.log_level))
    }

    pub fn setup(&self) -> anyhow::Result<SensorSetup> {
        let output_fields = self
            .output_fields
            .iter()
            .map(|name| name.parse::<OutputFields>())
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .fold(OutputFields::empty(), |all, field| all | field);

        let operation_options = match &self.operation_options {
            Some(names) => Some(
                names
                    .iter()
                    .map(|name| name.parse::<OperationOptions>())
                    .collect::<Result<Vec<_>, _>>()?
                    .into_iter()
                    .fold(OperationOptions::empty(), |all, option| all | option),
            ),
            None => None,
        };

        let magnetometer_correction = match &self.magnetometer_correction {
            Some(name) => Some(name.parse()?),
            None => None,
        };

        if let Some(alpha) = self.temporal_filter_alpha {
            if !(0.0..=1.0).contains(&alpha) {
                bail!("Temporal filter alpha must be between 0 and 1, got {alpha}");
            }
        }

        if self.stream_frequency == 0 {
            bail!("Stream frequency must be positive");
        }

        Ok(SensorSetup {
            stream_frequency: self.stream_frequency,
            output_fields,
            operation_options,
            filter_mode: self.filter_mode.parse()?,
            magnetometer_correction,
            temporal_filter_alpha: self.temporal_filter_alpha,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use clap::Parser;
    use lpms::{FilterMode, MagnetometerCorrection, OperationOptions, OutputFields};
    use tracing::Level;

    use crate::Args;

    use super::Settings;

    #[test]
    fn defaults() {
        let settings = Settings::parse("").unwrap();
        assert_eq!(settings, Settings::default());

        let setup = settings.setup().unwrap();
        assert_eq!(setup.stream_frequency, 100);
        assert_eq!(setup.output_fields, OutputFields::QUATERNION);
        assert_eq!(setup.filter_mode, FilterMode::GyroscopeAccelerometerMagnetometer);
        assert_eq!(setup.operation_options, None);
        assert_eq!(settings.level().unwrap(), Level::INFO);
    }

    #[test]
    fn full_file() {
        let settings = Settings::parse(
            r#"
            address = "10.0.0.7:4000"
            connect_timeout_ms = 2500
            log_level = "trace"
            stream_frequency = 200
            output_fields = ["quaternion", "euler-angles", "Linear Acceleration"]
            operation_options = ["gyroscope_threshold"]
            filter_mode = "madgwick_gyroscope_accelerometer"
            magnetometer_correction = "weak"
            temporal_filter_alpha = 0.8
            reset_timestamp = false
            raw = true
            "#,
        )
        .unwrap();

        assert_eq!(settings.address, "10.0.0.7:4000".parse::<SocketAddr>().unwrap());
        assert_eq!(settings.connect_timeout().as_millis(), 2500);
        assert_eq!(settings.level().unwrap(), Level::TRACE);
        assert!(settings.raw);
        assert!(!settings.reset_timestamp);

        let setup = settings.setup().unwrap();
        assert_eq!(
            setup.output_fields,
            OutputFields::QUATERNION | OutputFields::EULER_ANGLES | OutputFields::LINEAR_ACCELERATION
        );
        assert_eq!(setup.operation_options, Some(OperationOptions::GYROSCOPE_THRESHOLD));
        assert_eq!(setup.filter_mode, FilterMode::MadgwickGyroscopeAccelerometer);
        assert_eq!(setup.magnetometer_correction, Some(MagnetometerCorrection::Weak));
        assert_eq!(setup.temporal_filter_alpha, Some(0.8));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(Settings::parse(r#"output_fields = ["compass"]"#).is_err());
        assert!(Settings::parse(r#"filter_mode = "kalman""#).is_err());
        assert!(Settings::parse("temporal_filter_alpha = 2.0").is_err());
        assert!(Settings::parse("stream_frequency = 0").is_err());
        assert!(Settings::parse("frequency = 100").is_err());
    }

    #[test]
    fn args_override_file() {
        let mut settings = Settings::parse("stream_frequency = 50\nraw = false").unwrap();
        let args = Args::parse_from([
            "streamer",
            "--address",
            "192.168.4.1:6000",
            "--frequency",
            "300",
            "--fields",
            "gyroscope,quaternion",
            "--raw",
            "--keep-timestamp",
        ]);
        settings.apply_args(&args);

        assert_eq!(settings.address, "192.168.4.1:6000".parse::<SocketAddr>().unwrap());
        assert_eq!(settings.stream_frequency, 300);
        assert_eq!(settings.output_fields, ["gyroscope", "quaternion"]);
        assert!(settings.raw);
        assert!(!settings.reset_timestamp);
    }
}

//! Bitmasks exchanged with the sensor
//!
//! The output field and operation option bits share the configuration word returned by
//! `GetConfiguration`, bits 0-2 of that word hold the stream frequency index.

use std::str::FromStr;

use bitflags::bitflags;

bitflags! {
    /// Values transmitted in every sensor data frame
    pub struct OutputFields: u32 {
        const PRESSURE            = 1 << 9;
        const MAGNETOMETER        = 1 << 10;
        const ACCELEROMETER       = 1 << 11;
        const GYROSCOPE           = 1 << 12;
        const TEMPERATURE         = 1 << 13;
        const HEAVE_MOTION        = 1 << 14;
        const ANGULAR_VELOCITY    = 1 << 16;
        const EULER_ANGLES        = 1 << 17;
        const QUATERNION          = 1 << 18;
        const ALTITUDE            = 1 << 19;
        const LINEAR_ACCELERATION = 1 << 21;
    }
}

bitflags! {
    pub struct OperationOptions: u32 {
        const DYNAMIC_MAGNETOMETER_CORRECTION = 1 << 20;
        const GYROSCOPE_THRESHOLD             = 1 << 23;
        const MAGNETOMETER_COMPENSATION       = 1 << 24;
        const ACCELEROMETER_COMPENSATION      = 1 << 25;
        const GYROSCOPE_AUTO_CALIBRATION      = 1 << 30;
    }
}

bitflags! {
    /// Reply word of `GetStatus`
    pub struct DeviceStatus: u32 {
        const COMMAND_MODE_ENABLED                  = 1 << 0;
        const STREAM_MODE_ENABLED                   = 1 << 1;
        const SLEEP_MODE_ENABLED                    = 1 << 2;
        const GYROSCOPE_CALIBRATION_ON              = 1 << 3;
        const GYROSCOPE_INITIALIZATION_FAILED       = 1 << 5;
        const ACCELEROMETER_INITIALIZATION_FAILED   = 1 << 6;
        const MAGNETOMETER_INITIALIZATION_FAILED    = 1 << 7;
        const PRESSURE_SENSOR_INITIALIZATION_FAILED = 1 << 8;
        const GYROSCOPE_UNRESPONSIVE                = 1 << 9;
        const ACCELEROMETER_UNRESPONSIVE            = 1 << 10;
        const MAGNETOMETER_UNRESPONSIVE             = 1 << 11;
        const FLASH_WRITE_FAILED                    = 1 << 12;
        const SET_BROADCAST_FREQUENCY_FAILED        = 1 << 14;
    }
}

impl DeviceStatus {
    const FAILURES: DeviceStatus = DeviceStatus::from_bits_truncate(
        DeviceStatus::GYROSCOPE_INITIALIZATION_FAILED.bits()
            | DeviceStatus::ACCELEROMETER_INITIALIZATION_FAILED.bits()
            | DeviceStatus::MAGNETOMETER_INITIALIZATION_FAILED.bits()
            | DeviceStatus::PRESSURE_SENSOR_INITIALIZATION_FAILED.bits()
            | DeviceStatus::GYROSCOPE_UNRESPONSIVE.bits()
            | DeviceStatus::ACCELEROMETER_UNRESPONSIVE.bits()
            | DeviceStatus::MAGNETOMETER_UNRESPONSIVE.bits()
            | DeviceStatus::FLASH_WRITE_FAILED.bits()
            | DeviceStatus::SET_BROADCAST_FREQUENCY_FAILED.bits(),
    );

    /// Status bits that report a hardware fault
    pub fn failures(&self) -> DeviceStatus {
        *self & Self::FAILURES
    }
}

const OUTPUT_FIELD_NAMES: [(&str, OutputFields); 11] = [
    ("pressure", OutputFields::PRESSURE),
    ("magnetometer", OutputFields::MAGNETOMETER),
    ("accelerometer", OutputFields::ACCELEROMETER),
    ("gyroscope", OutputFields::GYROSCOPE),
    ("temperature", OutputFields::TEMPERATURE),
    ("heave_motion", OutputFields::HEAVE_MOTION),
    ("angular_velocity", OutputFields::ANGULAR_VELOCITY),
    ("euler_angles", OutputFields::EULER_ANGLES),
    ("quaternion", OutputFields::QUATERNION),
    ("altitude", OutputFields::ALTITUDE),
    ("linear_acceleration", OutputFields::LINEAR_ACCELERATION),
];

const OPERATION_OPTION_NAMES: [(&str, OperationOptions); 5] = [
    (
        "dynamic_magnetometer_correction",
        OperationOptions::DYNAMIC_MAGNETOMETER_CORRECTION,
    ),
    ("gyroscope_threshold", OperationOptions::GYROSCOPE_THRESHOLD),
    (
        "magnetometer_compensation",
        OperationOptions::MAGNETOMETER_COMPENSATION,
    ),
    (
        "accelerometer_compensation",
        OperationOptions::ACCELEROMETER_COMPENSATION,
    ),
    (
        "gyroscope_auto_calibration",
        OperationOptions::GYROSCOPE_AUTO_CALIBRATION,
    ),
];

fn lookup<T: Copy>(table: &[(&str, T)], name: &str) -> Option<T> {
    let name = name.trim().to_ascii_lowercase().replace(['-', ' '], "_");
    table
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, value)| *value)
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("Unknown {kind} name \"{name}\"")]
pub struct UnknownName {
    pub kind: &'static str,
    pub name: String,
}

/// Parses a single field name such as `quaternion` or `euler-angles`
impl FromStr for OutputFields {
    type Err = UnknownName;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        lookup(&OUTPUT_FIELD_NAMES, name).ok_or_else(|| UnknownName {
            kind: "output field",
            name: name.to_owned(),
        })
    }
}

impl FromStr for OperationOptions {
    type Err = UnknownName;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        lookup(&OPERATION_OPTION_NAMES, name).ok_or_else(|| UnknownName {
            kind: "operation option",
            name: name.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{DeviceStatus, OperationOptions, OutputFields, UnknownName};

    #[test]
    fn masks_are_disjoint() {
        assert!((OutputFields::all().bits() & OperationOptions::all().bits()) == 0);
        assert!((OutputFields::all().bits() & 0b111) == 0);
        assert!((OperationOptions::all().bits() & 0b111) == 0);
    }

    #[test]
    fn illegal_bits_are_dropped() {
        let fields = OutputFields::from_bits_truncate(0xFFFF_FFFF);
        assert_eq!(fields, OutputFields::all());

        let options = OperationOptions::from_bits_truncate(1 << 31 | 1 << 30);
        assert_eq!(options, OperationOptions::GYROSCOPE_AUTO_CALIBRATION);
    }

    #[test]
    fn parse_names() {
        assert_eq!("quaternion".parse(), Ok(OutputFields::QUATERNION));
        assert_eq!("Euler-Angles".parse(), Ok(OutputFields::EULER_ANGLES));
        assert_eq!(
            "gyroscope_threshold".parse(),
            Ok(OperationOptions::GYROSCOPE_THRESHOLD)
        );
        assert_eq!(
            "compass".parse::<OutputFields>(),
            Err(UnknownName {
                kind: "output field",
                name: "compass".to_owned()
            })
        );
    }

    #[test]
    fn status_failures() {
        let status = DeviceStatus::COMMAND_MODE_ENABLED | DeviceStatus::FLASH_WRITE_FAILED;
        assert_eq!(status.failures(), DeviceStatus::FLASH_WRITE_FAILED);
        assert!(DeviceStatus::STREAM_MODE_ENABLED.failures().is_empty());
    }
}

//! Sensor side configuration cached by a [`crate::device::Device`]

use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use crate::fields::{OperationOptions, OutputFields, UnknownName};

/// Stream frequencies in Hz the device supports, indexed by the low bits of the
/// configuration word
pub const FREQUENCY_TABLE: [u32; 8] = [5, 10, 30, 50, 100, 200, 300, 500];
const FREQUENCY_MASK: u32 = 0b111;

/// Picks the supported frequency closest to `requested`, ties go to the lower one
pub fn snap_frequency(requested: u32) -> u32 {
    let mut closest = FREQUENCY_TABLE[0];
    let mut min_diff = u32::MAX;

    for frequency in FREQUENCY_TABLE {
        let diff = requested.abs_diff(frequency);
        if diff < min_diff {
            min_diff = diff;
            closest = frequency;
        }
    }

    closest
}

macro_rules! named_enum {
    (
        $(#[$meta:meta])*
        $name:ident: $kind:literal {
            $($variant:ident = $value:literal => $text:literal,)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
        #[repr(u32)]
        pub enum $name {
            $($variant = $value,)*
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant,)*];

            pub fn from_raw(value: u32) -> Option<Self> {
                match value {
                    $($value => Some($name::$variant),)*
                    _ => None,
                }
            }

            pub const fn raw(self) -> u32 {
                self as u32
            }

            pub const fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $text,)*
                }
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.name())
            }
        }

        impl FromStr for $name {
            type Err = UnknownName;

            fn from_str(name: &str) -> Result<Self, Self::Err> {
                let normalized = name.trim().to_ascii_lowercase().replace(['-', ' '], "_");
                $name::ALL
                    .iter()
                    .copied()
                    .find(|candidate| candidate.name() == normalized)
                    .ok_or_else(|| UnknownName {
                        kind: $kind,
                        name: name.to_owned(),
                    })
            }
        }
    };
}

named_enum! {
    /// Sensor fusion algorithm
    FilterMode: "filter mode" {
        GyroscopeOnly = 0 => "gyroscope_only",
        GyroscopeAccelerometer = 1 => "gyroscope_accelerometer",
        GyroscopeAccelerometerMagnetometer = 2 => "gyroscope_accelerometer_magnetometer",
        MadgwickGyroscopeAccelerometer = 3 => "madgwick_gyroscope_accelerometer",
        MadgwickGyroscopeAccelerometerMagnetometer = 4 => "madgwick_gyroscope_accelerometer_magnetometer",
    }
}

named_enum! {
    /// Magnetometer correction preset, sent with `SetFilterPreset`
    MagnetometerCorrection: "magnetometer correction" {
        Dynamic = 0 => "dynamic",
        Strong = 1 => "strong",
        Medium = 2 => "medium",
        Weak = 3 => "weak",
    }
}

impl Default for FilterMode {
    fn default() -> Self {
        FilterMode::GyroscopeAccelerometerMagnetometer
    }
}

impl Default for MagnetometerCorrection {
    fn default() -> Self {
        MagnetometerCorrection::Dynamic
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Configuration {
    /// Hz, always an entry of [`FREQUENCY_TABLE`]
    pub stream_frequency: u32,
    pub output_fields: OutputFields,
    pub operation_options: OperationOptions,
    pub filter_mode: FilterMode,
    pub magnetometer_correction: MagnetometerCorrection,
    /// Weight of the newest raw value in the temporal pre-filter, `1` disables it
    pub temporal_filter_alpha: f32,
}

impl Configuration {
    /// Applies the word returned by `GetConfiguration`
    pub fn apply_word(&mut self, word: u32) {
        self.stream_frequency = FREQUENCY_TABLE[(word & FREQUENCY_MASK) as usize];
        self.output_fields = OutputFields::from_bits_truncate(word);
        self.operation_options = OperationOptions::from_bits_truncate(word);
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            stream_frequency: FREQUENCY_TABLE[0],
            output_fields: OutputFields::empty(),
            operation_options: OperationOptions::empty(),
            filter_mode: FilterMode::default(),
            magnetometer_correction: MagnetometerCorrection::default(),
            temporal_filter_alpha: 1.0,
        }
    }
}

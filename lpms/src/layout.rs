//! Byte layout of `GetSensorData` payloads for a set of output fields

use crate::fields::OutputFields;

pub const TIMESTAMP_SIZE: usize = 4;
const SCALAR_SIZE: usize = 4;
const VECTOR_SIZE: usize = 12;
const QUATERNION_SIZE: usize = 16;

/// Fields in the order the device transmits them
const FIELD_ORDER: [(OutputFields, usize); 11] = [
    (OutputFields::GYROSCOPE, VECTOR_SIZE),
    (OutputFields::ACCELEROMETER, VECTOR_SIZE),
    (OutputFields::MAGNETOMETER, VECTOR_SIZE),
    (OutputFields::ANGULAR_VELOCITY, VECTOR_SIZE),
    (OutputFields::QUATERNION, QUATERNION_SIZE),
    (OutputFields::EULER_ANGLES, VECTOR_SIZE),
    (OutputFields::LINEAR_ACCELERATION, VECTOR_SIZE),
    (OutputFields::PRESSURE, SCALAR_SIZE),
    (OutputFields::ALTITUDE, SCALAR_SIZE),
    (OutputFields::TEMPERATURE, SCALAR_SIZE),
    (OutputFields::HEAVE_MOTION, SCALAR_SIZE),
];

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Layout {
    /// Payload length of every sensor data frame
    pub frame_size: usize,
    /// Where the per field data begins, right after the timestamp
    pub raw_data_offset: usize,
    pub quaternion_offset: Option<usize>,
}

impl Layout {
    pub fn compute(fields: OutputFields) -> Layout {
        let mut offset = TIMESTAMP_SIZE;
        let mut quaternion_offset = None;

        for (field, size) in FIELD_ORDER {
            if !fields.contains(field) {
                continue;
            }

            if field == OutputFields::QUATERNION {
                quaternion_offset = Some(offset);
            }
            offset += size;
        }

        Layout {
            frame_size: offset,
            raw_data_offset: TIMESTAMP_SIZE,
            quaternion_offset,
        }
    }

    /// Bytes following the timestamp
    pub fn raw_data_size(&self) -> usize {
        self.frame_size - self.raw_data_offset
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::compute(OutputFields::empty())
    }
}

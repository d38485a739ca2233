//! Definitions of the plain numeric types produced by the sensor

use mint::{Quaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Unit quaternion describing the sensor's orientation
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq)]
pub struct Orientation(pub Quaternion<f32>);

impl Orientation {
    pub const IDENTITY: Orientation = Orientation::new(1.0, 0.0, 0.0, 0.0);

    pub const fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Self(Quaternion {
            v: Vector3 { x, y, z },
            s: w,
        })
    }

    pub fn w(&self) -> f32 {
        self.0.s
    }

    pub fn x(&self) -> f32 {
        self.0.v.x
    }

    pub fn y(&self) -> f32 {
        self.0.v.y
    }

    pub fn z(&self) -> f32 {
        self.0.v.z
    }

    pub fn norm(&self) -> f32 {
        (self.w() * self.w() + self.x() * self.x() + self.y() * self.y() + self.z() * self.z())
            .sqrt()
    }

    /// Returns `self` scaled to unit length, a zero quaternion is returned as is
    pub fn normalized(self) -> Self {
        let norm = self.norm();
        if norm == 0.0 {
            return self;
        }

        Self::new(
            self.w() / norm,
            self.x() / norm,
            self.y() / norm,
            self.z() / norm,
        )
    }

    /// Euclidean distance between the two quaternions taken as 4-vectors
    pub fn distance(&self, other: &Orientation) -> f32 {
        let dw = self.w() - other.w();
        let dx = self.x() - other.x();
        let dy = self.y() - other.y();
        let dz = self.z() - other.z();

        (dw * dw + dx * dx + dy * dy + dz * dz).sqrt()
    }
}

impl Default for Orientation {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Display for Orientation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[W:{:.4} X:{:.4} Y:{:.4} Z:{:.4}]",
            self.w(),
            self.x(),
            self.y(),
            self.z()
        )
    }
}

/// Three component vector as transmitted by the sensor
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vector(pub Vector3<f32>);

impl Vector {
    pub const ZERO: Vector = Vector::new(0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self(Vector3 { x, y, z })
    }
}

impl Default for Vector {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Display for Vector {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.4}, {:.4}, {:.4})", self.0.x, self.0.y, self.0.z)
    }
}

/// One decoded sensor data frame
#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    /// Device timestamp in seconds
    pub timestamp: f32,
    pub orientation: Orientation,
}

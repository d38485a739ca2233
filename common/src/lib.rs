//! Code shared between the sensor driver and its front ends

pub mod error;
pub mod types;

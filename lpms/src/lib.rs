//! Driver for LPMS inertial measurement units speaking the LP-BUS framed protocol over a
//! byte stream

pub mod buf;
pub mod command;
pub mod config;
pub mod connection;
pub mod device;
pub mod error;
pub mod fields;
pub mod layout;
pub mod packet;
pub mod transmitter;

#[cfg(test)]
pub(crate) mod mock;

pub use command::Command;
pub use config::{Configuration, FilterMode, MagnetometerCorrection, FREQUENCY_TABLE};
pub use connection::{Connection, Endpoint, TcpConnection};
pub use device::{Device, DeviceMode, Sampler};
pub use error::{LpmsError, LpmsResult};
pub use fields::{DeviceStatus, OperationOptions, OutputFields};
pub use layout::Layout;
pub use packet::Packet;

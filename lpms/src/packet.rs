//! Encoding and decoding of a single protocol frame
//!
//! ```text
//! 0x3A | sensor id | command | len | payload | checksum | 0x0D 0x0A
//!  u8  |  u16 LE   | u16 LE  | u16 | len × u8 |  u16 LE  |  u8   u8
//! ```

use std::fmt::{Debug, Formatter};

use common::types::{Orientation, Vector};

use crate::{
    command::Command,
    error::{LpmsError, LpmsResult},
};

pub const PACKET_START: u8 = 0x3A;
pub const PACKET_END1: u8 = 0x0D;
pub const PACKET_END2: u8 = 0x0A;

/// Start marker, sensor id, command and payload length
pub const HEADER_SIZE: usize = 7;
/// Checksum and both end markers
pub const FOOTER_SIZE: usize = 4;
pub const PACKET_OVERHEAD: usize = HEADER_SIZE + FOOTER_SIZE;

pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

const MIN_PAYLOAD_CAPACITY: usize = 16;

/// Somewhere bytes of a frame can be pulled from one at a time
pub trait ByteSource {
    fn next_byte(&mut self) -> LpmsResult<u8>;

    /// Called once the header has been read and the size of the whole frame is known
    fn reserve_frame(&mut self, _frame_size: usize) -> LpmsResult<()> {
        Ok(())
    }
}

impl ByteSource for &[u8] {
    fn next_byte(&mut self) -> LpmsResult<u8> {
        match self.split_first() {
            Some((&byte, remaining)) => {
                *self = remaining;
                Ok(byte)
            }
            None => Err(LpmsError::MalformedFrame("frame is truncated")),
        }
    }
}

/// A protocol frame together with a read/write cursor over its payload
///
/// `data` may be longer than the logical payload, only the first `len` bytes belong to it.
#[derive(Clone)]
pub struct Packet {
    sensor_id: u16,
    command: u16,
    data: Vec<u8>,
    len: usize,
    cursor: usize,
}

impl Packet {
    pub fn new(sensor_id: u16, command: Command) -> Self {
        Self::with_capacity(sensor_id, command, 0)
    }

    pub fn with_capacity(sensor_id: u16, command: Command, capacity: usize) -> Self {
        Packet {
            sensor_id,
            command: command.code(),
            data: vec![0; capacity],
            len: 0,
            cursor: 0,
        }
    }

    pub fn with_payload(sensor_id: u16, command: Command, payload: &[u8]) -> LpmsResult<Self> {
        Self::from_raw(sensor_id, command.code(), payload.to_vec())
    }

    /// Builds a frame from a raw command code, codes unknown to [`Command`] are allowed
    pub fn from_raw(sensor_id: u16, command: u16, payload: Vec<u8>) -> LpmsResult<Self> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(LpmsError::OversizedPayload(payload.len()));
        }

        Ok(Packet {
            sensor_id,
            command,
            len: payload.len(),
            data: payload,
            cursor: 0,
        })
    }

    pub fn sensor_id(&self) -> u16 {
        self.sensor_id
    }

    /// `None` for codes this driver does not know
    pub fn command(&self) -> Option<Command> {
        Command::from_code(self.command)
    }

    pub fn command_code(&self) -> u16 {
        self.command
    }

    pub fn is(&self, command: Command) -> bool {
        self.command == command.code()
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn payload_len(&self) -> usize {
        self.len
    }

    pub fn checksum(&self) -> u16 {
        compute_checksum(self.sensor_id, self.command, self.payload())
    }

    pub fn encoded_len(&self) -> usize {
        self.len + PACKET_OVERHEAD
    }

    /// Appends the wire representation of this frame to `out`
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.reserve(self.encoded_len());

        out.push(PACKET_START);
        out.extend_from_slice(&self.sensor_id.to_le_bytes());
        out.extend_from_slice(&self.command.to_le_bytes());
        out.extend_from_slice(&(self.len as u16).to_le_bytes());
        out.extend_from_slice(self.payload());
        out.extend_from_slice(&self.checksum().to_le_bytes());
        out.push(PACKET_END1);
        out.push(PACKET_END2);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out);
        out
    }

    /// Decodes one frame, `source` must be positioned at the start marker
    pub fn decode(mut source: impl ByteSource) -> LpmsResult<Packet> {
        if source.next_byte()? != PACKET_START {
            return Err(LpmsError::MalformedFrame("missing start marker"));
        }

        Self::decode_after_start(&mut source, false)?
            .ok_or(LpmsError::MalformedFrame("frame was discarded"))
    }

    /// Decodes the remainder of a frame whose start marker was already consumed
    ///
    /// With `discard` set the payload is skipped and the checksum not verified,
    /// the end markers are still checked.
    pub(crate) fn decode_after_start(
        source: &mut impl ByteSource,
        discard: bool,
    ) -> LpmsResult<Option<Packet>> {
        let sensor_id = read_u16(source)?;
        let command = read_u16(source)?;
        let len = read_u16(source)? as usize;

        source.reserve_frame(len + PACKET_OVERHEAD)?;

        let mut data = Vec::new();
        if discard {
            for _ in 0..len {
                source.next_byte()?;
            }
        } else {
            data.reserve_exact(len);
            for _ in 0..len {
                data.push(source.next_byte()?);
            }
        }

        let transmitted = read_u16(source)?;
        if source.next_byte()? != PACKET_END1 || source.next_byte()? != PACKET_END2 {
            return Err(LpmsError::MalformedFrame("invalid end markers"));
        }

        if discard {
            return Ok(None);
        }

        let computed = compute_checksum(sensor_id, command, &data);
        if computed != transmitted {
            return Err(LpmsError::ChecksumMismatch {
                transmitted,
                computed,
            });
        }

        Ok(Some(Packet {
            sensor_id,
            command,
            len,
            data,
            cursor: 0,
        }))
    }

    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn seek(&mut self, offset: usize) -> LpmsResult<()> {
        if offset > self.len {
            return Err(LpmsError::ShortRead {
                offset,
                requested: 0,
                len: self.len,
            });
        }

        self.cursor = offset;
        Ok(())
    }

    fn take<const N: usize>(&mut self) -> LpmsResult<[u8; N]> {
        let end = self.cursor + N;
        if end > self.len {
            return Err(LpmsError::ShortRead {
                offset: self.cursor,
                requested: N,
                len: self.len,
            });
        }

        let mut bytes = [0; N];
        bytes.copy_from_slice(&self.data[self.cursor..end]);
        self.cursor = end;

        Ok(bytes)
    }

    pub fn read_u32(&mut self) -> LpmsResult<u32> {
        self.take().map(u32::from_le_bytes)
    }

    pub fn read_f32(&mut self) -> LpmsResult<f32> {
        self.take().map(f32::from_le_bytes)
    }

    pub fn read_vector(&mut self) -> LpmsResult<Vector> {
        self.ensure_readable(12)?;

        let x = self.read_f32()?;
        let y = self.read_f32()?;
        let z = self.read_f32()?;

        Ok(Vector::new(x, y, z))
    }

    /// Components are transmitted in W, X, Y, Z order
    pub fn read_quaternion(&mut self) -> LpmsResult<Orientation> {
        self.ensure_readable(16)?;

        let w = self.read_f32()?;
        let x = self.read_f32()?;
        let y = self.read_f32()?;
        let z = self.read_f32()?;

        Ok(Orientation::new(w, x, y, z))
    }

    // Fail before consuming anything so a partial value never moves the cursor
    fn ensure_readable(&self, size: usize) -> LpmsResult<()> {
        if self.cursor + size > self.len {
            return Err(LpmsError::ShortRead {
                offset: self.cursor,
                requested: size,
                len: self.len,
            });
        }

        Ok(())
    }

    fn put(&mut self, bytes: &[u8]) -> LpmsResult<()> {
        let end = self.cursor + bytes.len();
        if end > MAX_PAYLOAD_SIZE {
            return Err(LpmsError::OversizedPayload(end));
        }

        if end > self.data.len() {
            let capacity = if self.data.is_empty() {
                end.max(MIN_PAYLOAD_CAPACITY)
            } else {
                (self.data.len() * 2).max(end)
            };
            self.data.resize(capacity.min(MAX_PAYLOAD_SIZE), 0);
        }

        self.data[self.cursor..end].copy_from_slice(bytes);
        self.cursor = end;
        self.len = self.len.max(end);

        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> LpmsResult<()> {
        self.put(&value.to_le_bytes())
    }

    pub fn write_f32(&mut self, value: f32) -> LpmsResult<()> {
        self.put(&value.to_le_bytes())
    }

    pub fn write_bool(&mut self, value: bool) -> LpmsResult<()> {
        self.write_u32(value as u32)
    }

    pub fn write_vector(&mut self, value: Vector) -> LpmsResult<()> {
        self.write_f32(value.0.x)?;
        self.write_f32(value.0.y)?;
        self.write_f32(value.0.z)
    }

    pub fn write_quaternion(&mut self, value: Orientation) -> LpmsResult<()> {
        self.write_f32(value.w())?;
        self.write_f32(value.x())?;
        self.write_f32(value.y())?;
        self.write_f32(value.z())
    }
}

impl PartialEq for Packet {
    fn eq(&self, other: &Self) -> bool {
        self.sensor_id == other.sensor_id
            && self.command == other.command
            && self.payload() == other.payload()
    }
}

impl Debug for Packet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("Packet");
        debug.field("sensor_id", &self.sensor_id);
        match self.command() {
            Some(command) => debug.field("command", &command),
            None => debug.field("command", &self.command),
        };
        debug.field("len", &self.len).finish()
    }
}

pub fn compute_checksum(sensor_id: u16, command: u16, payload: &[u8]) -> u16 {
    payload.iter().fold(
        sensor_id
            .wrapping_add(command)
            .wrapping_add(payload.len() as u16),
        |sum, &byte| sum.wrapping_add(byte as u16),
    )
}

fn read_u16(source: &mut impl ByteSource) -> LpmsResult<u16> {
    let low = source.next_byte()?;
    let high = source.next_byte()?;

    Ok(u16::from_le_bytes([low, high]))
}

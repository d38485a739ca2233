//! Framing of outbound packets and de-framing of the inbound byte stream
//!
//! Sends and receives are serialized independently so one thread can wait for sensor
//! data while another issues commands.

use std::{
    sync::{Mutex, MutexGuard, PoisonError},
    thread,
    time::{Duration, Instant},
};

use tracing::{trace, warn};

use crate::{
    buf::{RingBuffer, DEFAULT_CAPACITY},
    connection::{Connection, POLL_INTERVAL},
    error::{LpmsError, LpmsResult},
    packet::{ByteSource, Packet, PACKET_START},
};

#[derive(Debug)]
pub struct Transmitter<C> {
    connection: C,
    outbound: Mutex<Vec<u8>>,
    inbound: Mutex<RingBuffer>,
}

impl<C: Connection> Transmitter<C> {
    pub fn new(connection: C) -> Self {
        Self::with_capacity(connection, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(connection: C, capacity: usize) -> Self {
        Transmitter {
            connection,
            outbound: Mutex::new(Vec::new()),
            inbound: Mutex::new(RingBuffer::with_capacity(capacity)),
        }
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// Writes one frame to the connection
    pub fn send(&self, packet: &Packet) -> LpmsResult<()> {
        let mut outbound = lock(&self.outbound);
        outbound.clear();
        packet.encode_into(&mut outbound);

        trace!(?packet, "Send");
        self.connection.write(&outbound)
    }

    /// Receives the next frame, waiting at most `timeout` for its bytes to arrive
    ///
    /// A timeout in the middle of a frame leaves its bytes buffered so a later call can
    /// finish decoding it. Corrupt frames are consumed.
    pub fn receive(&self, timeout: Duration) -> LpmsResult<Packet> {
        let mut inbound = lock(&self.inbound);
        let packet = self
            .receive_locked(&mut inbound, timeout, false)?
            .ok_or(LpmsError::MalformedFrame("frame was discarded"))?;

        trace!(?packet, "Received");
        Ok(packet)
    }

    /// Throws away every frame that is already completely buffered or available on the
    /// connection without waiting for more, returns the number of frames dropped
    pub fn discard_pending(&self) -> LpmsResult<usize> {
        let mut inbound = lock(&self.inbound);

        let mut discarded = 0;
        loop {
            match self.receive_locked(&mut inbound, Duration::ZERO, true) {
                Ok(_) => discarded += 1,
                Err(err) if err.is_timeout() => break,
                Err(err) if err.is_recoverable() => {
                    warn!("Dropped corrupt frame: {err}");
                    discarded += 1;
                }
                Err(err) => return Err(err),
            }
        }

        if discarded > 0 {
            trace!("Discarded {discarded} pending frames");
        }

        Ok(discarded)
    }

    pub fn close(&self) -> LpmsResult<()> {
        self.connection.close()
    }

    fn receive_locked(
        &self,
        buffer: &mut RingBuffer,
        timeout: Duration,
        discard: bool,
    ) -> LpmsResult<Option<Packet>> {
        let mut reader = StreamReader {
            connection: &self.connection,
            buffer,
            started: Instant::now(),
            timeout,
        };

        // Skip anything before the next start marker
        loop {
            if reader.next_byte()? == PACKET_START {
                break;
            }
            reader.buffer.release();
        }
        reader.buffer.mark_last();

        let res = Packet::decode_after_start(&mut reader, discard);
        match &res {
            Err(err) if err.is_timeout() => reader.buffer.rewind(),
            _ => reader.buffer.release(),
        }

        res
    }
}

/// Pulls bytes out of the ring buffer, refilling it from the connection as needed
struct StreamReader<'a, C: ?Sized> {
    connection: &'a C,
    buffer: &'a mut RingBuffer,
    started: Instant,
    timeout: Duration,
}

impl<C: Connection + ?Sized> ByteSource for StreamReader<'_, C> {
    fn next_byte(&mut self) -> LpmsResult<u8> {
        loop {
            if let Some(byte) = self.buffer.pop() {
                return Ok(byte);
            }

            let available = self.connection.bytes_available()?;
            if available > 0 && self.buffer.fill_from(self.connection, available)? > 0 {
                continue;
            }

            if self.started.elapsed() > self.timeout {
                return Err(LpmsError::Timeout);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn reserve_frame(&mut self, frame_size: usize) -> LpmsResult<()> {
        if frame_size > self.buffer.capacity() {
            trace!("Growing receive buffer for a {frame_size} byte frame");
        }
        self.buffer.reserve(frame_size);

        Ok(())
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::{command::Command, error::LpmsError, mock::MockConnection, packet::Packet};

    use super::Transmitter;

    const SHORT: Duration = Duration::from_millis(20);

    fn frame(command: Command, payload: &[u8]) -> Vec<u8> {
        Packet::with_payload(1, command, payload).unwrap().encode()
    }

    #[test]
    fn send_writes_one_frame() {
        let connection = MockConnection::new();
        let transmitter = Transmitter::new(connection.clone());

        let mut packet = Packet::new(1, Command::SetStreamFrequency);
        packet.write_u32(100).unwrap();
        transmitter.send(&packet).unwrap();
        transmitter.send(&Packet::new(1, Command::GotoStreamMode)).unwrap();

        assert_eq!(connection.sent(), vec![packet, Packet::new(1, Command::GotoStreamMode)]);
    }

    #[test]
    fn receive_skips_stray_bytes() {
        let connection = MockConnection::new();
        let transmitter = Transmitter::new(connection.clone());

        connection.push_bytes(&[0x00, 0xFF, 0x0D, 0x0A]);
        connection.push_bytes(&frame(Command::Acknowledge, &[]));

        let packet = transmitter.receive(SHORT).unwrap();
        assert!(packet.is(Command::Acknowledge));
    }

    #[test]
    fn timeout_when_idle() {
        let transmitter = Transmitter::new(MockConnection::new());
        assert!(matches!(transmitter.receive(SHORT), Err(LpmsError::Timeout)));
    }

    #[test]
    fn resync_after_timeout_mid_frame() {
        let connection = MockConnection::new();
        let transmitter = Transmitter::new(connection.clone());

        let bytes = frame(Command::GetSensorData, &[1, 2, 3, 4, 5, 6, 7, 8]);
        let (head, tail) = bytes.split_at(9);

        connection.push_bytes(head);
        assert!(matches!(transmitter.receive(SHORT), Err(LpmsError::Timeout)));

        connection.push_bytes(tail);
        let packet = transmitter.receive(SHORT).unwrap();
        assert!(packet.is(Command::GetSensorData));
        assert_eq!(packet.payload(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn corrupt_frame_is_consumed() {
        let connection = MockConnection::new();
        let transmitter = Transmitter::new(connection.clone());

        let mut corrupt = frame(Command::GetSensorData, &[1, 2, 3, 4]);
        corrupt[8] ^= 0x40;
        connection.push_bytes(&corrupt);
        connection.push_bytes(&frame(Command::Acknowledge, &[]));

        assert!(matches!(
            transmitter.receive(SHORT),
            Err(LpmsError::ChecksumMismatch { .. })
        ));
        assert!(transmitter.receive(SHORT).unwrap().is(Command::Acknowledge));
    }

    #[test]
    fn frames_keep_their_order() {
        let connection = MockConnection::new();
        let transmitter = Transmitter::new(connection.clone());

        let mut stream = Vec::new();
        for value in 0..50u8 {
            stream.extend(frame(Command::GetSensorData, &[value; 13]));
        }
        // Arrives in odd sized pieces
        for chunk in stream.chunks(7) {
            connection.push_bytes(chunk);
        }

        for value in 0..50u8 {
            let packet = transmitter.receive(SHORT).unwrap();
            assert_eq!(packet.payload(), &[value; 13]);
        }
    }

    #[test]
    fn buffer_grows_for_large_frames() {
        let connection = MockConnection::new();
        let transmitter = Transmitter::with_capacity(connection.clone(), 16);

        let payload = (0..3000).map(|i| i as u8).collect::<Vec<_>>();
        connection.push_bytes(&[0x11; 5]);
        connection.push_bytes(&frame(Command::GetSensorData, &payload));

        let packet = transmitter.receive(Duration::from_secs(1)).unwrap();
        assert_eq!(packet.payload(), &payload[..]);
    }

    #[test]
    fn discard_drains_complete_frames() {
        let connection = MockConnection::new();
        let transmitter = Transmitter::new(connection.clone());

        let mut corrupt = frame(Command::GetStatus, &[0; 4]);
        let last = corrupt.len() - 1;
        corrupt[last] = 0x00;

        connection.push_bytes(&frame(Command::GetSensorData, &[0; 8]));
        connection.push_bytes(&corrupt);
        connection.push_bytes(&frame(Command::Acknowledge, &[]));

        assert_eq!(transmitter.discard_pending().unwrap(), 3);
        assert_eq!(transmitter.discard_pending().unwrap(), 0);
        assert!(matches!(transmitter.receive(SHORT), Err(LpmsError::Timeout)));
    }

    #[test]
    fn discard_is_idempotent() {
        let connection = MockConnection::new();
        let transmitter = Transmitter::new(connection.clone());

        let partial = frame(Command::GetSensorData, &[9; 8]);
        connection.push_bytes(&frame(Command::Acknowledge, &[]));
        connection.push_bytes(&partial[..6]);

        assert_eq!(transmitter.discard_pending().unwrap(), 1);
        let position = transmitter.inbound.lock().unwrap().read_position();

        assert_eq!(transmitter.discard_pending().unwrap(), 0);
        assert_eq!(transmitter.inbound.lock().unwrap().read_position(), position);

        // The partial frame survives and completes later
        connection.push_bytes(&partial[6..]);
        assert_eq!(transmitter.receive(SHORT).unwrap().payload(), &[9; 8]);
    }
}

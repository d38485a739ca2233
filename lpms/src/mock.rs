//! Scripted in-memory peer for tests

use std::{
    collections::VecDeque,
    fmt::{Debug, Formatter},
    sync::{Arc, Mutex},
    time::Duration,
};

use crate::{
    command::Command,
    connection::{Connection, Endpoint},
    error::{LpmsError, LpmsResult},
    packet::Packet,
    transmitter::lock,
};

type Responder = Box<dyn FnMut(&Packet) -> Vec<Packet> + Send>;

#[derive(Default)]
struct State {
    inbound: VecDeque<u8>,
    sent: Vec<Packet>,
    responder: Option<Responder>,
    /// Replies still to be sent with a broken checksum
    corrupt: usize,
    closed: bool,
}

/// A connection whose replies come from a responder closure invoked on every written frame
#[derive(Clone, Default)]
pub struct MockConnection {
    state: Arc<Mutex<State>>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responder(responder: impl FnMut(&Packet) -> Vec<Packet> + Send + 'static) -> Self {
        let connection = Self::new();
        connection.set_responder(responder);
        connection
    }

    /// Acknowledges every frame
    pub fn acknowledging() -> Self {
        Self::with_responder(|_| vec![Packet::new(1, Command::Acknowledge)])
    }

    pub fn set_responder(&self, responder: impl FnMut(&Packet) -> Vec<Packet> + Send + 'static) {
        lock(&self.state).responder = Some(Box::new(responder));
    }

    /// Flips the checksum of the next `count` replies
    pub fn corrupt_next_replies(&self, count: usize) {
        lock(&self.state).corrupt = count;
    }

    /// Makes raw bytes available for reading
    pub fn push_bytes(&self, bytes: &[u8]) {
        lock(&self.state).inbound.extend(bytes);
    }

    pub fn push_packet(&self, packet: &Packet) {
        self.push_bytes(&packet.encode());
    }

    pub fn sent(&self) -> Vec<Packet> {
        lock(&self.state).sent.clone()
    }

    pub fn sent_commands(&self) -> Vec<Command> {
        lock(&self.state)
            .sent
            .iter()
            .filter_map(Packet::command)
            .collect()
    }

    pub fn clear_sent(&self) {
        lock(&self.state).sent.clear();
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }
}

impl Debug for MockConnection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("MockConnection")
            .field("inbound", &state.inbound.len())
            .field("sent", &state.sent.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl Connection for MockConnection {
    fn write(&self, bytes: &[u8]) -> LpmsResult<()> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(LpmsError::PeerClosed);
        }

        let packet = Packet::decode(bytes)?;
        let replies = match &mut state.responder {
            Some(responder) => responder(&packet),
            None => Vec::new(),
        };

        state.sent.push(packet);
        for reply in replies {
            let mut encoded = reply.encode();
            if state.corrupt > 0 {
                state.corrupt -= 1;
                let checksum = encoded.len() - 4;
                encoded[checksum] ^= 0xFF;
            }
            state.inbound.extend(encoded);
        }

        Ok(())
    }

    fn bytes_available(&self) -> LpmsResult<usize> {
        Ok(lock(&self.state).inbound.len())
    }

    fn read_into(&self, buffer: &mut [u8]) -> LpmsResult<usize> {
        let mut state = lock(&self.state);

        let count = buffer.len().min(state.inbound.len());
        for (slot, byte) in buffer.iter_mut().zip(state.inbound.drain(..count)) {
            *slot = byte;
        }

        Ok(count)
    }

    fn close(&self) -> LpmsResult<()> {
        lock(&self.state).closed = true;
        Ok(())
    }
}

/// Hands out clones of one [`MockConnection`]
#[derive(Debug, Clone, Default)]
pub struct MockEndpoint {
    pub connection: MockConnection,
}

impl MockEndpoint {
    pub fn new(connection: MockConnection) -> Self {
        MockEndpoint { connection }
    }
}

impl Endpoint for MockEndpoint {
    type Connection = MockConnection;

    fn connect(&self, _timeout: Duration) -> LpmsResult<MockConnection> {
        Ok(self.connection.clone())
    }
}

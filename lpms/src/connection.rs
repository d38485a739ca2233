//! The byte stream a session talks over
//!
//! How the stream was obtained (radio discovery, pairing, bridging) is not this crate's
//! concern, anything offering these four operations can carry the protocol.

use std::{
    fmt::Debug,
    io::{ErrorKind, Read, Write},
    net::{Shutdown, SocketAddr},
    thread,
    time::{Duration, Instant},
};

use mio::{net::TcpStream, Events, Interest, Poll, Token};
use tracing::{debug, trace};

use crate::error::{LpmsError, LpmsResult};

/// Sleep between polls of a connection that had nothing to offer
pub const POLL_INTERVAL: Duration = Duration::from_millis(1);

const PROBE_LENGTH: usize = 4096;
const CONNECT_TOKEN: Token = Token(0);

/// A full duplex byte stream
///
/// All operations take `&self` since one thread may write requests while another is
/// reading replies.
pub trait Connection: Send + Sync {
    /// Writes all of `bytes`
    fn write(&self, bytes: &[u8]) -> LpmsResult<()>;
    /// Number of bytes that can be read right now without blocking
    fn bytes_available(&self) -> LpmsResult<usize>;
    /// Reads at most `buffer.len()` bytes without blocking
    fn read_into(&self, buffer: &mut [u8]) -> LpmsResult<usize>;
    fn close(&self) -> LpmsResult<()>;
}

/// The remote end a session is bound to
pub trait Endpoint: Debug {
    type Connection: Connection;

    /// Opens a connection, giving up after `timeout`
    fn connect(&self, timeout: Duration) -> LpmsResult<Self::Connection>;
}

#[derive(Debug)]
pub struct TcpConnection {
    socket: TcpStream,
}

impl TcpConnection {
    pub fn peer_addr(&self) -> LpmsResult<SocketAddr> {
        Ok(self.socket.peer_addr()?)
    }
}

impl Endpoint for SocketAddr {
    type Connection = TcpConnection;

    #[tracing::instrument]
    fn connect(&self, timeout: Duration) -> LpmsResult<TcpConnection> {
        let started = Instant::now();

        let mut socket = TcpStream::connect(*self)?;
        let mut poll = Poll::new()?;
        let mut events = Events::with_capacity(4);
        poll.registry()
            .register(&mut socket, CONNECT_TOKEN, Interest::WRITABLE)?;

        // Sockets don't connect instantly, wait for it to become writeable
        'outer: loop {
            let Some(remaining) = timeout.checked_sub(started.elapsed()) else {
                // Dropping the socket abandons the attempt
                debug!("Connect timed out");
                drop(socket);
                return Err(LpmsError::Timeout.chain("Connect to device".to_owned()));
            };

            match poll.poll(&mut events, Some(remaining)) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::Interrupted => continue 'outer,
                Err(err) => return Err(LpmsError::from(err).chain("Poll socket".to_owned())),
            }

            for event in &events {
                if event.token() != CONNECT_TOKEN {
                    continue;
                }

                if let Some(err) = socket.take_error()? {
                    return Err(LpmsError::from(err).chain("Connect to device".to_owned()));
                }

                match socket.peer_addr() {
                    Ok(addr) => {
                        trace!("Connected to {addr}");
                        break 'outer;
                    }
                    // Try again on the next event
                    Err(err) if err.kind() == ErrorKind::NotConnected => {}
                    Err(err) => {
                        return Err(LpmsError::from(err).chain("Connect to device".to_owned()))
                    }
                }
            }
        }

        poll.registry().deregister(&mut socket)?;
        socket.set_nodelay(true)?;

        Ok(TcpConnection { socket })
    }
}

impl Connection for TcpConnection {
    fn write(&self, mut bytes: &[u8]) -> LpmsResult<()> {
        while !bytes.is_empty() {
            match (&self.socket).write(bytes) {
                // Write zero means that the connection got closed
                Ok(0) => return Err(LpmsError::PeerClosed),
                Ok(count) => bytes = &bytes[count..],
                Err(err) if err.kind() == ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }

        Ok(())
    }

    fn bytes_available(&self) -> LpmsResult<usize> {
        let mut probe = [0; PROBE_LENGTH];

        loop {
            match self.socket.peek(&mut probe) {
                // Peeking zero means that the connection got closed
                Ok(0) => return Err(LpmsError::PeerClosed),
                Ok(count) => return Ok(count),
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(0),
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn read_into(&self, buffer: &mut [u8]) -> LpmsResult<usize> {
        loop {
            match (&self.socket).read(buffer) {
                Ok(0) if !buffer.is_empty() => return Err(LpmsError::PeerClosed),
                Ok(count) => return Ok(count),
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(0),
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn close(&self) -> LpmsResult<()> {
        match self.socket.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            // Peer already went away
            Err(err) if err.kind() == ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{Read, Write},
        net::{SocketAddr, TcpListener},
        thread,
        time::{Duration, Instant},
    };

    use crate::error::LpmsError;

    use super::{Connection, Endpoint};

    #[test]
    fn tcp_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = [0; 4];
            stream.read_exact(&mut request).unwrap();
            stream.write_all(&[request[3], request[2], request[1], request[0]]).unwrap();
            stream
        });

        let connection = addr.connect(Duration::from_secs(5)).unwrap();
        connection.write(&[1, 2, 3, 4]).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while connection.bytes_available().unwrap() < 4 {
            assert!(Instant::now() < deadline, "reply never arrived");
            thread::sleep(Duration::from_millis(1));
        }

        let mut reply = [0; 8];
        let count = connection.read_into(&mut reply).unwrap();
        assert_eq!(&reply[..count], &[4, 3, 2, 1]);
        assert_eq!(connection.bytes_available().unwrap(), 0);

        let stream = server.join().unwrap();
        drop(stream);

        // The server hung up
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match connection.bytes_available() {
                Err(LpmsError::PeerClosed) => break,
                Ok(_) => {
                    assert!(Instant::now() < deadline, "close never observed");
                    thread::sleep(Duration::from_millis(1));
                }
                Err(err) => panic!("unexpected error: {err}"),
            }
        }

        connection.close().unwrap();
    }

    #[test]
    fn connect_refused() {
        // Bind and immediately drop to get a port nobody listens on
        let addr: SocketAddr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };

        let res = addr.connect(Duration::from_secs(5));
        assert!(res.is_err());
    }
}

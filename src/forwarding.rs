//! Blocking byte pump between the two legs of a relayed connection.

use crate::tls_wrapper::{ClientFacingStream, UpstreamStream};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Read timeout put on both raw sockets while pumping, so neither direction
/// holds a leg's lock for longer than this.
pub const PUMP_POLL: Duration = Duration::from_millis(50);

/// One side of a relayed connection.
pub enum Leg {
    Plain(TcpStream),
    ClientFacing(Box<ClientFacingStream>),
    Upstream(Box<UpstreamStream>),
}

impl Leg {
    pub fn tcp(&self) -> &TcpStream {
        match self {
            Leg::Plain(stream) => stream,
            Leg::ClientFacing(tls) => tls.get_ref(),
            Leg::Upstream(tls) => &tls.sock,
        }
    }

    pub fn into_shared(self) -> SharedLeg {
        Arc::new(Mutex::new(self))
    }
}

impl Read for Leg {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Leg::Plain(stream) => stream.read(buf),
            Leg::ClientFacing(tls) => tls.read(buf),
            Leg::Upstream(tls) => tls.read(buf),
        }
    }
}

impl Write for Leg {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Leg::Plain(stream) => stream.write(buf),
            Leg::ClientFacing(tls) => tls.write(buf),
            Leg::Upstream(tls) => tls.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Leg::Plain(stream) => stream.flush(),
            Leg::ClientFacing(tls) => tls.flush(),
            Leg::Upstream(tls) => tls.flush(),
        }
    }
}

pub type SharedLeg = Arc<Mutex<Leg>>;

fn is_poll_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Copies `source` into `dest` until EOF, an I/O error or `closed` is set.
///
/// Returns the number of bytes moved. Sets `closed` on the way out so the
/// opposite direction stops too.
pub fn pump(source: &SharedLeg, dest: &SharedLeg, closed: &AtomicBool) -> u64 {
    let mut buffer = [0u8; 16 * 1024];
    let mut transferred = 0u64;

    while !closed.load(Ordering::Acquire) {
        let bytes_read = {
            let mut src = source.lock().unwrap_or_else(PoisonError::into_inner);
            match src.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if is_poll_timeout(&e) => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::trace!(error = %e, "forward: read ended");
                    break;
                }
            }
        };

        let mut dst = dest.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = dst.write_all(&buffer[..bytes_read]).and_then(|_| dst.flush()) {
            tracing::trace!(error = %e, "forward: write ended");
            break;
        }
        transferred += bytes_read as u64;
    }

    closed.store(true, Ordering::Release);
    transferred
}

/// Best-effort close of both directions of a raw socket.
pub fn shutdown_quietly(stream: &TcpStream) {
    if let Err(e) = stream.shutdown(Shutdown::Both) {
        tracing::trace!(error = %e, "socket already closed");
    }
}

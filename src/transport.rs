//! Non-blocking byte-stream transport under a session.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};

/// A non-blocking byte stream.
///
/// `read` and `write` follow `std::io` conventions: `Ok(0)` from `read` is
/// end of stream, `WouldBlock` means retry on the next readiness event.
pub trait Transport: Read + Write {
    /// Close both directions. Called exactly once, at session teardown.
    fn close(&mut self) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn close(&mut self) -> io::Result<()> {
        match self.shutdown(Shutdown::Both) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

#[cfg(unix)]
impl Transport for std::os::unix::net::UnixStream {
    fn close(&mut self) -> io::Result<()> {
        match self.shutdown(Shutdown::Both) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

//! Connection abstraction: a full-duplex byte stream with bounded
//! readiness polling, the single suspension point of the server.

use std::io::{self, ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Readable,
    TimedOut,
}

/// A zero timeout returns immediately. End-of-stream is not reported
/// here; it surfaces as a zero-length `read` after `Readable`.
pub trait Transport: Read + Write {
    fn wait_readable(&mut self, timeout: Duration) -> io::Result<Readiness>;
}

impl Transport for TcpStream {
    fn wait_readable(&mut self, timeout: Duration) -> io::Result<Readiness> {
        let mut probe = [0u8; 1];
        if timeout.is_zero() {
            self.set_nonblocking(true)?;
            let res = self.peek(&mut probe);
            self.set_nonblocking(false)?;
            match res {
                Ok(_) => Ok(Readiness::Readable),
                Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(Readiness::TimedOut),
                Err(e) => Err(e),
            }
        } else {
            self.set_read_timeout(Some(timeout))?;
            let res = self.peek(&mut probe);
            self.set_read_timeout(None)?;
            match res {
                Ok(_) => Ok(Readiness::Readable),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    Ok(Readiness::TimedOut)
                }
                Err(e) => Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::net::TcpListener;

    #[test]
    fn test_tcp_wait_readable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();
        let (mut server, _) = listener.accept().unwrap();

        // Nothing pending: zero-timeout poll reports a timeout
        assert_eq!(
            server.wait_readable(Duration::ZERO).unwrap(),
            Readiness::TimedOut
        );

        client.write_all(b"x").unwrap();
        client.flush().unwrap();
        assert_eq!(
            server.wait_readable(Duration::from_secs(5)).unwrap(),
            Readiness::Readable
        );

        // EOF is surfaced through read, not through the poll
        drop(client);
        assert_eq!(
            server.wait_readable(Duration::from_secs(5)).unwrap(),
            Readiness::Readable
        );
        let mut buf = [0u8; 8];
        let n = server.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"x");
        assert_eq!(server.read(&mut buf).unwrap(), 0);
    }
}

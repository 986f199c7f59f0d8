//! Reliable fixed-length message exchange over a byte stream.
//!
//! Every message of the search protocol has a size both ends can compute, so
//! the channel only ever reads exact lengths; a short read means the peer
//! closed the connection, which aborts the in-flight query. Integers cross
//! the wire little-endian on both ends.

use crate::error::OxtSseError;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

pub struct Channel<S> {
    stream: S,
}

impl<S: Read + Write> Channel<S> {
    pub fn new(stream: S) -> Channel<S> {
        Channel { stream }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Fills `buf` completely, retrying partial reads until the requested
    /// byte count is satisfied or the connection reports closed.
    pub fn read_exact_into(&mut self, buf: &mut [u8]) -> Result<(), OxtSseError> {
        self.stream.read_exact(buf).map_err(|e| OxtSseError::Transport(e.to_string()))
    }

    /// Reads exactly `len` bytes into a fresh buffer.
    pub fn read_vec(&mut self, len: usize) -> Result<Vec<u8>, OxtSseError> {
        let mut buf = vec![0u8; len];
        self.read_exact_into(&mut buf)?;
        Ok(buf)
    }

    /// Writes all of `bytes`, retrying partial writes.
    pub fn write_all_bytes(&mut self, bytes: &[u8]) -> Result<(), OxtSseError> {
        self.stream.write_all(bytes).map_err(|e| OxtSseError::Transport(e.to_string()))
    }

    pub fn flush(&mut self) -> Result<(), OxtSseError> {
        self.stream.flush().map_err(|e| OxtSseError::Transport(e.to_string()))
    }

    pub fn read_u32(&mut self) -> Result<u32, OxtSseError> {
        let mut buf = [0u8; 4];
        self.read_exact_into(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn write_u32(&mut self, value: u32) -> Result<(), OxtSseError> {
        self.write_all_bytes(&value.to_le_bytes())
    }

    pub fn read_u64(&mut self) -> Result<u64, OxtSseError> {
        let mut buf = [0u8; 8];
        self.read_exact_into(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    pub fn write_u64(&mut self, value: u64) -> Result<(), OxtSseError> {
        self.write_all_bytes(&value.to_le_bytes())
    }

    /// Ships a file out-of-band: an 8-byte length header followed by the raw
    /// contents. Used for artifacts like the membership filter bit array.
    pub fn send_file(&mut self, path: &Path) -> Result<(), OxtSseError> {
        let contents = fs::read(path).map_err(|e| OxtSseError::Transport(e.to_string()))?;

        self.write_u64(contents.len() as u64)?;
        self.write_all_bytes(&contents)?;
        self.flush()
    }

    /// Receives a file shipped by `send_file`, reading exactly the header's
    /// byte count, and writes it to `path`.
    pub fn recv_file(&mut self, path: &Path) -> Result<(), OxtSseError> {
        let len = self.read_u64()? as usize;
        let contents = self.read_vec(len)?;

        fs::write(path, contents).map_err(|e| OxtSseError::Transport(e.to_string()))
    }
}

#[cfg(test)]
mod test {
    use super::Channel;
    use std::io::Cursor;

    #[test]
    fn integers_round_trip_little_endian() {
        let mut channel = Channel::new(Cursor::new(Vec::new()));
        channel.write_u32(0x0403_0201).unwrap();
        channel.write_u64(7).unwrap();

        let buf = channel.into_inner().into_inner();
        assert_eq!(&buf[..4], &[1, 2, 3, 4]);

        let mut channel = Channel::new(Cursor::new(buf));
        assert_eq!(channel.read_u32().unwrap(), 0x0403_0201);
        assert_eq!(channel.read_u64().unwrap(), 7);
    }

    #[test]
    fn short_streams_report_transport_errors() {
        let mut channel = Channel::new(Cursor::new(vec![0u8; 3]));
        assert!(channel.read_u32().is_err());
    }

    #[test]
    fn file_helper_round_trips() {
        let src = std::env::temp_dir().join("oxtsse_channel_src.bin");
        let dst = std::env::temp_dir().join("oxtsse_channel_dst.bin");
        std::fs::write(&src, b"filter bits").unwrap();

        let mut channel = Channel::new(Cursor::new(Vec::new()));
        channel.send_file(&src).unwrap();

        let buf = channel.into_inner().into_inner();
        let mut channel = Channel::new(Cursor::new(buf));
        channel.recv_file(&dst).unwrap();

        assert_eq!(std::fs::read(&dst).unwrap(), b"filter bits");

        std::fs::remove_file(&src).unwrap();
        std::fs::remove_file(&dst).unwrap();
    }
}

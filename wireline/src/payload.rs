//! Request body sources.
//!
//! A payload is either an in-memory buffer or a streaming source read on
//! demand by the transport. Streamed sources can be non-seekable; the
//! transport may rewind a seekable payload to the beginning exactly once
//! (upload restart after a redirect or early close).

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use bytes::Bytes;
use tracing::warn;

/// A lazily-read source of request body bytes.
pub trait ContentStream: Send {
    /// Total number of bytes this stream will produce.
    fn total_size(&self) -> u64;

    /// Reposition the stream. Non-seekable streams fail for any position
    /// other than their current one.
    fn seek_to(&mut self, pos: u64) -> io::Result<()>;

    /// Read up to `dst.len()` bytes at the current position.
    fn read_into(&mut self, dst: &mut [u8]) -> io::Result<usize>;
}

/// [`ContentStream`] over a file on disk.
pub struct FileStream {
    file: File,
    len: u64,
}

impl FileStream {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }
}

impl ContentStream for FileStream {
    fn total_size(&self) -> u64 {
        self.len
    }

    fn seek_to(&mut self, pos: u64) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(pos)).map(|_| ())
    }

    fn read_into(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        self.file.read(dst)
    }
}

/// Request payload: in-memory bytes or a streamed source.
pub enum Payload {
    Memory(Bytes),
    Stream {
        stream: Box<dyn ContentStream>,
        cursor: u64,
    },
}

impl Default for Payload {
    fn default() -> Self {
        Payload::Memory(Bytes::new())
    }
}

impl Payload {
    pub fn from_stream(stream: Box<dyn ContentStream>) -> Self {
        Payload::Stream { stream, cursor: 0 }
    }

    pub fn content_length(&self) -> u64 {
        match self {
            Payload::Memory(b) => b.len() as u64,
            Payload::Stream { stream, .. } => stream.total_size(),
        }
    }

    /// In-memory content. Streamed payloads have no addressable content and
    /// return an empty slice.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Memory(b) => b,
            Payload::Stream { .. } => {
                warn!("content of a streamed payload is not addressable");
                &[]
            }
        }
    }

    /// Whether the payload can be re-sent from the start.
    pub fn is_seekable(&self) -> bool {
        matches!(self, Payload::Memory(_))
    }

    /// Streamed payloads are assumed not to be URL encoded, so requests
    /// carrying one need an explicit Content-Type.
    pub fn is_url_encoded(&self) -> bool {
        match self {
            Payload::Memory(b) => crate::headers::is_url_encoded(b),
            Payload::Stream { .. } => false,
        }
    }

    /// Copy up to `dst.len()` bytes starting at offset `already_sent` into
    /// `dst`, returning the number of bytes written. May be called
    /// repeatedly with a monotonically increasing offset.
    pub fn fill_output_buffer(&mut self, dst: &mut [u8], already_sent: u64) -> usize {
        let content_length = self.content_length();
        debug_assert!(already_sent <= content_length);
        let to_send = (content_length.saturating_sub(already_sent) as usize).min(dst.len());
        if to_send == 0 {
            return 0;
        }
        match self {
            Payload::Memory(b) => {
                let start = already_sent as usize;
                dst[..to_send].copy_from_slice(&b[start..start + to_send]);
                to_send
            }
            Payload::Stream { stream, cursor } => {
                if *cursor != already_sent {
                    if let Err(err) = stream.seek_to(already_sent) {
                        warn!(%err, "payload stream seek failed");
                        return 0;
                    }
                    *cursor = already_sent;
                }
                match stream.read_into(&mut dst[..to_send]) {
                    Ok(n) => {
                        *cursor += n as u64;
                        n
                    }
                    Err(err) => {
                        warn!(%err, "payload stream read failed");
                        0
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    struct ChunkStream {
        data: Vec<u8>,
        pos: u64,
    }

    impl ContentStream for ChunkStream {
        fn total_size(&self) -> u64 {
            self.data.len() as u64
        }

        fn seek_to(&mut self, pos: u64) -> io::Result<()> {
            if pos == self.pos {
                Ok(())
            } else {
                Err(io::Error::new(io::ErrorKind::Unsupported, "not seekable"))
            }
        }

        fn read_into(&mut self, dst: &mut [u8]) -> io::Result<usize> {
            let remaining = &self.data[self.pos as usize..];
            let n = remaining.len().min(dst.len());
            dst[..n].copy_from_slice(&remaining[..n]);
            self.pos += n as u64;
            Ok(n)
        }
    }

    #[test]
    fn memory_fill_in_chunks() {
        let mut p = Payload::Memory(Bytes::from_static(b"hello world"));
        let mut dst = [0u8; 4];
        assert_eq!(p.fill_output_buffer(&mut dst, 0), 4);
        assert_eq!(&dst, b"hell");
        assert_eq!(p.fill_output_buffer(&mut dst, 4), 4);
        assert_eq!(&dst, b"o wo");
        assert_eq!(p.fill_output_buffer(&mut dst, 8), 3);
        assert_eq!(&dst[..3], b"rld");
        assert_eq!(p.fill_output_buffer(&mut dst, 11), 0);
    }

    #[test]
    fn stream_fill_sequential() {
        let mut p = Payload::from_stream(Box::new(ChunkStream {
            data: b"abcdef".to_vec(),
            pos: 0,
        }));
        assert_eq!(p.content_length(), 6);
        let mut dst = [0u8; 4];
        assert_eq!(p.fill_output_buffer(&mut dst, 0), 4);
        assert_eq!(p.fill_output_buffer(&mut dst, 4), 2);
        assert_eq!(&dst[..2], b"ef");
    }

    #[test]
    fn non_seekable_stream_rejects_rewind() {
        let mut p = Payload::from_stream(Box::new(ChunkStream {
            data: b"abcdef".to_vec(),
            pos: 0,
        }));
        let mut dst = [0u8; 6];
        assert_eq!(p.fill_output_buffer(&mut dst, 0), 6);
        // A second pass from the start needs a seek, which this stream rejects.
        assert_eq!(p.fill_output_buffer(&mut dst, 0), 0);
    }

    #[test]
    fn file_stream_round_trip() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("wireline-payload-{}", std::process::id()));
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(b"0123456789").unwrap();
        }
        let mut p = Payload::from_stream(Box::new(FileStream::open(&path).unwrap()));
        assert_eq!(p.content_length(), 10);
        let mut dst = [0u8; 10];
        assert_eq!(p.fill_output_buffer(&mut dst, 3), 7);
        assert_eq!(&dst[..7], b"3456789");
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn url_encoded_only_for_memory() {
        assert!(Payload::Memory(Bytes::from_static(b"abc123")).is_url_encoded());
        assert!(!Payload::Memory(Bytes::from_static(b"a=b&c=d")).is_url_encoded());
        let s = Payload::from_stream(Box::new(ChunkStream {
            data: b"abc".to_vec(),
            pos: 0,
        }));
        assert!(!s.is_url_encoded());
    }
}

//! # Codec — compressed frame layer for column data files
//!
//! Column data files are a plain concatenation of independently compressed
//! *frames*. The writer stages raw bytes and cuts a frame whenever the stage
//! reaches its configured bound or the caller finishes a batch, so every
//! recorded file offset lands exactly on a frame boundary and a reader can
//! seek straight to it.
//!
//! ## Frame format
//!
//! ```text
//! [crc32: u32 LE][compressed_len: u32 LE][raw_len: u32 LE][payload ...]
//! ```
//!
//! `payload` is the LZ4 block compression of `raw_len` bytes of stream data;
//! the CRC32 covers the payload. A frame's raw size never exceeds the
//! writer's `max_block_size`.
//!
//! ## End of stream
//!
//! A clean EOF is only legal between frames. EOF inside a frame header or
//! payload, a checksum mismatch, or a decompressed length that does not match
//! `raw_len` all surface as `InvalidData`: the file is corrupt or truncated.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;

/// Bytes of frame header preceding the payload.
pub const FRAME_HEADER_BYTES: u64 = 4 + 4 + 4;

/// Sanity cap on a single frame's raw and compressed sizes (64 MiB).
/// Rejects absurd lengths from corrupt headers before allocating.
const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

/// Compressing writer. Stages raw bytes and emits LZ4 frames to the
/// underlying writer.
///
/// The writer tracks how many bytes it has pushed to the underlying file
/// ([`compressed_bytes`](Self::compressed_bytes)); combined with the file
/// size observed at open, that yields the exact on-disk offset of the next
/// frame without querying the filesystem.
pub struct CompressedWriter<W: Write> {
    out: W,
    /// Raw bytes staged for the next frame.
    stage: Vec<u8>,
    max_block_size: usize,
    compressed_bytes: u64,
}

impl<W: Write> CompressedWriter<W> {
    /// Wraps `out`, cutting frames of at most `max_block_size` raw bytes.
    pub fn new(out: W, max_block_size: usize) -> Self {
        Self {
            out,
            stage: Vec::with_capacity(max_block_size.min(64 * 1024)),
            max_block_size: max_block_size.max(1),
            compressed_bytes: 0,
        }
    }

    /// Total frame bytes (headers + payloads) pushed to the underlying
    /// writer so far.
    pub fn compressed_bytes(&self) -> u64 {
        self.compressed_bytes
    }

    /// Compresses and emits the staged bytes as one frame, if any.
    ///
    /// Unlike [`flush`](Write::flush), this does not flush the underlying
    /// writer; it only guarantees the next byte written starts a new frame.
    pub fn finish_block(&mut self) -> io::Result<()> {
        if self.stage.is_empty() {
            return Ok(());
        }
        let payload = lz4_flex::block::compress(&self.stage);
        if payload.len() > MAX_FRAME_BYTES as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "compressed frame too large",
            ));
        }
        let mut hasher = Crc32::new();
        hasher.update(&payload);
        self.out.write_u32::<LittleEndian>(hasher.finalize())?;
        self.out.write_u32::<LittleEndian>(payload.len() as u32)?;
        self.out.write_u32::<LittleEndian>(self.stage.len() as u32)?;
        self.out.write_all(&payload)?;
        self.compressed_bytes += FRAME_HEADER_BYTES + payload.len() as u64;
        self.stage.clear();
        Ok(())
    }

    /// Consumes the writer, emitting any staged frame and flushing the
    /// underlying writer.
    pub fn into_inner(mut self) -> io::Result<W> {
        self.finish_block()?;
        self.out.flush()?;
        Ok(self.out)
    }
}

impl<W: Write> Write for CompressedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut rest = buf;
        while !rest.is_empty() {
            let room = self.max_block_size - self.stage.len();
            let take = room.min(rest.len());
            self.stage.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.stage.len() == self.max_block_size {
                self.finish_block()?;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.finish_block()?;
        self.out.flush()
    }
}

/// Decompressing reader over a concatenation of frames.
pub struct CompressedReader<R: Read> {
    inner: R,
    /// Decompressed bytes of the current frame.
    buf: Vec<u8>,
    pos: usize,
}

impl<R: Read> CompressedReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            pos: 0,
        }
    }

    /// Reads and decompresses the next frame. Returns `false` on a clean EOF.
    fn next_frame(&mut self) -> io::Result<bool> {
        let mut header = [0u8; FRAME_HEADER_BYTES as usize];
        let mut filled = 0;
        while filled < header.len() {
            match self.inner.read(&mut header[filled..]) {
                Ok(0) if filled == 0 => return Ok(false),
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "truncated compressed frame header",
                    ))
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        let expected_crc = (&header[0..4]).read_u32::<LittleEndian>()?;
        let compressed_len = (&header[4..8]).read_u32::<LittleEndian>()?;
        let raw_len = (&header[8..12]).read_u32::<LittleEndian>()?;
        if compressed_len > MAX_FRAME_BYTES || raw_len > MAX_FRAME_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "corrupt frame header: compressed_len {} / raw_len {} exceed maximum {}",
                    compressed_len, raw_len, MAX_FRAME_BYTES
                ),
            ));
        }

        let mut payload = vec![0u8; compressed_len as usize];
        self.inner.read_exact(&mut payload).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                io::Error::new(io::ErrorKind::InvalidData, "truncated compressed frame")
            } else {
                e
            }
        })?;

        let mut hasher = Crc32::new();
        hasher.update(&payload);
        let actual_crc = hasher.finalize();
        if actual_crc != expected_crc {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "frame checksum mismatch: expected {:#010x}, got {:#010x}",
                    expected_crc, actual_crc
                ),
            ));
        }

        self.buf = lz4_flex::block::decompress(&payload, raw_len as usize)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if self.buf.len() != raw_len as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "frame decompressed to unexpected length",
            ));
        }
        self.pos = 0;
        Ok(true)
    }
}

impl<R: Read> Read for CompressedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos == self.buf.len() {
            if !self.next_frame()? {
                return Ok(0);
            }
        }
        let take = buf.len().min(self.buf.len() - self.pos);
        buf[..take].copy_from_slice(&self.buf[self.pos..self.pos + take]);
        self.pos += take;
        Ok(take)
    }
}

use std::io::{self, Cursor};

use bytes::{Buf, Bytes};
use thiserror::Error;

/// One inbound record: the bytes of a single line with the terminator and
/// surrounding whitespace removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(Bytes);

/// Longest accepted record, terminator excluded.
pub const MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum Error {
    /// No `\n` yet; more bytes are needed.
    #[error("stream ended early")]
    Incomplete,

    /// The record was dropped; the stream resumes after its terminator.
    #[error("request exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Frame {
    pub fn new(payload: impl Into<Bytes>) -> Frame {
        let payload: Bytes = payload.into();
        let start = payload
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(payload.len());
        let end = payload
            .iter()
            .rposition(|b| !b.is_ascii_whitespace())
            .map_or(start, |i| i + 1);

        Frame(payload.slice(start..end))
    }

    pub fn payload(&self) -> &[u8] {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.is_empty()
    }

    /// Wire form: the payload followed by a single `\n`.
    pub fn to_line(&self) -> Vec<u8> {
        let mut line = Vec::with_capacity(self.0.len() + 1);
        line.extend_from_slice(&self.0);
        line.push(b'\n');
        line
    }

    /// Advance `src` past one complete line, or report `Incomplete`.
    pub fn check(src: &mut Cursor<&[u8]>) -> Result<(), Error> {
        get_line(src)?;
        Ok(())
    }

    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Frame, Error> {
        let line = get_line(src)?;

        Ok(Frame::new(Bytes::copy_from_slice(line)))
    }
}

/// A "line" is everything up to the next `\n`, which is consumed but not returned.
fn get_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], Error> {
    if !src.has_remaining() {
        return Err(Error::Incomplete);
    }

    let start = src.position() as usize;
    let buf = *src.get_ref();

    match buf[start..].iter().position(|b| *b == b'\n') {
        Some(offset) => {
            let end = start + offset;
            src.set_position((end + 1) as u64);

            Ok(&buf[start..end])
        }
        None => Err(Error::Incomplete),
    }
}

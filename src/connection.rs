use std::io::{self, Cursor};

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;

use crate::frame::{self, Frame};
use crate::reply::Reply;

#[derive(Debug)]
pub struct Connection {
    stream: BufWriter<TcpStream>,
    buffer: BytesMut,
    max_frame_len: usize,
    // Inside an oversized record; drop bytes up to the next `\n`.
    discarding: bool,
}

impl Connection {
    pub fn new(socket: TcpStream) -> Connection {
        Connection::with_max_frame_len(socket, frame::MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(socket: TcpStream, max_frame_len: usize) -> Connection {
        Connection {
            stream: BufWriter::new(socket),
            buffer: BytesMut::with_capacity(4 * 1024),
            max_frame_len,
            discarding: false,
        }
    }

    /// Next non-blank frame, or `None` once the peer has closed its side.
    ///
    /// Bytes still buffered without a terminating `\n` when the peer
    /// half-closes are handed out as one last frame. A record longer than
    /// `max_frame_len` yields `Error::TooLarge` once; the next call carries
    /// on after that record.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, frame::Error> {
        loop {
            while let Some(frame) = self.parse_frame()? {
                if !frame.is_blank() {
                    return Ok(Some(frame));
                }
            }

            // read_buf returns the number of bytes appended to self.buffer
            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                let rest = self.buffer.split().freeze();

                if self.discarding {
                    return Ok(None);
                }

                let frame = Frame::new(rest);

                if frame.is_blank() {
                    return Ok(None);
                }

                return Ok(Some(frame));
            }
        }
    }

    fn parse_frame(&mut self) -> Result<Option<Frame>, frame::Error> {
        use frame::Error::Incomplete;

        if self.discarding {
            match self.buffer.iter().position(|b| *b == b'\n') {
                Some(end) => {
                    self.buffer.advance(end + 1);
                    self.discarding = false;
                }
                None => {
                    self.buffer.clear();
                    return Ok(None);
                }
            }
        }

        let mut buf = Cursor::new(&self.buffer[..]);

        match Frame::check(&mut buf) {
            Ok(_) => {
                let len = buf.position() as usize;

                if len - 1 > self.max_frame_len {
                    self.buffer.advance(len);
                    return Err(self.too_large());
                }

                buf.set_position(0);

                let frame = Frame::parse(&mut buf)?;

                self.buffer.advance(len);

                Ok(Some(frame))
            }
            Err(Incomplete) if self.buffer.len() > self.max_frame_len => {
                self.buffer.clear();
                self.discarding = true;
                Err(self.too_large())
            }
            Err(Incomplete) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn too_large(&self) -> frame::Error {
        frame::Error::TooLarge {
            limit: self.max_frame_len,
        }
    }

    pub async fn write_frame(&mut self, frame: &Frame) -> io::Result<()> {
        self.stream.write_all(&frame.to_line()).await?;
        self.stream.flush().await
    }

    pub async fn write_reply(&mut self, reply: &Reply) -> io::Result<()> {
        let mut line = reply.to_text().into_bytes();
        line.push(b'\n');

        self.stream.write_all(&line).await?;
        self.stream.flush().await
    }

    /// Close the write half; replies already flushed still reach the peer.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }
}

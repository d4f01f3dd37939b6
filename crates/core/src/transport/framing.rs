use std::io::{ErrorKind, Read};

use crate::error::{FramingErrorKind, Result, StreamError};

const READ_CHUNK: usize = 4096;
const CONTENT_LENGTH: &str = "Content-length";

/// Splits a byte stream into complete handshake messages.
///
/// A message is a header block ended by a blank line (`\n\n` or
/// `\r\n\r\n`), followed by exactly `Content-length` body bytes when that
/// header is present. Bytes read past the end of one message stay buffered
/// for the next call, so pipelined requests are not lost.
///
/// Reading is a single loop around one `read` call: a message delivered in
/// thousands of tiny chunks costs thousands of iterations, never stack.
pub struct MessageFramer<R> {
    reader: R,
    buffer: Vec<u8>,
    /// Total length of the message at the front of `buffer`, once its header
    /// has been seen.
    pending: Option<usize>,
    max_header_size: usize,
    max_body_size: usize,
}

impl<R: Read> MessageFramer<R> {
    pub fn new(reader: R, max_header_size: usize, max_body_size: usize) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(READ_CHUNK),
            pending: None,
            max_header_size,
            max_body_size,
        }
    }

    /// Bytes received but not yet returned as part of a message.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Read until one complete message is buffered and return it.
    ///
    /// `Ok(None)` means the peer closed the connection between messages.
    pub fn next_message(&mut self) -> Result<Option<Vec<u8>>> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(message) = self.take_message()? {
                return Ok(Some(message));
            }

            let read = match self.reader.read(&mut chunk) {
                Ok(read) => read,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };

            if read == 0 {
                if self.buffer.iter().all(u8::is_ascii_whitespace) {
                    return Ok(None);
                }
                return Err(StreamError::Framing {
                    kind: FramingErrorKind::UnexpectedEof {
                        buffered: self.buffer.len(),
                    },
                });
            }

            tracing::trace!(read, buffered = self.buffer.len() + read, "chunk received");
            self.buffer.extend_from_slice(&chunk[..read]);
        }
    }

    fn take_message(&mut self) -> Result<Option<Vec<u8>>> {
        if self.pending.is_none() {
            let keepalive = self
                .buffer
                .iter()
                .take_while(|b| matches!(b, b'\r' | b'\n'))
                .count();
            self.buffer.drain(..keepalive);

            let Some(header_end) = find_header_end(&self.buffer) else {
                if self.buffer.len() > self.max_header_size {
                    return Err(StreamError::Framing {
                        kind: FramingErrorKind::HeaderTooLarge {
                            limit: self.max_header_size,
                        },
                    });
                }
                return Ok(None);
            };
            if header_end > self.max_header_size {
                return Err(StreamError::Framing {
                    kind: FramingErrorKind::HeaderTooLarge {
                        limit: self.max_header_size,
                    },
                });
            }

            let body_len = content_length(&self.buffer[..header_end])?;
            if body_len > self.max_body_size {
                return Err(StreamError::Framing {
                    kind: FramingErrorKind::BodyTooLarge {
                        declared: body_len,
                        limit: self.max_body_size,
                    },
                });
            }
            self.pending = Some(header_end + body_len);
        }

        match self.pending {
            Some(total) if self.buffer.len() >= total => {
                self.pending = None;
                Ok(Some(self.buffer.drain(..total).collect()))
            }
            _ => Ok(None),
        }
    }
}

/// Index just past the blank line ending the header block.
fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .iter()
        .enumerate()
        .filter(|(_, b)| **b == b'\n')
        .find_map(|(i, _)| match buffer.get(i + 1..) {
            Some([b'\n', ..]) => Some(i + 2),
            Some([b'\r', b'\n', ..]) => Some(i + 3),
            _ => None,
        })
}

fn content_length(header: &[u8]) -> Result<usize> {
    let header = String::from_utf8_lossy(header);
    let value = header
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case(CONTENT_LENGTH))
        .map(|(_, value)| value.trim().to_string());

    match value {
        None => Ok(0),
        Some(value) => value.parse().map_err(|_| StreamError::Framing {
            kind: FramingErrorKind::InvalidContentLength(value),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    /// Hands out at most `chunk` bytes per read, with an interruption
    /// before every read when `interrupt` is set.
    struct ChunkedReader {
        data: Vec<u8>,
        position: usize,
        chunk: usize,
        interrupt: bool,
        interrupted: bool,
    }

    impl ChunkedReader {
        fn new(data: &[u8], chunk: usize) -> Self {
            Self {
                data: data.to_vec(),
                position: 0,
                chunk,
                interrupt: false,
                interrupted: false,
            }
        }
    }

    impl Read for ChunkedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.interrupt && !self.interrupted {
                self.interrupted = true;
                return Err(io::Error::from(ErrorKind::Interrupted));
            }
            self.interrupted = false;
            let end = (self.position + self.chunk.min(buf.len())).min(self.data.len());
            let read = end - self.position;
            buf[..read].copy_from_slice(&self.data[self.position..end]);
            self.position = end;
            Ok(read)
        }
    }

    fn framer(data: &[u8], chunk: usize) -> MessageFramer<ChunkedReader> {
        MessageFramer::new(ChunkedReader::new(data, chunk), 8 * 1024, 64 * 1024)
    }

    #[test]
    fn header_only_message() {
        let raw = b"OPTIONS rtsp://1.1.1.1:1 RTSP/1.0\r\nCSeq: 1\r\n\r\n";
        let mut framer = framer(raw, 1024);
        assert_eq!(framer.next_message().unwrap().unwrap(), raw);
        assert!(framer.next_message().unwrap().is_none());
    }

    #[test]
    fn body_delivered_byte_by_byte() {
        let body = "a=x-nv-video[0].clientViewportWd:1920 \r\n".repeat(200);
        let raw = format!(
            "ANNOUNCE streamid=control/13/0 RTSP/1.0\r\nCSeq: 7\r\nContent-length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        let mut framer = framer(raw.as_bytes(), 1);
        assert_eq!(framer.next_message().unwrap().unwrap(), raw.as_bytes());
    }

    #[test]
    fn interrupted_reads_are_retried() {
        let raw = b"OPTIONS rtsp://1.1.1.1:1 RTSP/1.0\nCSeq: 2\n\n";
        let mut reader = ChunkedReader::new(raw, 5);
        reader.interrupt = true;
        let mut framer = MessageFramer::new(reader, 1024, 1024);
        assert_eq!(framer.next_message().unwrap().unwrap(), raw);
    }

    #[test]
    fn pipelined_messages_and_keepalives() {
        let first = "SETUP streamid=audio/0/0 RTSP/1.0\r\nCSeq: 3\r\n\r\n";
        let second = "ANNOUNCE streamid=control/13/0 RTSP/1.0\nCSeq: 4\nContent-Length: 5\n\nv=0\r\n";
        let raw = format!("\r\n{first}\r\n\r\n{second}");
        let mut framer = framer(raw.as_bytes(), 7);

        assert_eq!(framer.next_message().unwrap().unwrap(), first.as_bytes());
        assert_eq!(framer.next_message().unwrap().unwrap(), second.as_bytes());
        assert!(framer.next_message().unwrap().is_none());
    }

    #[test]
    fn peer_closing_mid_message_is_an_error() {
        let raw = b"ANNOUNCE streamid=control/13/0 RTSP/1.0\r\nCSeq: 4\r\nContent-length: 50\r\n\r\nv=0";
        let err = framer(raw, 16).next_message().unwrap_err();
        assert!(matches!(
            err,
            StreamError::Framing {
                kind: FramingErrorKind::UnexpectedEof { .. }
            }
        ));
    }

    #[test]
    fn limits_are_enforced() {
        let endless = vec![b'A'; 300];
        let mut small = MessageFramer::new(ChunkedReader::new(&endless, 64), 128, 128);
        assert!(matches!(
            small.next_message().unwrap_err(),
            StreamError::Framing {
                kind: FramingErrorKind::HeaderTooLarge { limit: 128 }
            }
        ));

        let huge = b"ANNOUNCE x RTSP/1.0\r\nCSeq: 1\r\nContent-length: 129\r\n\r\n";
        let mut small = MessageFramer::new(ChunkedReader::new(huge, 64), 128, 128);
        assert!(matches!(
            small.next_message().unwrap_err(),
            StreamError::Framing {
                kind: FramingErrorKind::BodyTooLarge {
                    declared: 129,
                    limit: 128
                }
            }
        ));
    }

    #[test]
    fn invalid_content_length() {
        let raw = b"ANNOUNCE x RTSP/1.0\r\nCSeq: 1\r\nContent-length: lots\r\n\r\n";
        assert!(matches!(
            framer(raw, 64).next_message().unwrap_err(),
            StreamError::Framing {
                kind: FramingErrorKind::InvalidContentLength(_)
            }
        ));
    }

    #[test]
    fn header_terminator_detection() {
        assert_eq!(find_header_end(b"A\n\nB"), Some(3));
        assert_eq!(find_header_end(b"A\r\n\r\nB"), Some(5));
        assert_eq!(find_header_end(b"A\r\nB\r\n"), None);
        assert_eq!(find_header_end(b"A\r\n\r"), None);
    }
}

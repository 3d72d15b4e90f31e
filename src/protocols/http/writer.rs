//! Response serialization.
//!
//! An `Outgoing` holds everything still to be sent on one connection: the
//! header block followed by the body source. Bodies are streamed as raw
//! bytes in chunk-sized writes, so binary files go out untouched.
//!
//! ## Header format
//!
//! ```text
//! HTTP/1.1 200 OK\r\n
//! Server : selector-httpd\r\n
//! Content-Type : text/html\r\n
//! Content-Length : 13\r\n
//! \r\n
//! ```

use super::handler::{Body, Response};
use bytes::{Buf, Bytes, BytesMut};
use std::fs::File;
use std::io::{self, Read, Take, Write};

/// Progress of a non-blocking write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteProgress {
    /// Everything has been written.
    Done,
    /// The socket would block; resume on the next writable event.
    Blocked,
}

/// Body bytes not yet loaded into `pending`.
#[derive(Debug)]
enum Source {
    Exhausted,
    Bytes(Bytes),
    /// Limited to the advertised `Content-Length`.
    File(Take<File>),
}

/// Bytes queued for one connection.
#[derive(Debug)]
pub struct Outgoing {
    pending: Bytes,
    source: Source,
    written: u64,
}

impl Outgoing {
    /// Serialize a response: header block, then its body.
    pub fn response(response: Response, server_name: &str) -> Self {
        let head = format!(
            "HTTP/1.1 {} {}\r\nServer : {}\r\nContent-Type : {}\r\nContent-Length : {}\r\n\r\n",
            response.status.code(),
            response.status.reason(),
            server_name,
            response.content_type,
            response.body.len(),
        );

        let source = match response.body {
            Body::Bytes(bytes) => Source::Bytes(bytes),
            Body::File { file, len } => Source::File(file.take(len)),
        };

        Self {
            pending: Bytes::from(head),
            source,
            written: 0,
        }
    }

    /// Send bytes back verbatim.
    pub fn raw(data: Bytes) -> Self {
        Self {
            pending: data,
            source: Source::Exhausted,
            written: 0,
        }
    }

    /// Total bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Write as much as the sink accepts, at most `chunk_size` bytes per call.
    pub fn write_to<W: Write>(
        &mut self,
        sink: &mut W,
        chunk_size: usize,
    ) -> io::Result<WriteProgress> {
        loop {
            if self.pending.is_empty() && !self.refill(chunk_size)? {
                return Ok(WriteProgress::Done);
            }

            let end = self.pending.len().min(chunk_size);
            match sink.write(&self.pending[..end]) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
                }
                Ok(n) => {
                    self.pending.advance(n);
                    self.written += n as u64;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(WriteProgress::Blocked)
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Load the next piece of the body into `pending`.
    ///
    /// Returns `false` once the body is exhausted.
    fn refill(&mut self, chunk_size: usize) -> io::Result<bool> {
        match std::mem::replace(&mut self.source, Source::Exhausted) {
            Source::Exhausted => Ok(false),
            Source::Bytes(bytes) => {
                self.pending = bytes;
                Ok(!self.pending.is_empty())
            }
            Source::File(mut file) => {
                let mut chunk = BytesMut::zeroed(chunk_size);
                let n = loop {
                    match file.read(&mut chunk) {
                        Ok(n) => break n,
                        Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => return Err(e),
                    }
                };
                if n == 0 {
                    return Ok(false);
                }
                chunk.truncate(n);
                self.pending = chunk.freeze();
                self.source = Source::File(file);
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::http::handler::Status;

    /// Accepts at most `budget` bytes, then reports `WouldBlock`.
    struct Throttled {
        out: Vec<u8>,
        calls: Vec<usize>,
        budget: usize,
    }

    impl Write for Throttled {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(self.budget);
            self.budget -= n;
            self.out.extend_from_slice(&buf[..n]);
            self.calls.push(n);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn not_found() -> Response {
        Response {
            status: Status::NotFound,
            content_type: "text/html",
            body: Body::Bytes(Bytes::from_static(b"<h1>404</h1>")),
        }
    }

    #[test]
    fn test_header_block_format() {
        let mut out = Vec::new();
        let mut outgoing = Outgoing::response(not_found(), "test-server");

        assert_eq!(outgoing.write_to(&mut out, 1024).unwrap(), WriteProgress::Done);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "HTTP/1.1 404 Not Found\r\n\
             Server : test-server\r\n\
             Content-Type : text/html\r\n\
             Content-Length : 12\r\n\
             \r\n\
             <h1>404</h1>"
        );
    }

    #[test]
    fn test_resumes_after_would_block() {
        let mut sink = Throttled {
            out: Vec::new(),
            calls: Vec::new(),
            budget: 10,
        };
        let mut outgoing = Outgoing::response(not_found(), "s");

        assert_eq!(outgoing.write_to(&mut sink, 4).unwrap(), WriteProgress::Blocked);
        assert_eq!(outgoing.written(), 10);
        assert!(sink.calls.iter().all(|&n| n <= 4));

        sink.budget = usize::MAX;
        assert_eq!(outgoing.write_to(&mut sink, 4).unwrap(), WriteProgress::Done);

        let mut expected = Vec::new();
        Outgoing::response(not_found(), "s")
            .write_to(&mut expected, 1024)
            .unwrap();
        assert_eq!(sink.out, expected);
    }

    #[test]
    fn test_file_body_streamed_in_chunks() {
        let path = std::env::temp_dir()
            .join(format!("selector-httpd-writer-{}.png", std::process::id()));
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        std::fs::write(&path, &data).unwrap();

        let file = File::open(&path).unwrap();
        let response = Response {
            status: Status::Ok,
            content_type: "image/png",
            body: Body::File { file, len: 1000 },
        };

        let mut sink = Throttled {
            out: Vec::new(),
            calls: Vec::new(),
            budget: usize::MAX,
        };
        let mut outgoing = Outgoing::response(response, "s");
        assert_eq!(outgoing.write_to(&mut sink, 256).unwrap(), WriteProgress::Done);

        let text = String::from_utf8_lossy(&sink.out);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length : 1000\r\n"));
        assert!(sink.out.ends_with(&data));
        assert!(sink.calls.iter().all(|&n| n <= 256));

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_file_body_capped_at_content_length() {
        let path = std::env::temp_dir()
            .join(format!("selector-httpd-writer-grown-{}.html", std::process::id()));
        // The file grew after its length was taken.
        std::fs::write(&path, "0123456789appended").unwrap();

        let file = File::open(&path).unwrap();
        let response = Response {
            status: Status::Ok,
            content_type: "text/html",
            body: Body::File { file, len: 10 },
        };

        let mut out = Vec::new();
        let mut outgoing = Outgoing::response(response, "s");
        assert_eq!(outgoing.write_to(&mut out, 4).unwrap(), WriteProgress::Done);

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Content-Length : 10\r\n"));
        assert!(text.ends_with("\r\n\r\n0123456789"));

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_raw_echo_verbatim() {
        let data = Bytes::from_static(b"\x00\x01 not http \xff");
        let mut out = Vec::new();
        let mut outgoing = Outgoing::raw(data.clone());

        assert_eq!(outgoing.write_to(&mut out, 3).unwrap(), WriteProgress::Done);
        assert_eq!(out, data.to_vec());
    }

    #[test]
    fn test_write_zero_is_error() {
        struct Closed;
        impl Write for Closed {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Ok(0)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let err = Outgoing::raw(Bytes::from_static(b"x"))
            .write_to(&mut Closed, 16)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WriteZero);
    }
}

//! Message framing for backend processes.
//!
//! Both backends answer with `Content-Length: N\r\n\r\n{json}` frames on
//! stdout. Outbound framing differs: the language-protocol sidecar expects
//! the same Content-Length frames, while tsserver reads one JSON request per
//! line. [`MessageReader`] handles the former, [`MessageWriter`] both.

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Maximum frame size (16 MiB). Semantic classification payloads for large
/// components are sizeable, but anything past this is a broken stream.
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Outbound encoding expected by a backend process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// `Content-Length` header, blank line, JSON body.
    ContentLength,
    /// One JSON value per `\n`-terminated line.
    JsonLines,
}

/// Reads `Content-Length` framed JSON messages.
pub struct MessageReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read the next message.
    ///
    /// Returns `Ok(None)` on EOF between messages (clean shutdown) and `Err`
    /// on malformed headers, truncated bodies, oversized frames or invalid JSON.
    pub async fn read_message(&mut self) -> Result<Option<serde_json::Value>> {
        let Some(content_length) = self.read_headers().await? else {
            return Ok(None);
        };

        if content_length > MAX_FRAME_BYTES {
            bail!("Content-Length {content_length} exceeds maximum {MAX_FRAME_BYTES}");
        }

        let mut body = vec![0u8; content_length];
        self.reader
            .read_exact(&mut body)
            .await
            .context("reading message body")?;

        // tsserver counts its trailing newline in Content-Length; serde_json
        // accepts trailing whitespace so both producers parse the same way.
        let value = serde_json::from_slice(&body).context("parsing message body")?;
        Ok(Some(value))
    }

    async fn read_headers(&mut self) -> Result<Option<usize>> {
        let mut content_length: Option<usize> = None;
        let mut line = String::new();
        let mut saw_header = false;

        loop {
            line.clear();
            let bytes_read = self
                .reader
                .read_line(&mut line)
                .await
                .context("reading header line")?;

            if bytes_read == 0 {
                if !saw_header {
                    return Ok(None);
                }
                bail!("unexpected EOF while reading headers");
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                if saw_header {
                    break;
                }
                // Stray blank lines between frames (tsserver emits them
                // before its first frame on some platforms).
                continue;
            }
            saw_header = true;

            if let Some((key, value)) = trimmed.split_once(':')
                && key.trim().eq_ignore_ascii_case("Content-Length")
            {
                let len: usize = value
                    .trim()
                    .parse()
                    .context("invalid Content-Length value")?;
                content_length = Some(len);
            }
        }

        match content_length {
            Some(len) => Ok(Some(len)),
            None => bail!("missing Content-Length header"),
        }
    }
}

/// Writes JSON messages using the backend's expected [`Framing`].
pub struct MessageWriter<W> {
    writer: W,
    framing: Framing,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub fn new(writer: W, framing: Framing) -> Self {
        Self { writer, framing }
    }

    pub async fn write_message(&mut self, msg: &serde_json::Value) -> Result<()> {
        let body = serde_json::to_string(msg).context("serializing message")?;

        match self.framing {
            Framing::ContentLength => {
                let header = format!("Content-Length: {}\r\n\r\n", body.len());
                self.writer
                    .write_all(header.as_bytes())
                    .await
                    .context("writing message header")?;
                self.writer
                    .write_all(body.as_bytes())
                    .await
                    .context("writing message body")?;
            }
            Framing::JsonLines => {
                // serde_json never emits raw newlines inside a compact value.
                self.writer
                    .write_all(body.as_bytes())
                    .await
                    .context("writing message line")?;
                self.writer
                    .write_all(b"\n")
                    .await
                    .context("writing line terminator")?;
            }
        }

        self.writer.flush().await.context("flushing message")?;
        Ok(())
    }

    /// Flush and release the underlying writer (closes a child's stdin).
    pub async fn close(mut self) -> Result<()> {
        self.writer.shutdown().await.context("closing writer")
    }
}

//! Incremental `multipart/mixed` decoding.
//!
//! The body is fed in arbitrary chunks as it arrives; complete parts are
//! handed out as soon as their closing delimiter has been seen, so a response
//! with millions of parts is never held in memory at once.

use super::Error;
use bytes::{Buf, Bytes, BytesMut};
use futures::{Stream, StreamExt, TryStreamExt, stream::BoxStream};

const CRLF: &[u8] = b"\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    /// Before the first delimiter.
    Preamble,
    /// Right after a delimiter: either `--` (close) or CRLF (next part).
    Delimiter,
    Headers,
    Body,
    End,
}

#[derive(Debug)]
pub(super) struct PartDecoder {
    /// `--boundary`, as it appears at the start of the body.
    dash_boundary: Vec<u8>,
    /// `\r\n--boundary`, as it appears after every part body.
    delimiter: Vec<u8>,
    buf: BytesMut,
    /// Bytes of `buf` already known not to contain the delimiter.
    scanned: usize,
    state: State,
}

impl PartDecoder {
    pub(super) fn new(boundary: &str) -> Self {
        let dash_boundary = format!("--{boundary}").into_bytes();
        let mut delimiter = CRLF.to_vec();
        delimiter.extend_from_slice(&dash_boundary);
        Self {
            dash_boundary,
            delimiter,
            buf: BytesMut::new(),
            scanned: 0,
            state: State::Preamble,
        }
    }

    pub(super) fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Returns the next complete part body, or `None` if more input is
    /// needed (or the closing delimiter was reached).
    pub(super) fn next_part(&mut self) -> Result<Option<Bytes>, Error> {
        loop {
            match self.state {
                State::Preamble => {
                    let Some(at) = find(&self.buf, &self.dash_boundary) else {
                        return Ok(None);
                    };
                    self.buf.advance(at + self.dash_boundary.len());
                    self.state = State::Delimiter;
                }
                State::Delimiter => {
                    if self.buf.len() < 2 {
                        return Ok(None);
                    }
                    if self.buf.starts_with(b"--") {
                        self.buf.clear();
                        self.state = State::End;
                    } else if self.buf.starts_with(CRLF) {
                        self.buf.advance(CRLF.len());
                        self.state = State::Headers;
                    } else {
                        return Err(Error::Multipart(
                            "unexpected bytes after boundary".to_string(),
                        ));
                    }
                }
                State::Headers => {
                    if self.buf.starts_with(CRLF) {
                        // No headers at all.
                        self.buf.advance(CRLF.len());
                    } else {
                        let Some(at) = find(&self.buf, HEADER_END) else {
                            return Ok(None);
                        };
                        self.buf.advance(at + HEADER_END.len());
                    }
                    self.scanned = 0;
                    self.state = State::Body;
                }
                State::Body => {
                    let from = self.scanned.saturating_sub(self.delimiter.len() - 1);
                    let Some(at) = find(&self.buf[from..], &self.delimiter).map(|i| i + from)
                    else {
                        self.scanned = self.buf.len();
                        return Ok(None);
                    };
                    let part = self.buf.split_to(at).freeze();
                    self.buf.advance(self.delimiter.len());
                    self.state = State::Delimiter;
                    return Ok(Some(part));
                }
                State::End => return Ok(None),
            }
        }
    }

    /// Checks that the body ended on the closing delimiter.
    ///
    /// A body that never contained a delimiter and holds nothing but
    /// whitespace is treated as an empty result.
    pub(super) fn finish(&self) -> Result<(), Error> {
        match self.state {
            State::End => Ok(()),
            State::Preamble if self.buf.iter().all(u8::is_ascii_whitespace) => Ok(()),
            state => Err(Error::Multipart(format!(
                "body ended unexpectedly ({state:?}, {} bytes pending)",
                self.buf.len()
            ))),
        }
    }
}

/// Decodes `body` into a stream of part bodies.
pub(super) fn parts<S>(boundary: &str, body: S) -> BoxStream<'static, Result<Bytes, Error>>
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    let body = body.map_err(Error::from).boxed();
    futures::stream::try_unfold(
        (PartDecoder::new(boundary), body),
        |(mut decoder, mut body)| async move {
            loop {
                if let Some(part) = decoder.next_part()? {
                    return Ok(Some((part, (decoder, body))));
                }
                match body.next().await {
                    Some(chunk) => decoder.push(&chunk?),
                    None => {
                        decoder.finish()?;
                        return Ok(None);
                    }
                }
            }
        },
    )
    .boxed()
}

/// Extracts the `boundary` parameter of a `multipart/*` content type.
pub(super) fn boundary(content_type: &str) -> Option<&str> {
    let mut params = content_type.split(';');
    let mime = params.next()?.trim();
    if !mime.to_ascii_lowercase().starts_with("multipart/") {
        return None;
    }
    params.find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("boundary")
            .then(|| value.trim().trim_matches('"'))
            .filter(|b| !b.is_empty())
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = b"\r\n\
--XYZ\r\nContent-Type: text/plain\r\nX-Primitive: integer\r\n\r\n3\r\n\
--XYZ\r\nContent-Type: text/plain\r\n\r\n/docs/a.xml\r\n\
--XYZ\r\nContent-Type: text/plain\r\n\r\n/docs/b.xml\r\n\
--XYZ\r\n\r\nno headers\r\n--XYZ--\r\n";

    fn decode_in_chunks(body: &[u8], chunk: usize) -> Vec<String> {
        let mut decoder = PartDecoder::new("XYZ");
        let mut parts = Vec::new();
        for piece in body.chunks(chunk) {
            decoder.push(piece);
            while let Some(part) = decoder.next_part().unwrap() {
                parts.push(String::from_utf8(part.to_vec()).unwrap());
            }
        }
        decoder.finish().unwrap();
        parts
    }

    #[test]
    fn decodes_every_part() {
        let expected = ["3", "/docs/a.xml", "/docs/b.xml", "no headers"];
        assert_eq!(decode_in_chunks(BODY, BODY.len()), expected);
    }

    #[test]
    fn chunk_boundaries_do_not_matter() {
        let expected = decode_in_chunks(BODY, BODY.len());
        for chunk in [1, 2, 3, 5, 7, 11] {
            assert_eq!(
                decode_in_chunks(BODY, chunk),
                expected,
                "chunk size {chunk}"
            );
        }
    }

    #[test]
    fn part_bodies_may_contain_line_breaks() {
        let body = b"--b\r\n\r\nline one\r\nline two\r\n--b--";
        let mut decoder = PartDecoder::new("b");
        decoder.push(body);
        assert_eq!(
            decoder.next_part().unwrap().as_deref(),
            Some(&b"line one\r\nline two"[..])
        );
        assert_eq!(decoder.next_part().unwrap(), None);
        decoder.finish().unwrap();
    }

    #[test]
    fn truncated_body_is_an_error() {
        let mut decoder = PartDecoder::new("XYZ");
        decoder.push(&BODY[..40]);
        while decoder.next_part().unwrap().is_some() {}
        assert!(matches!(decoder.finish(), Err(Error::Multipart(_))));
    }

    #[test]
    fn empty_body_has_no_parts() {
        let mut decoder = PartDecoder::new("XYZ");
        decoder.push(b"\r\n");
        assert_eq!(decoder.next_part().unwrap(), None);
        decoder.finish().unwrap();
    }

    #[test]
    fn boundary_is_read_from_the_content_type() {
        assert_eq!(boundary("multipart/mixed; boundary=ABC123"), Some("ABC123"));
        assert_eq!(boundary("Multipart/Mixed;boundary=\"q\""), Some("q"));
        assert_eq!(boundary("text/plain; boundary=ABC"), None);
        assert_eq!(boundary("multipart/mixed"), None);
    }

    #[tokio::test]
    async fn streams_parts_from_a_chunked_body() {
        let chunks: Vec<reqwest::Result<Bytes>> = BODY
            .chunks(4)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();

        let decoded: Vec<Bytes> = parts("XYZ", futures::stream::iter(chunks))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(decoded.len(), 4);
        assert_eq!(decoded[1], Bytes::from_static(b"/docs/a.xml"));
    }
}

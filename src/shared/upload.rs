// This is free and unencumbered software released into the public domain.

//! HTTP/1.0 multipart image upload over a plain TCP socket.
//!
//! The request layout is fixed byte for byte; the receiving server parses it
//! with its own form handler.

use crate::shared::{MessageBuffer, UploadConfig, UploadError};
use derive_more::Display;
use std::{
    io::{Read, Write},
    net::{SocketAddr, TcpStream, ToSocketAddrs},
    time::{Duration, Instant},
};

pub const BOUNDARY: &str = "EtherJuice__26261265391015";
pub const ACTION: &str = "IMAGEUP";
pub const FILE_FIELD: &str = "file1";
pub const CONNECTION_ERROR: &str = "CONNECTION ERROR";

const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.5";
const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 6.1; WOW64; rv:45.0) Gecko/20100101 Firefox/45.0";

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum UploadState {
    Idle,
    Connecting,
    Sending,
    Receiving,
    Done,
    Failed,
}

/// Where the pieces of a built request sit in the message buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestLayout {
    /// Request line and headers, blank line included.
    pub header_len: usize,
    /// Value of the `Content-length` header.
    pub content_length: usize,
    pub payload_offset: usize,
    pub payload_len: usize,
}

impl RequestLayout {
    pub fn total_len(&self) -> usize {
        self.header_len + self.content_length
    }
}

/// Keeps quotes and line breaks out of the `Content-Disposition` header.
fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| if c == '"' || c.is_control() { '_' } else { c })
        .collect()
}

/// Request line, headers, and multipart framing around one payload.
struct RequestFraming {
    header: String,
    part_header: String,
    tail: String,
}

impl RequestFraming {
    fn new(host: &str, path: &str, filename: &str, payload_len: usize) -> Self {
        let filename = sanitize_filename(filename);

        let part_header = format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"Action\"\r\n\
             \r\n\
             {ACTION}\r\n\
             --{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"{FILE_FIELD}\"; filename=\"{filename}\"\r\n\
             Content-Type: image/jpg\r\n\
             \r\n"
        );
        let tail = format!("\r\n\r\n--{BOUNDARY}--");
        let content_length = part_header.len() + payload_len + tail.len();

        let header = format!(
            "POST {path} HTTP/1.0\r\n\
             Accept: {ACCEPT}\r\n\
             Accept-Language: {ACCEPT_LANGUAGE}\r\n\
             DNT: 1\r\n\
             Host: {host}\r\n\
             User-Agent: {USER_AGENT}\r\n\
             Content-Type: multipart/form-data; boundary={BOUNDARY}\r\n\
             Content-length: {content_length}\r\n\
             \r\n"
        );

        Self {
            header,
            part_header,
            tail,
        }
    }

    /// Bytes the request needs besides the payload.
    fn len(&self) -> usize {
        self.header.len() + self.part_header.len() + self.tail.len()
    }

    fn write(&self, payload: &[u8], buffer: &mut [u8]) -> Result<RequestLayout, UploadError> {
        let layout = RequestLayout {
            header_len: self.header.len(),
            content_length: self.part_header.len() + payload.len() + self.tail.len(),
            payload_offset: self.header.len() + self.part_header.len(),
            payload_len: payload.len(),
        };
        let needed = layout.total_len();
        if needed > buffer.len() {
            return Err(UploadError::BufferTooSmall {
                needed,
                capacity: buffer.len(),
            });
        }

        let mut at = 0;
        for piece in [
            self.header.as_bytes(),
            self.part_header.as_bytes(),
            payload,
            self.tail.as_bytes(),
        ] {
            buffer[at..at + piece.len()].copy_from_slice(piece);
            at += piece.len();
        }
        debug_assert_eq!(at, needed);
        Ok(layout)
    }
}

/// Writes the complete upload request for `payload` into `buffer`.
pub fn build_multipart_request(
    host: &str,
    path: &str,
    filename: &str,
    payload: &[u8],
    buffer: &mut [u8],
) -> Result<RequestLayout, UploadError> {
    RequestFraming::new(host, path, filename, payload.len()).write(payload, buffer)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Offset of the first `<result>` start tag, attributes allowed.
///
/// Longer names sharing the prefix, such as `<resultCode>`, are skipped.
fn find_result_tag(xml: &[u8]) -> Option<usize> {
    const TAG: &[u8] = b"<result";
    let mut from = 0;
    while let Some(at) = find(&xml[from..], TAG) {
        let start = from + at;
        match xml.get(start + TAG.len()) {
            Some(b) if *b == b'>' || *b == b'/' || b.is_ascii_whitespace() => return Some(start),
            None => return None,
            Some(_) => from = start + TAG.len(),
        }
    }
    None
}

/// Pulls the text of the first `<result>` element out of an XML fragment.
///
/// Tolerant by intent: skips past the next `>` after the tag start and reads
/// up to the next `<`. Returns `None` when there is no tag or it is empty.
pub fn extract_result(xml: &[u8]) -> Option<String> {
    let start = find_result_tag(xml)?;
    let rest = &xml[start..];
    let open_end = rest.iter().position(|&b| b == b'>')?;
    let content = &rest[open_end + 1..];
    let len = content.iter().position(|&b| b == b'<').unwrap_or(content.len());
    if len == 0 {
        return None;
    }
    Some(String::from_utf8_lossy(&content[..len]).into_owned())
}

/// A response read into the client's message buffer.
#[derive(Debug)]
pub struct UploadResponse<'a> {
    pub bytes: &'a [u8],
    /// Time spent waiting for the response after the request was written.
    pub elapsed: Duration,
    /// Offset of the first `<?xml` marker, if any.
    pub xml_offset: Option<usize>,
}

impl UploadResponse<'_> {
    pub fn xml(&self) -> Option<&[u8]> {
        self.xml_offset.map(|at| &self.bytes[at..])
    }

    pub fn result(&self) -> Option<String> {
        self.xml().and_then(extract_result)
    }
}

#[derive(Debug)]
pub struct UploadOutcome {
    pub elapsed: Duration,
    /// Server result text, empty if none, or `CONNECTION ERROR`.
    pub result: String,
    pub error: Option<UploadError>,
}

impl UploadOutcome {
    pub fn connection_error(error: UploadError) -> Self {
        Self {
            elapsed: Duration::ZERO,
            result: CONNECTION_ERROR.into(),
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug)]
pub struct UploadClient {
    config: UploadConfig,
    message: MessageBuffer,
    state: UploadState,
}

impl UploadClient {
    pub fn new(config: UploadConfig) -> Self {
        Self {
            config,
            message: MessageBuffer::new(),
            state: UploadState::Idle,
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    pub fn message_capacity(&self) -> usize {
        self.message.capacity()
    }

    /// Builds the request for `payload` in the message buffer.
    pub fn prepare(&mut self, filename: &str, payload: &[u8]) -> Result<RequestLayout, UploadError> {
        let framing =
            RequestFraming::new(&self.config.host, &self.config.path, filename, payload.len());
        let buffer = self.message.reserve_payload(payload.len(), framing.len());
        framing.write(payload, buffer)
    }

    fn resolve(&self) -> Result<SocketAddr, UploadError> {
        let host = &self.config.host;
        let addrs: Vec<SocketAddr> = (host.as_str(), self.config.port)
            .to_socket_addrs()
            .map_err(|e| UploadError::HostResolution {
                host: host.clone(),
                source: Some(e),
            })?
            .collect();
        addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| UploadError::HostResolution {
                host: host.clone(),
                source: None,
            })
    }

    /// Sends the first `len` bytes of the message buffer and reads one
    /// response chunk back into the same buffer.
    pub fn send(&mut self, len: usize) -> Result<UploadResponse<'_>, UploadError> {
        self.state = UploadState::Connecting;
        let result = self.exchange(len);
        match result {
            Ok((received, elapsed)) => {
                self.state = UploadState::Done;
                let bytes = &self.message.as_slice()[..received];
                Ok(UploadResponse {
                    bytes,
                    elapsed,
                    xml_offset: find(bytes, b"<?xml"),
                })
            },
            Err(err) => {
                self.state = UploadState::Failed;
                Err(err)
            },
        }
    }

    fn exchange(&mut self, len: usize) -> Result<(usize, Duration), UploadError> {
        let addr = self.resolve()?;
        let timeout = self.config.timeout;

        let mut stream =
            TcpStream::connect_timeout(&addr, timeout).map_err(|source| UploadError::Connection {
                addr: addr.to_string(),
                source,
            })?;
        if let Err(_err) = stream
            .set_read_timeout(Some(timeout))
            .and_then(|()| stream.set_write_timeout(Some(timeout)))
        {
            #[cfg(feature = "tracing")]
            asimov_module::tracing::warn!(
                target: "asimov_timelapse_module",
                error = %_err,
                "failed to set socket timeouts"
            );
        }

        self.state = UploadState::Sending;
        stream
            .write_all(&self.message.as_slice()[..len])
            .map_err(UploadError::Send)?;

        self.state = UploadState::Receiving;
        let started = Instant::now();
        let received = stream
            .read(self.message.as_mut_slice())
            .map_err(UploadError::Receive)?;
        if received == 0 {
            return Err(UploadError::EmptyResponse);
        }
        Ok((received, started.elapsed()))
    }

    /// Builds, sends, and interprets one upload.
    pub fn try_upload(
        &mut self,
        filename: &str,
        payload: &[u8],
    ) -> Result<UploadOutcome, UploadError> {
        self.state = UploadState::Idle;
        let layout = self.prepare(filename, payload)?;
        let response = self.send(layout.total_len())?;
        Ok(UploadOutcome {
            elapsed: response.elapsed,
            result: response.result().unwrap_or_default(),
            error: None,
        })
    }

    /// Like [`try_upload`](Self::try_upload), but a failure becomes a
    /// `CONNECTION ERROR` outcome.
    pub fn upload(&mut self, filename: &str, payload: &[u8]) -> UploadOutcome {
        match self.try_upload(filename, payload) {
            Ok(outcome) => outcome,
            Err(err) => {
                #[cfg(feature = "tracing")]
                asimov_module::tracing::warn!(
                    target: "asimov_timelapse_module",
                    %err,
                    host = %self.config.host,
                    "upload failed"
                );
                if matches!(self.state, UploadState::Idle) {
                    self.state = UploadState::Failed;
                }
                UploadOutcome::connection_error(err)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split_parts(body: &[u8]) -> Vec<&[u8]> {
        let delimiter = format!("--{BOUNDARY}");
        let delimiter = delimiter.as_bytes();
        let mut parts = Vec::new();
        let mut rest = body;
        while let Some(at) = find(rest, delimiter) {
            parts.push(&rest[..at]);
            rest = &rest[at + delimiter.len()..];
        }
        parts.push(rest);
        parts
            .into_iter()
            .filter(|p| !p.is_empty() && *p != b"--")
            .collect()
    }

    #[test]
    fn content_length_covers_parts_payload_and_tail() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(5000).collect();
        let mut buffer = vec![0u8; 8192];
        let layout =
            build_multipart_request("cam.example.org", "/up.php", "image_001.jpg", &payload, &mut buffer)
                .unwrap();

        let wire = &buffer[..layout.total_len()];
        let text = String::from_utf8_lossy(&wire[..layout.header_len]);
        assert!(text.starts_with("POST /up.php HTTP/1.0\r\n"));
        assert!(text.contains("\r\nHost: cam.example.org\r\n"));
        assert!(text.contains(&format!("\r\nContent-length: {}\r\n\r\n", layout.content_length)));
        assert!(text.ends_with("\r\n\r\n"));

        let part_header_len = layout.payload_offset - layout.header_len;
        let tail_len = format!("\r\n\r\n--{BOUNDARY}--").len();
        assert_eq!(layout.content_length, part_header_len + payload.len() + tail_len);
        assert_eq!(&wire[layout.payload_offset..][..payload.len()], &payload[..]);
        assert!(wire.ends_with(format!("--{BOUNDARY}--").as_bytes()));

        let parts = split_parts(&wire[layout.header_len..]);
        assert_eq!(parts.len(), 2);
        assert!(parts[0].ends_with(b"\r\n\r\nIMAGEUP\r\n"));
        assert!(find(parts[1], b"filename=\"image_001.jpg\"\r\nContent-Type: image/jpg\r\n\r\n").is_some());
    }

    #[test]
    fn exact_part_header_bytes() {
        let mut buffer = vec![0u8; 2048];
        let layout = build_multipart_request("h", "/p", "a.jpg", b"XY", &mut buffer).unwrap();
        let body = &buffer[layout.header_len..layout.total_len()];
        let expected = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"Action\"\r\n\r\nIMAGEUP\r\n\
             --{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file1\"; filename=\"a.jpg\"\r\n\
             Content-Type: image/jpg\r\n\r\nXY\r\n\r\n--{BOUNDARY}--"
        );
        assert_eq!(body, expected.as_bytes());
    }

    #[test]
    fn undersized_buffer_is_rejected() {
        let mut buffer = vec![0u8; 64];
        let err = build_multipart_request("h", "/p", "a.jpg", &[0; 32], &mut buffer).unwrap_err();
        assert!(matches!(err, UploadError::BufferTooSmall { capacity: 64, .. }));
    }

    #[test]
    fn long_upload_paths_still_fit() {
        let path = format!("/{}", "p".repeat(899));
        let mut client = UploadClient::new(UploadConfig::new("h").with_path(path.clone()));
        let layout = client.prepare("image_001.jpg", &[0xAB; 100]).unwrap();
        assert!(layout.header_len > MessageBuffer::OVERHEAD);
        assert!(client.message_capacity() >= layout.total_len());

        let wire = &client.message.as_slice()[..layout.total_len()];
        assert!(wire.starts_with(format!("POST {path} HTTP/1.0\r\n").as_bytes()));
        assert_eq!(&wire[layout.payload_offset..][..100], &[0xAB; 100]);
    }

    #[test]
    fn filenames_cannot_break_headers() {
        assert_eq!(sanitize_filename("a\"b\r\n.jpg"), "a_b__.jpg");
    }

    #[test]
    fn result_extraction() {
        let xml = b"<?xml version=\"1.0\"?><response><result>stored 17</result></response>";
        assert_eq!(extract_result(xml).as_deref(), Some("stored 17"));
        assert_eq!(
            extract_result(b"<?xml?><result code=\"1\">OK</result>").as_deref(),
            Some("OK")
        );
        assert_eq!(extract_result(b"<?xml?><result></result>"), None);
        assert_eq!(extract_result(b"<?xml?><status>OK</status>"), None);
        assert_eq!(extract_result(b"<result>unterminated").as_deref(), Some("unterminated"));
    }

    #[test]
    fn result_extraction_skips_longer_tag_names() {
        let xml = b"<?xml?><response><resultCode>7</resultCode><result>saved</result></response>";
        assert_eq!(extract_result(xml).as_deref(), Some("saved"));
        assert_eq!(
            extract_result(b"<?xml?><results><result\n>a b</result></results>").as_deref(),
            Some("a b")
        );
        assert_eq!(extract_result(b"<?xml?><resultCode>7</resultCode>"), None);
        assert_eq!(extract_result(b"<?xml?><result/>"), None);
    }

    #[test]
    fn response_locates_xml() {
        let bytes = b"HTTP/1.0 200 OK\r\n\r\n<?xml version=\"1.0\"?><result>ok</result>";
        let response = UploadResponse {
            bytes,
            elapsed: Duration::ZERO,
            xml_offset: find(bytes, b"<?xml"),
        };
        assert_eq!(response.xml_offset, Some(19));
        assert_eq!(response.result().as_deref(), Some("ok"));
    }

    #[test]
    fn failure_outcome_reads_connection_error() {
        let outcome = UploadOutcome::connection_error(UploadError::EmptyResponse);
        assert_eq!(outcome.result, CONNECTION_ERROR);
        assert!(!outcome.is_ok());
    }
}

// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::{check_request, AttestationToken, SourceError, TokenSource};
use serde::Serialize;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where the Confidential Space launcher serves its token endpoint
pub const DEFAULT_SOCKET_PATH: &str = "/run/container_launcher/teeserver.sock";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

const TOKEN_ENDPOINT: &str = "/v1/token";
const TOKEN_TYPE: &str = "PKI";
const MAX_RESPONSE_LEN: u64 = 256 * 1024;

#[derive(Serialize)]
struct TokenRequest<'a> {
    audience: &'a str,
    token_type: &'a str,
    nonces: [&'a str; 1],
}

/// Client of the launcher's `teeserver` Unix socket.  Each request is a
/// single blocking HTTP/1.1 exchange on a fresh connection.
#[derive(Debug, Clone)]
pub struct TeeServerSource {
    socket_path: PathBuf,
    timeout: Duration,
}

impl Default for TeeServerSource {
    fn default() -> Self {
        Self::new(DEFAULT_SOCKET_PATH, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }
}

impl TeeServerSource {
    pub fn new<P: AsRef<Path>>(socket_path: P, timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            timeout,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    fn post(&self, body: &[u8]) -> Result<Vec<u8>, SourceError> {
        let unavailable = |what: &str, e: std::io::Error| {
            SourceError::Unavailable(format!(
                "{what} {}: {e}",
                self.socket_path.display()
            ))
        };

        let mut stream =
            UnixStream::connect(&self.socket_path).map_err(|e| unavailable("connecting to", e))?;

        stream
            .set_read_timeout(Some(self.timeout))
            .map_err(|e| unavailable("configuring", e))?;
        stream
            .set_write_timeout(Some(self.timeout))
            .map_err(|e| unavailable("configuring", e))?;

        let head = format!(
            "POST {TOKEN_ENDPOINT} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );

        stream
            .write_all(head.as_bytes())
            .and_then(|_| stream.write_all(body))
            .map_err(|e| unavailable("writing to", e))?;

        let mut response = Vec::new();
        stream
            .take(MAX_RESPONSE_LEN + 1)
            .read_to_end(&mut response)
            .map_err(|e| unavailable("reading from", e))?;

        if response.len() as u64 > MAX_RESPONSE_LEN {
            return Err(SourceError::Unavailable(format!(
                "response exceeds {MAX_RESPONSE_LEN} bytes"
            )));
        }

        Ok(response)
    }
}

impl TokenSource for TeeServerSource {
    fn request(&self, audience: &str, nonce: &str) -> Result<AttestationToken, SourceError> {
        check_request(audience, nonce)?;

        let body = serde_json::to_vec(&TokenRequest {
            audience,
            token_type: TOKEN_TYPE,
            nonces: [nonce],
        })
        .map_err(|e| SourceError::InvalidRequest(e.to_string()))?;

        tracing::debug!(
            socket = %self.socket_path.display(),
            audience,
            "requesting attestation token"
        );

        let response = self.post(&body)?;
        let token = parse_response(&response)?;

        tracing::info!(len = token.len(), "attestation token acquired");

        Ok(token)
    }
}

/// Extract the token from a raw HTTP/1.1 response.  The launcher streams
/// large bodies with chunked transfer encoding.
fn parse_response(response: &[u8]) -> Result<AttestationToken, SourceError> {
    let malformed = |what: &str| SourceError::Unavailable(format!("malformed response: {what}"));

    let split = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| malformed("no header terminator"))?;

    let head = std::str::from_utf8(&response[..split]).map_err(|_| malformed("non UTF-8 header"))?;
    let body = &response[split + 4..];

    let mut lines = head.split("\r\n");

    let status = lines
        .next()
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|c| c.parse::<u16>().ok())
        .ok_or_else(|| malformed("bad status line"))?;

    if status != 200 {
        return Err(SourceError::Unavailable(format!(
            "token endpoint returned status {status}"
        )));
    }

    let mut chunked = false;
    let mut content_length = None;

    for (k, v) in lines.filter_map(|l| l.split_once(':')) {
        let (k, v) = (k.trim(), v.trim());

        if k.eq_ignore_ascii_case("transfer-encoding") {
            chunked = v.eq_ignore_ascii_case("chunked");
        } else if k.eq_ignore_ascii_case("content-length") {
            let n = v
                .parse::<usize>()
                .map_err(|_| malformed("bad content length"))?;
            content_length = Some(n);
        }
    }

    let body = if chunked {
        dechunk(body).ok_or_else(|| malformed("bad chunked body"))?
    } else {
        match content_length {
            Some(n) if n != body.len() => {
                return Err(SourceError::Unavailable(format!(
                    "truncated response: expected {n} bytes, got {}",
                    body.len()
                )))
            }
            _ => body.to_vec(),
        }
    };

    let token = String::from_utf8(body).map_err(|_| malformed("non UTF-8 token"))?;
    let token = token.trim();

    if token.is_empty() {
        return Err(malformed("empty token"));
    }

    Ok(AttestationToken::from(token.to_string()))
}

fn dechunk(mut body: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();

    loop {
        let eol = body.windows(2).position(|w| w == b"\r\n")?;
        let size_line = std::str::from_utf8(&body[..eol]).ok()?;
        // drop chunk extensions
        let size_hex = size_line.split(';').next()?.trim();
        let size = usize::from_str_radix(size_hex, 16).ok()?;

        body = &body[eol + 2..];

        if size == 0 {
            return Some(out);
        }

        if body.len() < size + 2 || &body[size..size + 2] != b"\r\n" {
            return None;
        }

        out.extend_from_slice(&body[..size]);
        body = &body[size + 2..];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufRead;
    use std::io::BufReader;
    use std::os::unix::net::UnixListener;
    use std::thread;

    const NONCE: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn plain_response() {
        let r = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 11\r\n\r\naaa.bbb.ccc";

        let t = parse_response(r).unwrap();

        assert_eq!(t.as_str(), "aaa.bbb.ccc");
    }

    #[test]
    fn chunked_response() {
        let r = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\naaa.\r\n7;ext=1\r\nbbb.ccc\r\n0\r\n\r\n";

        let t = parse_response(r).unwrap();

        assert_eq!(t.as_str(), "aaa.bbb.ccc");
    }

    #[test]
    fn truncated_chunk() {
        let r = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nff\r\naaa.";

        assert!(matches!(
            parse_response(r).unwrap_err(),
            SourceError::Unavailable(_)
        ));
    }

    #[test]
    fn short_body() {
        let r = b"HTTP/1.1 200 OK\r\nContent-Length: 30\r\n\r\naaa.bbb";

        assert_eq!(
            parse_response(r).unwrap_err(),
            SourceError::Unavailable("truncated response: expected 30 bytes, got 7".to_string())
        );
    }

    #[test]
    fn bad_content_length() {
        let r = b"HTTP/1.1 200 OK\r\nContent-Length: lots\r\n\r\naaa.bbb";

        assert!(matches!(
            parse_response(r).unwrap_err(),
            SourceError::Unavailable(_)
        ));
    }

    #[test]
    fn error_status() {
        let r = b"HTTP/1.1 400 Bad Request\r\nContent-Length: 3\r\n\r\nbad";

        assert_eq!(
            parse_response(r).unwrap_err(),
            SourceError::Unavailable("token endpoint returned status 400".to_string())
        );
    }

    #[test]
    fn empty_body() {
        let r = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";

        assert!(parse_response(r).is_err());
    }

    #[test]
    fn missing_socket() {
        let dir = tempfile::tempdir().unwrap();
        let s = TeeServerSource::new(dir.path().join("nope.sock"), Duration::from_secs(1));

        assert!(matches!(
            s.request("aud", NONCE).unwrap_err(),
            SourceError::Unavailable(_)
        ));
    }

    #[test]
    fn invalid_request_does_no_io() {
        // the socket does not exist, so any I/O would yield Unavailable
        let s = TeeServerSource::new("/nonexistent/teeserver.sock", Duration::from_secs(1));

        assert!(matches!(
            s.request("", NONCE).unwrap_err(),
            SourceError::InvalidRequest(_)
        ));
        assert!(matches!(
            s.request("aud", "short").unwrap_err(),
            SourceError::InvalidRequest(_)
        ));
    }

    // Accepts one connection, drains the request and answers with `reply`
    fn serve_once(listener: UnixListener, reply: Vec<u8>) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);

            let mut content_length = 0;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if line == "\r\n" {
                    break;
                }
                if let Some(v) = line.strip_prefix("Content-Length:") {
                    content_length = v.trim().parse().unwrap();
                }
            }

            let mut body = vec![0u8; content_length];
            reader.read_exact(&mut body).unwrap();

            // the client may hang up early on an oversized reply
            let _ = reader.into_inner().write_all(&reply);
        })
    }

    #[test]
    fn oversized_response() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("teeserver.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let body = "a".repeat(MAX_RESPONSE_LEN as usize);
        let mut reply =
            format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", body.len()).into_bytes();
        reply.extend_from_slice(body.as_bytes());

        let server = serve_once(listener, reply);

        let s = TeeServerSource::new(&path, Duration::from_secs(5));
        let err = s.request("aud", NONCE).unwrap_err();

        assert_eq!(
            err,
            SourceError::Unavailable(format!("response exceeds {MAX_RESPONSE_LEN} bytes"))
        );

        server.join().unwrap();
    }

    #[test]
    fn silent_server_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("teeserver.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();

        let server = thread::spawn(move || {
            let (_stream, _) = listener.accept().unwrap();
            // hold the connection open without replying until the client gives up
            let _ = done_rx.recv();
        });

        let s = TeeServerSource::new(&path, Duration::from_millis(200));
        let started = std::time::Instant::now();
        let err = s.request("aud", NONCE).unwrap_err();

        assert!(matches!(err, SourceError::Unavailable(_)));
        assert!(started.elapsed() < Duration::from_secs(5));

        done_tx.send(()).unwrap();
        server.join().unwrap();
    }

    #[test]
    fn request_over_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("teeserver.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);

            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();

            let mut content_length = 0;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if line == "\r\n" {
                    break;
                }
                if let Some(v) = line.strip_prefix("Content-Length:") {
                    content_length = v.trim().parse().unwrap();
                }
            }

            let mut body = vec![0u8; content_length];
            reader.read_exact(&mut body).unwrap();

            let mut stream = reader.into_inner();
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 11\r\n\r\naaa.bbb.ccc")
                .unwrap();

            (request_line, body)
        });

        let s = TeeServerSource::new(&path, Duration::from_secs(5));
        let t = s.request("https://verifier.example", NONCE).unwrap();

        assert_eq!(t.as_str(), "aaa.bbb.ccc");

        let (request_line, body) = server.join().unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(request_line, "POST /v1/token HTTP/1.1\r\n");
        assert_eq!(
            body,
            serde_json::json!({
                "audience": "https://verifier.example",
                "token_type": "PKI",
                "nonces": [NONCE],
            })
        );
    }
}

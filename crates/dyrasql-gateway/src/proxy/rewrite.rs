//! URI rewriting for statement responses
//!
//! Cluster responses embed absolute URIs (`nextUri`, `infoUri`, `partialCancelUri`)
//! built from the coordinator's internal address. Clients can't reach that
//! address, so the prefixes are swapped on the way out. Works on a byte stream:
//! a partial match at the end of a chunk is carried into the next one.

use bytes::{Bytes, BytesMut};

const NEXT_URI_KEY: &[u8] = b"\"nextUri\"";

/// Literal prefix replacements applied to one cluster's responses
#[derive(Debug, Clone)]
pub struct UriRewriter {
    rules: Vec<(Vec<u8>, Vec<u8>)>,
    /// Longest byte sequence that has to be seen whole before emitting
    window: usize,
    carry: BytesMut,
    saw_next_uri: bool,
}

impl UriRewriter {
    /// `statement_base` replaces the cluster URL in statement URIs; UI URIs always go to `external_url`
    pub fn new(internal_url: &str, statement_base: &str, external_url: &str) -> Self {
        let mut rules = Vec::new();
        if internal_url != statement_base {
            rules.push((
                format!("{}/v1/statement/", internal_url).into_bytes(),
                format!("{}/v1/statement/", statement_base).into_bytes(),
            ));
        }
        if internal_url != external_url {
            rules.push((
                format!("{}/ui/", internal_url).into_bytes(),
                format!("{}/ui/", external_url).into_bytes(),
            ));
        }
        let window = rules
            .iter()
            .map(|(from, _)| from.len())
            .chain(std::iter::once(NEXT_URI_KEY.len()))
            .max()
            .unwrap_or(NEXT_URI_KEY.len());
        Self {
            rules,
            window,
            carry: BytesMut::new(),
            saw_next_uri: false,
        }
    }

    /// Whether any input so far carried a `nextUri` field
    pub fn saw_next_uri(&self) -> bool {
        self.saw_next_uri
    }

    /// Rewrite a complete body in one go
    pub fn rewrite_all(mut self, body: &[u8]) -> Bytes {
        let mut out = self.push(body);
        out.extend_from_slice(&self.finish());
        out.freeze()
    }

    /// Feed one chunk; returns the bytes that are safe to emit
    pub fn push(&mut self, chunk: &[u8]) -> BytesMut {
        self.carry.extend_from_slice(chunk);
        let buf = std::mem::take(&mut self.carry);
        let (out, consumed) = self.scan(&buf, true);
        self.carry = BytesMut::from(&buf[consumed..]);
        out
    }

    /// Flush whatever is still held back
    pub fn finish(&mut self) -> BytesMut {
        let buf = std::mem::take(&mut self.carry);
        let (out, _) = self.scan(&buf, false);
        out
    }

    fn scan(&mut self, buf: &[u8], hold_tail: bool) -> (BytesMut, usize) {
        let mut out = BytesMut::with_capacity(buf.len());
        let mut i = 0;
        'outer: while i < buf.len() {
            let rest = &buf[i..];
            for (from, to) in &self.rules {
                if rest.starts_with(from) {
                    out.extend_from_slice(to);
                    i += from.len();
                    continue 'outer;
                }
            }
            if rest.starts_with(NEXT_URI_KEY) {
                self.saw_next_uri = true;
            }
            if hold_tail && rest.len() < self.window {
                break;
            }
            out.extend_from_slice(&rest[..1]);
            i += 1;
        }
        (out, i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{"id":"q1","infoUri":"http://trino-ecs:8080/ui/query.html?q1","nextUri":"http://trino-ecs:8080/v1/statement/queued/q1/y/1"}"#;

    #[test]
    fn test_proxy_mode_rewrites_to_public_url() {
        let rw = UriRewriter::new("http://trino-ecs:8080", "http://dyrasql:8080", "http://localhost:8081");
        let out = rw.rewrite_all(BODY.as_bytes());
        let text = std::str::from_utf8(&out).unwrap();
        assert!(text.contains(r#""nextUri":"http://dyrasql:8080/v1/statement/queued/q1/y/1""#));
        assert!(text.contains(r#""infoUri":"http://localhost:8081/ui/query.html?q1""#));
        assert!(!text.contains("trino-ecs"));
    }

    #[test]
    fn test_bypass_mode_rewrites_to_external_url() {
        let rw = UriRewriter::new("http://trino-ecs:8080", "http://localhost:8081", "http://localhost:8081");
        let out = rw.rewrite_all(BODY.as_bytes());
        let text = std::str::from_utf8(&out).unwrap();
        assert!(text.contains("http://localhost:8081/v1/statement/queued/q1/y/1"));
        assert!(text.contains("http://localhost:8081/ui/query.html?q1"));
    }

    #[test]
    fn test_chunked_input_matches_whole_input() {
        let whole = UriRewriter::new("http://trino-ecs:8080", "http://dyrasql:8080", "http://localhost:8081")
            .rewrite_all(BODY.as_bytes());
        for chunk_size in [1, 3, 7, 16, 40] {
            let mut rw = UriRewriter::new("http://trino-ecs:8080", "http://dyrasql:8080", "http://localhost:8081");
            let mut out = BytesMut::new();
            for chunk in BODY.as_bytes().chunks(chunk_size) {
                out.extend_from_slice(&rw.push(chunk));
            }
            out.extend_from_slice(&rw.finish());
            assert_eq!(out.freeze(), whole, "chunk size {}", chunk_size);
            assert!(rw.saw_next_uri());
        }
    }

    #[test]
    fn test_terminal_body_has_no_next_uri() {
        let mut rw = UriRewriter::new("http://trino-ecs:8080", "http://dyrasql:8080", "http://localhost:8081");
        let body = br#"{"id":"q1","data":[[1]],"stats":{"state":"FINISHED"}}"#;
        let mut out = rw.push(body);
        out.extend_from_slice(&rw.finish());
        assert_eq!(&out[..], &body[..]);
        assert!(!rw.saw_next_uri());
    }
}

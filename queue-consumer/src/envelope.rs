use crate::error::EnvelopeError;

/// Header carrying the correlation id that ties a record back to the
/// request that produced it.
pub const CORRELATION_ID_HEADER: &str = "X-Request-Id";

/// A decoded record payload: a block of `Name: value` headers, a blank
/// line, then an opaque body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    headers: Vec<(String, String)>,
    body: String,
}

impl Envelope {
    pub fn parse(payload: &[u8]) -> Result<Self, EnvelopeError> {
        let text = std::str::from_utf8(payload).map_err(|_| EnvelopeError::NotUtf8)?;
        let (head, body) =
            split_at_blank_line(text).ok_or(EnvelopeError::MissingHeaderTerminator)?;

        let mut headers = Vec::new();
        for line in head.lines() {
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| EnvelopeError::MalformedHeader(line.to_owned()))?;
            headers.push((name.trim().to_owned(), value.trim().to_owned()));
        }

        Ok(Self {
            headers,
            body: body.to_owned(),
        })
    }

    /// Case-insensitive header lookup; first match wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.header(CORRELATION_ID_HEADER)
    }

    pub fn body(&self) -> &str {
        &self.body
    }
}

fn split_at_blank_line(text: &str) -> Option<(&str, &str)> {
    if let Some(at) = text.find("\r\n\r\n") {
        return Some((&text[..at], &text[at + 4..]));
    }
    text.find("\n\n").map(|at| (&text[..at], &text[at + 2..]))
}

//! STOMP 1.2 frame codec.
//!
//! One frame travels per WebSocket message:
//!
//! ```text
//! COMMAND\n
//! name:value\n
//! \n
//! body\0
//! ```
//!
//! Header values are escaped (`\\`, `\n`, `\r`, `\c`) on every frame except
//! CONNECT and CONNECTED. A message made only of end-of-line bytes is a
//! heart-beat and decodes to `None`.

use std::fmt;

use parley_shared::constants::STOMP_VERSION;

use crate::error::FrameError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    fn parse(s: &str) -> Result<Self, FrameError> {
        match s {
            "CONNECT" => Ok(Self::Connect),
            "STOMP" => Ok(Self::Stomp),
            "CONNECTED" => Ok(Self::Connected),
            "SEND" => Ok(Self::Send),
            "SUBSCRIBE" => Ok(Self::Subscribe),
            "UNSUBSCRIBE" => Ok(Self::Unsubscribe),
            "DISCONNECT" => Ok(Self::Disconnect),
            "MESSAGE" => Ok(Self::Message),
            "RECEIPT" => Ok(Self::Receipt),
            "ERROR" => Ok(Self::Error),
            other => Err(FrameError::UnknownCommand(other.to_string())),
        }
    }

    /// CONNECT and CONNECTED keep header values verbatim.
    fn escapes_headers(&self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of a header. Repeated headers keep the first occurrence.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    // -----------------------------------------------------------------------
    // Client frames
    // -----------------------------------------------------------------------

    pub fn connect(host: &str, token: &str) -> Self {
        Self::new(Command::Connect)
            .header("accept-version", STOMP_VERSION)
            .header("host", host)
            .header("heart-beat", "0,0")
            .header("Authorization", format!("Bearer {token}"))
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    pub fn unsubscribe(id: &str) -> Self {
        Self::new(Command::Unsubscribe).header("id", id)
    }

    pub fn send(destination: &str, json: Vec<u8>) -> Self {
        Self::new(Command::Send)
            .header("destination", destination)
            .header("content-type", "application/json")
            .with_body(json)
    }

    pub fn disconnect(receipt: &str) -> Self {
        Self::new(Command::Disconnect).header("receipt", receipt)
    }

    // -----------------------------------------------------------------------
    // Server frames
    // -----------------------------------------------------------------------

    pub fn connected() -> Self {
        Self::new(Command::Connected).header("version", STOMP_VERSION)
    }

    pub fn message(subscription: &str, destination: &str, message_id: &str, json: Vec<u8>) -> Self {
        Self::new(Command::Message)
            .header("subscription", subscription)
            .header("destination", destination)
            .header("message-id", message_id)
            .header("content-type", "application/json")
            .with_body(json)
    }

    pub fn error(message: &str) -> Self {
        Self::new(Command::Error).header("message", message)
    }

    // -----------------------------------------------------------------------
    // Codec
    // -----------------------------------------------------------------------

    pub fn encode(&self) -> Vec<u8> {
        let escape = self.command.escapes_headers();
        let mut out = Vec::with_capacity(64 + self.body.len());
        out.extend_from_slice(self.command.as_str().as_bytes());
        out.push(b'\n');

        for (name, value) in &self.headers {
            if name == "content-length" {
                continue;
            }
            push_header_part(&mut out, name, escape);
            out.push(b':');
            push_header_part(&mut out, value, escape);
            out.push(b'\n');
        }
        if !self.body.is_empty() {
            out.extend_from_slice(format!("content-length:{}\n", self.body.len()).as_bytes());
        }

        out.push(b'\n');
        out.extend_from_slice(&self.body);
        out.push(0);
        out
    }

    /// Decode one frame. Returns `Ok(None)` for a heart-beat.
    pub fn decode(data: &[u8]) -> Result<Option<Self>, FrameError> {
        let start = data
            .iter()
            .position(|b| *b != b'\n' && *b != b'\r')
            .unwrap_or(data.len());
        let data = &data[start..];
        if data.is_empty() || data == [0] {
            return Ok(None);
        }

        let head_end = find_head_end(data).ok_or(FrameError::MissingTerminator)?;
        let head = std::str::from_utf8(&data[..head_end.0]).map_err(|_| FrameError::InvalidUtf8)?;
        let rest = &data[head_end.1..];

        let mut lines = head.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));
        let command = Command::parse(lines.next().unwrap_or_default())?;
        let unescape = command.escapes_headers();

        let mut headers = Vec::new();
        for line in lines {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
            let (name, value) = if unescape {
                (unescape_header(name)?, unescape_header(value)?)
            } else {
                (name.to_string(), value.to_string())
            };
            headers.push((name, value));
        }

        let content_length = headers
            .iter()
            .find(|(k, _)| k == "content-length")
            .map(|(_, v)| {
                v.trim()
                    .parse::<usize>()
                    .map_err(|_| FrameError::InvalidContentLength(v.clone()))
            })
            .transpose()?;

        let body = match content_length {
            Some(len) => {
                if rest.len() < len || rest.get(len).is_some_and(|b| *b != 0) {
                    return Err(FrameError::InvalidContentLength(len.to_string()));
                }
                rest[..len].to_vec()
            }
            None => {
                let nul = rest
                    .iter()
                    .position(|b| *b == 0)
                    .ok_or(FrameError::MissingTerminator)?;
                rest[..nul].to_vec()
            }
        };

        Ok(Some(Self {
            command,
            headers,
            body,
        }))
    }
}

/// Locate the blank line separating headers from body. Returns the end of
/// the head and the start of the body.
fn find_head_end(data: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i < data.len() {
        if data[i] == b'\n' {
            if data.get(i + 1) == Some(&b'\n') {
                return Some((i, i + 2));
            }
            if data.get(i + 1) == Some(&b'\r') && data.get(i + 2) == Some(&b'\n') {
                return Some((i, i + 3));
            }
        }
        i += 1;
    }
    None
}

fn push_header_part(out: &mut Vec<u8>, s: &str, escape: bool) {
    if !escape {
        out.extend_from_slice(s.as_bytes());
        return;
    }
    for c in s.chars() {
        match c {
            '\\' => out.extend_from_slice(b"\\\\"),
            '\n' => out.extend_from_slice(b"\\n"),
            '\r' => out.extend_from_slice(b"\\r"),
            ':' => out.extend_from_slice(b"\\c"),
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
}

fn unescape_header(s: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(FrameError::InvalidEscape(s.to_string())),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_send_frame() {
        let frame = Frame::send("/app/chat.send.1", br#"{"content":"hi"}"#.to_vec());
        let text = String::from_utf8(frame.encode()).unwrap();
        assert!(text.starts_with("SEND\ndestination:/app/chat.send.1\n"));
        assert!(text.contains("content-length:16\n"));
        assert!(text.ends_with("\n\n{\"content\":\"hi\"}\0"));
    }

    #[test]
    fn test_decode_message_frame() {
        let raw = b"MESSAGE\nsubscription:sub-0\ndestination:/topic/room.1\n\n{\"id\":5}\0";
        let frame = Frame::decode(raw).unwrap().unwrap();
        assert_eq!(frame.command, Command::Message);
        assert_eq!(frame.get("subscription"), Some("sub-0"));
        assert_eq!(frame.body, br#"{"id":5}"#);
    }

    #[test]
    fn test_decode_crlf_and_content_length() {
        let raw = b"MESSAGE\r\ncontent-length:3\r\n\r\na\0b\0";
        let frame = Frame::decode(raw).unwrap().unwrap();
        assert_eq!(frame.body, b"a\0b");
    }

    #[test]
    fn test_heartbeat_decodes_to_none() {
        assert_eq!(Frame::decode(b"\n").unwrap(), None);
        assert_eq!(Frame::decode(b"\r\n\r\n").unwrap(), None);
    }

    #[test]
    fn test_header_escaping() {
        let frame = Frame::new(Command::Send).header("destination", "a:b\nc");
        let encoded = frame.encode();
        assert!(String::from_utf8_lossy(&encoded).contains("destination:a\\cb\\nc"));

        let decoded = Frame::decode(&encoded).unwrap().unwrap();
        assert_eq!(decoded.get("destination"), Some("a:b\nc"));
    }

    #[test]
    fn test_connect_headers_are_verbatim() {
        let frame = Frame::connect("chat.example", "tok:en");
        let decoded = Frame::decode(&frame.encode()).unwrap().unwrap();
        assert_eq!(decoded.get("Authorization"), Some("Bearer tok:en"));
        assert_eq!(decoded.get("accept-version"), Some("1.2"));
    }

    #[test]
    fn test_repeated_header_first_wins() {
        let raw = b"MESSAGE\nfoo:first\nfoo:second\n\n\0";
        let frame = Frame::decode(raw).unwrap().unwrap();
        assert_eq!(frame.get("foo"), Some("first"));
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(
            Frame::decode(b"PUBLISH\n\n\0"),
            Err(FrameError::UnknownCommand("PUBLISH".into()))
        );
        assert!(matches!(
            Frame::decode(b"SEND\nno-colon\n\n\0"),
            Err(FrameError::MalformedHeader(_))
        ));
        assert_eq!(
            Frame::decode(b"SEND\ndestination:x\n\nbody"),
            Err(FrameError::MissingTerminator)
        );
        assert!(matches!(
            Frame::decode(b"SEND\nbad:\\t\n\n\0"),
            Err(FrameError::InvalidEscape(_))
        ));
    }
}

//! SLCP text framing: one UTF-8 line per message, at most 512 bytes.
//! Params with whitespace, quotes or backslashes are double-quoted with `\"` and `\\` escapes.

use crate::protocol::{Command, Message, LINE_ENDING, MAX_MESSAGE_LEN};

/// Encode a message into a single SLCP line (terminator included).
pub fn encode(msg: &Message) -> Result<String, ProtocolError> {
    let mut out = String::from(msg.command.as_str());
    for p in &msg.params {
        out.push(' ');
        push_param(&mut out, p);
    }
    out.push_str(LINE_ENDING);
    if out.len() > MAX_MESSAGE_LEN {
        return Err(ProtocolError::TooLong { len: out.len() });
    }
    Ok(out)
}

/// Encode from an untyped command name, as a front end typing raw commands would.
pub fn encode_raw<S: AsRef<str>>(command: &str, params: &[S]) -> Result<String, ProtocolError> {
    let command: Command = command.parse()?;
    encode(&Message::new(
        command,
        params.iter().map(|p| p.as_ref().to_string()),
    ))
}

fn needs_quoting(p: &str) -> bool {
    p.is_empty() || p.chars().any(|c| c.is_whitespace() || c == '"' || c == '\\')
}

fn push_param(out: &mut String, p: &str) {
    if !needs_quoting(p) {
        out.push_str(p);
        return;
    }
    out.push('"');
    for c in p.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

/// Decode one SLCP line. The trailing terminator is optional.
pub fn decode(text: &str) -> Result<Message, ProtocolError> {
    if text.len() > MAX_MESSAGE_LEN {
        return Err(ProtocolError::TooLong { len: text.len() });
    }
    let line = text.trim();
    if line.is_empty() {
        return Err(ProtocolError::Empty);
    }
    let mut tokens = tokenize(line)?.into_iter();
    let command: Command = match tokens.next() {
        Some(first) => first.parse()?,
        None => return Err(ProtocolError::Empty),
    };
    Ok(Message {
        command,
        params: tokens.collect(),
    })
}

/// Decode a raw datagram or header line, rejecting invalid UTF-8.
pub fn decode_bytes(bytes: &[u8]) -> Result<Message, ProtocolError> {
    let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)?;
    decode(text)
}

fn tokenize(line: &str) -> Result<Vec<String>, ProtocolError> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();
    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let Some(&first) = chars.peek() else {
            break;
        };
        let mut token = String::new();
        if first == '"' {
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '"' => {
                        closed = true;
                        break;
                    }
                    '\\' => match chars.next() {
                        Some(escaped) => token.push(escaped),
                        None => break,
                    },
                    _ => token.push(c),
                }
            }
            if !closed {
                return Err(ProtocolError::UnterminatedQuote);
            }
        } else {
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                token.push(c);
            }
        }
        tokens.push(token);
    }
    Ok(tokens)
}

/// Malformed, oversized or unknown SLCP message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty message")]
    Empty,
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("{0} not expected here")]
    UnexpectedCommand(Command),
    #[error("message too long: {len} bytes (max 512)")]
    TooLong { len: usize },
    #[error("unterminated quoted parameter")]
    UnterminatedQuote,
    #[error("message is not valid UTF-8")]
    InvalidUtf8,
    #[error("{command} is missing parameter {index}")]
    MissingParam { command: Command, index: usize },
    #[error("invalid port: {0}")]
    InvalidPort(String),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("invalid image size: {0}")]
    InvalidImageSize(String),
}

//! SLCP message types: the six commands, messages and IMG header payloads.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::wire::ProtocolError;

/// Maximum encoded message length in bytes (UTF-8), line terminator included.
pub const MAX_MESSAGE_LEN: usize = 512;

/// Every SLCP message ends with a single newline.
pub const LINE_ENDING: &str = "\n";

/// Prefix put in front of the configured autoreply text.
pub const AUTOREPLY_PREFIX: &str = "[autoreply] ";

/// All SLCP commands. The wire form is the upper-case name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Join,
    Leave,
    Msg,
    Img,
    Whois,
    Iam,
}

impl Command {
    pub const ALL: [Command; 6] = [
        Command::Join,
        Command::Leave,
        Command::Msg,
        Command::Img,
        Command::Whois,
        Command::Iam,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Command::Join => "JOIN",
            Command::Leave => "LEAVE",
            Command::Msg => "MSG",
            Command::Img => "IMG",
            Command::Whois => "WHOIS",
            Command::Iam => "IAM",
        }
    }

    /// JOIN and LEAVE are announced to the whole network.
    pub fn is_broadcast(self) -> bool {
        matches!(self, Command::Join | Command::Leave)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownCommand(s.to_string()))
    }
}

/// One decoded SLCP line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub command: Command,
    pub params: Vec<String>,
}

impl Message {
    pub fn new<I, S>(command: Command, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command,
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    pub fn join(handle: &str, port: u16) -> Self {
        Self::new(Command::Join, [handle.to_string(), port.to_string()])
    }

    pub fn leave(handle: &str) -> Self {
        Self::new(Command::Leave, [handle])
    }

    pub fn msg(sender: &str, text: &str) -> Self {
        Self::new(Command::Msg, [sender, text])
    }

    /// IMG header. The raw bytes follow on the TCP stream.
    pub fn img(sender: &str, size: usize, comment: &str) -> Self {
        let header = ImageHeader {
            size,
            comment: comment.to_string(),
        };
        Self::new(Command::Img, [sender.to_string(), header.to_string()])
    }

    /// WHOIS query. `requester_handle` is optional on the wire; older nodes send only two params.
    pub fn whois(handle: &str, requester_port: u16, requester_handle: Option<&str>) -> Self {
        let mut params = vec![handle.to_string(), requester_port.to_string()];
        if let Some(h) = requester_handle {
            params.push(h.to_string());
        }
        Self::new(Command::Whois, params)
    }

    pub fn iam(handle: &str, ip: IpAddr, port: u16) -> Self {
        Self::new(
            Command::Iam,
            [handle.to_string(), ip.to_string(), port.to_string()],
        )
    }

    /// Parameter at `index`, or `MissingParam`.
    pub fn param(&self, index: usize) -> Result<&str, ProtocolError> {
        self.params
            .get(index)
            .map(String::as_str)
            .ok_or(ProtocolError::MissingParam {
                command: self.command,
                index,
            })
    }

    pub fn opt_param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    /// Parameter at `index` parsed as a port number.
    pub fn port_param(&self, index: usize) -> Result<u16, ProtocolError> {
        let raw = self.param(index)?;
        raw.parse::<u16>()
            .map_err(|_| ProtocolError::InvalidPort(raw.to_string()))
    }

    /// Parameter at `index` parsed as an IP address.
    pub fn ip_param(&self, index: usize) -> Result<IpAddr, ProtocolError> {
        let raw = self.param(index)?;
        raw.parse::<IpAddr>()
            .map_err(|_| ProtocolError::InvalidAddress(raw.to_string()))
    }
}

/// Payload of an IMG header: `<size>|<comment>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHeader {
    pub size: usize,
    pub comment: String,
}

impl ImageHeader {
    /// Parse `<size>|<comment>`. A missing `|` means an empty comment.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let (size, comment) = match raw.split_once('|') {
            Some((s, c)) => (s, c.trim()),
            None => (raw, ""),
        };
        let size = size
            .trim()
            .parse::<usize>()
            .map_err(|_| ProtocolError::InvalidImageSize(size.to_string()))?;
        Ok(Self {
            size,
            comment: comment.to_string(),
        })
    }
}

impl fmt::Display for ImageHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.size, self.comment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_names() {
        for c in Command::ALL {
            assert_eq!(c.as_str().parse::<Command>().unwrap(), c);
        }
        assert!(matches!(
            "join".parse::<Command>(),
            Err(ProtocolError::UnknownCommand(_))
        ));
    }

    #[test]
    fn image_header_with_and_without_comment() {
        let h = ImageHeader::parse("42|hello").unwrap();
        assert_eq!(h.size, 42);
        assert_eq!(h.comment, "hello");

        let h = ImageHeader::parse("7").unwrap();
        assert_eq!(h.size, 7);
        assert_eq!(h.comment, "");

        // Only the first '|' splits.
        let h = ImageHeader::parse("3|a|b").unwrap();
        assert_eq!(h.comment, "a|b");

        assert!(matches!(
            ImageHeader::parse("big|x"),
            Err(ProtocolError::InvalidImageSize(_))
        ));
    }

    #[test]
    fn param_accessors() {
        let m = Message::whois("bob", 5001, None);
        assert_eq!(m.param(0).unwrap(), "bob");
        assert_eq!(m.port_param(1).unwrap(), 5001);
        assert!(m.opt_param(2).is_none());
        assert!(matches!(
            m.param(2),
            Err(ProtocolError::MissingParam { index: 2, .. })
        ));

        let bad = Message::new(Command::Join, ["a", "port"]);
        assert!(matches!(bad.port_param(1), Err(ProtocolError::InvalidPort(_))));
    }
}

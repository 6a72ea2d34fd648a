//! Wire framing for the handshake, control, and delivery sockets: everything
//! travels as network-byte-order integers plus length-prefixed byte strings.

use std::io::{self, Read, Write};

use crate::error::{GalaxyError, Result};
use crate::mask::EventMask;

/// Longest accepted length-prefixed string. A malformed or hostile peer that
/// sends a huge length prefix is rejected rather than causing an unbounded
/// allocation.
pub const MAX_STRING_LEN: u32 = 64 * 1024;

pub fn write_u32<W: Write>(w: &mut W, value: u32) -> Result<()> {
    w.write_all(&value.to_be_bytes()).map_err(GalaxyError::from)
}

pub fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

pub fn write_i64<W: Write>(w: &mut W, value: i64) -> Result<()> {
    w.write_all(&value.to_be_bytes()).map_err(GalaxyError::from)
}

pub fn read_i64<R: Read>(r: &mut R) -> Result<i64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(i64::from_be_bytes(buf))
}

/// Writes a length-prefixed UTF-8 string: a 4-byte big-endian length
/// followed by the raw bytes.
pub fn write_string<W: Write>(w: &mut W, s: &str) -> Result<()> {
    let bytes = s.as_bytes();
    write_u32(w, bytes.len() as u32)?;
    w.write_all(bytes).map_err(GalaxyError::from)
}

pub fn read_string<R: Read>(r: &mut R) -> Result<String> {
    let len = read_u32(r)?;
    if len > MAX_STRING_LEN {
        return Err(GalaxyError::ClientProtocolError(format!(
            "string length {len} exceeds maximum {MAX_STRING_LEN}"
        )));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf)
        .map_err(|_| GalaxyError::ClientProtocolError("string payload was not valid UTF-8".into()))
}

/// Control-socket commands a client may send. Numeric values match the
/// wire-level command codes clients and the daemon agree on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Watch = 1,
    IgnoreMask = 2,
    IgnoreWatch = 3,
    Exit = 4,
}

impl Command {
    pub fn from_u32(value: u32) -> Result<Self> {
        match value {
            1 => Ok(Self::Watch),
            2 => Ok(Self::IgnoreMask),
            3 => Ok(Self::IgnoreWatch),
            4 => Ok(Self::Exit),
            other => Err(GalaxyError::ClientProtocolError(format!(
                "unknown command code {other}"
            ))),
        }
    }
}

/// Handshake acknowledgement sent by the daemon after it attempts to bind
/// the per-client delivery listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Success = 1,
    Fail = 2,
}

impl Ack {
    pub fn write<W: Write>(self, w: &mut W) -> Result<()> {
        write_u32(w, self as u32)
    }

    pub fn read<R: Read>(r: &mut R) -> Result<Self> {
        match read_u32(r)? {
            1 => Ok(Self::Success),
            2 => Ok(Self::Fail),
            other => Err(GalaxyError::ClientProtocolError(format!(
                "unknown ack code {other}"
            ))),
        }
    }
}

/// A command-socket request body following the command code: a mask and,
/// for `WATCH`/`IGNORE_WATCH` only, a trailing regex pattern string.
/// `IGNORE_MASK` and `EXIT` carry no string field at all.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub command: Command,
    pub mask: EventMask,
    pub pattern: Option<String>,
}

impl CommandRequest {
    fn carries_pattern(command: Command) -> bool {
        matches!(command, Command::Watch | Command::IgnoreWatch)
    }

    pub fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        write_u32(w, self.command as u32)?;
        if self.command == Command::Exit {
            return Ok(());
        }
        write_u32(w, self.mask.into())?;
        if Self::carries_pattern(self.command) {
            write_string(w, self.pattern.as_deref().unwrap_or(""))?;
        }
        Ok(())
    }

    pub fn read<R: Read>(r: &mut R) -> Result<Self> {
        let command = Command::from_u32(read_u32(r)?)?;
        if command == Command::Exit {
            return Ok(Self {
                command,
                mask: EventMask::NONE,
                pattern: None,
            });
        }
        let mask = EventMask::from(read_u32(r)?);
        let pattern = if Self::carries_pattern(command) {
            let pattern = read_string(r)?;
            if pattern.is_empty() {
                None
            } else {
                Some(pattern)
            }
        } else {
            None
        };
        Ok(Self {
            command,
            mask,
            pattern,
        })
    }
}

/// A single event as delivered to a client over its delivery socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredEvent {
    pub mask: EventMask,
    pub timestamp: i64,
    pub path: String,
}

impl DeliveredEvent {
    pub fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        write_u32(w, self.mask.into())?;
        write_i64(w, self.timestamp)?;
        write_string(w, &self.path)
    }

    pub fn read<R: Read>(r: &mut R) -> Result<Self> {
        let mask = EventMask::from(read_u32(r)?);
        let timestamp = read_i64(r)?;
        let path = read_string(r)?;
        Ok(Self {
            mask,
            timestamp,
            path,
        })
    }
}

/// The client-side half of the handshake: delivery socket path, pid, and a
/// per-process monotonically increasing client id.
#[derive(Debug, Clone)]
pub struct HandshakeRequest {
    pub delivery_path: String,
    pub pid: u32,
    pub client_id: u32,
}

impl HandshakeRequest {
    pub fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        write_string(w, &self.delivery_path)?;
        write_u32(w, self.pid)?;
        write_u32(w, self.client_id)
    }

    pub fn read<R: Read>(r: &mut R) -> io::Result<Self> {
        let delivery_path = read_string(r).map_err(io::Error::other)?;
        let mut buf = [0u8; 4];
        r.read_exact(&mut buf)?;
        let pid = u32::from_be_bytes(buf);
        r.read_exact(&mut buf)?;
        let client_id = u32::from_be_bytes(buf);
        Ok(Self {
            delivery_path,
            pid,
            client_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn string_round_trips() {
        let mut buf = Vec::new();
        write_string(&mut buf, "/var/log/app").unwrap();
        let mut cursor = Cursor::new(buf);
        assert_eq!(read_string(&mut cursor).unwrap(), "/var/log/app");
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let mut buf = Vec::new();
        write_u32(&mut buf, MAX_STRING_LEN + 1).unwrap();
        let mut cursor = Cursor::new(buf);
        let err = read_string(&mut cursor).unwrap_err();
        assert!(matches!(err, GalaxyError::ClientProtocolError(_)));
    }

    #[test]
    fn command_request_round_trips_with_pattern() {
        let req = CommandRequest {
            command: Command::Watch,
            mask: EventMask::CREATE | EventMask::DELETE,
            pattern: Some(r"\.rs$".to_string()),
        };
        let mut buf = Vec::new();
        req.write(&mut buf).unwrap();
        let mut cursor = Cursor::new(buf);
        let parsed = CommandRequest::read(&mut cursor).unwrap();
        assert_eq!(parsed.command, Command::Watch);
        assert_eq!(parsed.mask, req.mask);
        assert_eq!(parsed.pattern.as_deref(), Some(r"\.rs$"));
    }

    #[test]
    fn ignore_mask_has_no_trailing_string() {
        let req = CommandRequest {
            command: Command::IgnoreMask,
            mask: EventMask::ACCESS,
            pattern: None,
        };
        let mut buf = Vec::new();
        req.write(&mut buf).unwrap();
        // command (4 bytes) + mask (4 bytes), no length-prefixed string.
        assert_eq!(buf.len(), 8);

        let mut cursor = Cursor::new(buf);
        let parsed = CommandRequest::read(&mut cursor).unwrap();
        assert_eq!(parsed.command, Command::IgnoreMask);
        assert_eq!(parsed.mask, EventMask::ACCESS);
        assert_eq!(parsed.pattern, None);
    }

    #[test]
    fn exit_command_has_no_trailing_payload() {
        let req = CommandRequest {
            command: Command::Exit,
            mask: EventMask::NONE,
            pattern: None,
        };
        let mut buf = Vec::new();
        req.write(&mut buf).unwrap();
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn delivered_event_round_trips() {
        let event = DeliveredEvent {
            mask: EventMask::CREATE,
            timestamp: 1_690_000_000,
            path: "/tmp/t/new_file".to_string(),
        };
        let mut buf = Vec::new();
        event.write(&mut buf).unwrap();
        let mut cursor = Cursor::new(buf);
        assert_eq!(DeliveredEvent::read(&mut cursor).unwrap(), event);
    }

    #[test]
    fn ack_round_trips() {
        let mut buf = Vec::new();
        Ack::Fail.write(&mut buf).unwrap();
        let mut cursor = Cursor::new(buf);
        assert_eq!(Ack::read(&mut cursor).unwrap(), Ack::Fail);
    }
}

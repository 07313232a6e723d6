// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session message framing
//!
//! Every session message is one line of comma separated fields. The first
//! field is the message type; the remaining fields depend on it. Type `1`
//! places an object; any other type is carried through untouched so newer
//! peers can extend the protocol without breaking older relays.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Line terminator on the session stream
pub const DELIMITER: u8 = b'\n';

/// Separator between fields of a line
pub const FIELD_SEPARATOR: char = ',';

/// Object placement event
pub const KIND_PLACE_OBJECT: &str = "1";

/// Reserved for settings / color sync, not interpreted yet
pub const KIND_SETTINGS_SYNC: &str = "2";

/// An object placed at a position in the shared scene
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObjectPlacement {
    /// Application defined object kind
    pub object_id: i32,
    /// Horizontal position
    pub x: f32,
    /// Vertical position
    pub y: f32,
}

/// A decoded session message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Type `1`
    PlaceObject(ObjectPlacement),
    /// Any type this build does not interpret
    Other {
        /// Leading type field
        kind: String,
        /// Remaining fields in order
        fields: Vec<String>,
    },
}

impl Message {
    /// Build an object placement message
    pub fn place(object_id: i32, x: f32, y: f32) -> Self {
        Message::PlaceObject(ObjectPlacement { object_id, x, y })
    }

    /// The type code this message is sent under
    pub fn kind(&self) -> &str {
        match self {
            Message::PlaceObject(_) => KIND_PLACE_OBJECT,
            Message::Other { kind, .. } => kind,
        }
    }

    /// Parse one line, without its delimiter
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim_end_matches('\r');
        let mut fields = line.split(FIELD_SEPARATOR).map(str::trim);

        let kind = match fields.next() {
            Some(kind) if !kind.is_empty() => kind,
            _ => return Err(ProtocolError::EmptyLine),
        };

        match kind {
            KIND_PLACE_OBJECT => {
                let object_id = parse_field(kind, "object_id", fields.next())?;
                let x = parse_coordinate(kind, "x", fields.next())?;
                let y = parse_coordinate(kind, "y", fields.next())?;
                // Trailing fields are left for future revisions of type 1
                Ok(Message::PlaceObject(ObjectPlacement { object_id, x, y }))
            }
            _ => Ok(Message::Other {
                kind: kind.to_string(),
                fields: fields.map(str::to_string).collect(),
            }),
        }
    }

    /// Encode into a line, without the delimiter
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Encode into bytes ready for the wire, delimiter included
    pub fn to_frame(&self) -> Result<Vec<u8>, ProtocolError> {
        frame_line(&self.encode())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::PlaceObject(p) => {
                write!(f, "{},{},{},{}", KIND_PLACE_OBJECT, p.object_id, p.x, p.y)
            }
            Message::Other { kind, fields } => {
                f.write_str(kind)?;
                for field in fields {
                    write!(f, "{}{}", FIELD_SEPARATOR, field)?;
                }
                Ok(())
            }
        }
    }
}

impl FromStr for Message {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Message::parse(s)
    }
}

/// Append the delimiter to a raw line after checking it holds a single line
pub fn frame_line(line: &str) -> Result<Vec<u8>, ProtocolError> {
    if line.bytes().any(|b| b == DELIMITER || b == b'\r') {
        return Err(ProtocolError::EmbeddedDelimiter);
    }
    let mut frame = Vec::with_capacity(line.len() + 1);
    frame.extend_from_slice(line.as_bytes());
    frame.push(DELIMITER);
    Ok(frame)
}

fn parse_field<T: FromStr>(
    kind: &str,
    field: &'static str,
    raw: Option<&str>,
) -> Result<T, ProtocolError> {
    let raw = raw.filter(|r| !r.is_empty()).ok_or_else(|| ProtocolError::MissingField {
        kind: kind.to_string(),
        field,
    })?;
    raw.parse().map_err(|_| ProtocolError::InvalidField {
        field,
        value: raw.to_string(),
    })
}

fn parse_coordinate(
    kind: &str,
    field: &'static str,
    raw: Option<&str>,
) -> Result<f32, ProtocolError> {
    let value: f32 = parse_field(kind, field, raw)?;
    if !value.is_finite() {
        return Err(ProtocolError::InvalidField {
            field,
            value: raw.unwrap_or_default().to_string(),
        });
    }
    Ok(value)
}

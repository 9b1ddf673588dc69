//! Handshake protocol between master and slave
//!
//! Every exchange between the two peers is a small, self-delimiting frame with a
//! trailing 16-bit additive checksum. Frames are never retransmitted: a frame that
//! fails validation is a fatal fault for the session.
//!
//! # Frame Layout
//!
//! ```text
//! +--------+--------+---------+-------------------+--------+--------+
//! | total  | peerId | msgType | payload (0..N)    | ck low | ck high|
//! +--------+--------+---------+-------------------+--------+--------+
//!   byte 0   byte 1   byte 2                        total-2  total-1
//! ```
//!
//! `total` is the whole frame length (3 header bytes + payload + 2 checksum
//! bytes). The checksum is the wrapping sum of bytes `0..total-2`, stored
//! little-endian.
//!
//! # Payloads
//!
//! - suiteName / caseName: `[len][name bytes]`, at most 29 name bytes
//! - status: `[statusCode]`
//! - everything else: empty
//!
//! # Message Flow
//!
//! ```text
//! Slave                           Master
//!   |-------- HELLO ------------->|
//!   |<------- ACK ----------------|
//!   |-------- FRAMEWORK_INIT ---->|
//!   |<------- ACK ----------------|
//!   |-------- STATUS ------------>|
//!   |<------- STATUS(passed) -----|
//!   |-------- SUITE_NAME -------->|
//!   |<------- ACK ----------------|
//!   |-------- CASE_NAME --------->|   ... per case: ack, status poll,
//!   |-------- RUN --------------->|       run, status poll until terminal
//!   |-------- CASE_LIST_DONE ---->|
//!   |-------- SUITE_LIST_DONE --->|
//!   |-------- CLOSE ------------->|
//!   |<------- ACK ----------------|
//! ```

use crate::catalog::{TestStatus, MAX_NAME_LEN};
use std::fmt;
use thiserror::Error;

/// Header bytes: total length, peer id, message type
pub const HEADER_LEN: usize = 3;

/// Trailing checksum bytes
pub const CHECKSUM_LEN: usize = 2;

/// Smallest valid frame (no payload)
pub const MIN_FRAME_LEN: usize = HEADER_LEN + CHECKSUM_LEN;

/// Framing and decoding faults
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("frame too short: {len} bytes")]
    FrameTooShort { len: usize },

    #[error("invalid frame length {declared} (minimum {min})", min = MIN_FRAME_LEN)]
    InvalidLength { declared: usize },

    #[error("truncated frame: declared {declared} bytes, got {available}")]
    Truncated { declared: usize, available: usize },

    #[error("checksum mismatch: frame carries {received:#06x}, computed {computed:#06x}")]
    ChecksumMismatch { received: u16, computed: u16 },

    #[error("unknown message type {0}")]
    UnknownMessageType(u8),

    #[error("unknown status code {0}")]
    UnknownStatus(u8),

    #[error("name too long: {len} bytes (max {max})", max = MAX_NAME_LEN)]
    NameTooLong { len: usize },

    #[error("malformed {msg_type} payload: {reason}")]
    MalformedPayload { msg_type: MessageType, reason: String },
}

/// Message type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Hello = 1,
    FrameworkInit = 2,
    SuiteName = 3,
    CaseName = 4,
    SuiteListCompleted = 5,
    CaseListCompleted = 6,
    Run = 7,
    Ack = 8,
    Nack = 9,
    Status = 10,
    Close = 11,
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            1 => MessageType::Hello,
            2 => MessageType::FrameworkInit,
            3 => MessageType::SuiteName,
            4 => MessageType::CaseName,
            5 => MessageType::SuiteListCompleted,
            6 => MessageType::CaseListCompleted,
            7 => MessageType::Run,
            8 => MessageType::Ack,
            9 => MessageType::Nack,
            10 => MessageType::Status,
            11 => MessageType::Close,
            other => return Err(ProtocolError::UnknownMessageType(other)),
        })
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Hello => "hello",
            MessageType::FrameworkInit => "frameworkInit",
            MessageType::SuiteName => "suiteName",
            MessageType::CaseName => "caseName",
            MessageType::SuiteListCompleted => "suiteListCompleted",
            MessageType::CaseListCompleted => "caseListCompleted",
            MessageType::Run => "run",
            MessageType::Ack => "ack",
            MessageType::Nack => "nack",
            MessageType::Status => "status",
            MessageType::Close => "close",
        };
        f.write_str(name)
    }
}

/// Typed message content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Hello,
    FrameworkInit,
    SuiteName(String),
    CaseName(String),
    SuiteListCompleted,
    CaseListCompleted,
    Run,
    Ack,
    Nack,
    Status(TestStatus),
    Close,
}

impl MessageBody {
    pub fn message_type(&self) -> MessageType {
        match self {
            MessageBody::Hello => MessageType::Hello,
            MessageBody::FrameworkInit => MessageType::FrameworkInit,
            MessageBody::SuiteName(_) => MessageType::SuiteName,
            MessageBody::CaseName(_) => MessageType::CaseName,
            MessageBody::SuiteListCompleted => MessageType::SuiteListCompleted,
            MessageBody::CaseListCompleted => MessageType::CaseListCompleted,
            MessageBody::Run => MessageType::Run,
            MessageBody::Ack => MessageType::Ack,
            MessageBody::Nack => MessageType::Nack,
            MessageBody::Status(_) => MessageType::Status,
            MessageBody::Close => MessageType::Close,
        }
    }
}

impl fmt::Display for MessageBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageBody::SuiteName(name) | MessageBody::CaseName(name) => {
                write!(f, "{}({})", self.message_type(), name)
            }
            MessageBody::Status(status) => write!(f, "status({})", status),
            other => write!(f, "{}", other.message_type()),
        }
    }
}

/// One protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeMessage {
    pub peer_id: u8,
    pub body: MessageBody,
}

impl HandshakeMessage {
    pub fn new(peer_id: u8, body: MessageBody) -> Self {
        Self { peer_id, body }
    }
}

/// 16-bit wrapping byte sum
pub fn checksum(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)))
}

/// Encode a message into a complete frame
pub fn encode(msg: &HandshakeMessage) -> Result<Vec<u8>, ProtocolError> {
    let mut payload = Vec::new();
    match &msg.body {
        MessageBody::SuiteName(name) | MessageBody::CaseName(name) => {
            if name.len() > MAX_NAME_LEN {
                return Err(ProtocolError::NameTooLong { len: name.len() });
            }
            payload.push(name.len() as u8);
            payload.extend_from_slice(name.as_bytes());
        }
        MessageBody::Status(status) => payload.push(status.code()),
        _ => {}
    }

    let total = HEADER_LEN + payload.len() + CHECKSUM_LEN;
    let mut frame = Vec::with_capacity(total);
    frame.push(total as u8);
    frame.push(msg.peer_id);
    frame.push(msg.body.message_type() as u8);
    frame.extend_from_slice(&payload);

    let ck = checksum(&frame);
    frame.extend_from_slice(&ck.to_le_bytes());

    Ok(frame)
}

/// Decode one frame
///
/// `frame` must start at a frame boundary; bytes beyond the declared length are
/// ignored.
pub fn decode(frame: &[u8]) -> Result<HandshakeMessage, ProtocolError> {
    if frame.len() < HEADER_LEN {
        return Err(ProtocolError::FrameTooShort { len: frame.len() });
    }

    let declared = frame[0] as usize;
    if declared < MIN_FRAME_LEN {
        return Err(ProtocolError::InvalidLength { declared });
    }
    if declared > frame.len() {
        return Err(ProtocolError::Truncated {
            declared,
            available: frame.len(),
        });
    }

    let frame = &frame[..declared];
    let body_end = declared - CHECKSUM_LEN;
    let received = u16::from_le_bytes([frame[body_end], frame[body_end + 1]]);
    let computed = checksum(&frame[..body_end]);
    if received != computed {
        return Err(ProtocolError::ChecksumMismatch { received, computed });
    }

    let peer_id = frame[1];
    let msg_type = MessageType::try_from(frame[2])?;
    let payload = &frame[HEADER_LEN..body_end];

    let body = match msg_type {
        MessageType::SuiteName => MessageBody::SuiteName(decode_name(msg_type, payload)?),
        MessageType::CaseName => MessageBody::CaseName(decode_name(msg_type, payload)?),
        MessageType::Status => {
            if payload.len() != 1 {
                return Err(ProtocolError::MalformedPayload {
                    msg_type,
                    reason: format!("expected 1 status byte, got {}", payload.len()),
                });
            }
            let status =
                TestStatus::from_code(payload[0]).ok_or(ProtocolError::UnknownStatus(payload[0]))?;
            MessageBody::Status(status)
        }
        MessageType::Hello => expect_empty(msg_type, payload, MessageBody::Hello)?,
        MessageType::FrameworkInit => expect_empty(msg_type, payload, MessageBody::FrameworkInit)?,
        MessageType::SuiteListCompleted => {
            expect_empty(msg_type, payload, MessageBody::SuiteListCompleted)?
        }
        MessageType::CaseListCompleted => {
            expect_empty(msg_type, payload, MessageBody::CaseListCompleted)?
        }
        MessageType::Run => expect_empty(msg_type, payload, MessageBody::Run)?,
        MessageType::Ack => expect_empty(msg_type, payload, MessageBody::Ack)?,
        MessageType::Nack => expect_empty(msg_type, payload, MessageBody::Nack)?,
        MessageType::Close => expect_empty(msg_type, payload, MessageBody::Close)?,
    };

    Ok(HandshakeMessage { peer_id, body })
}

fn expect_empty(
    msg_type: MessageType,
    payload: &[u8],
    body: MessageBody,
) -> Result<MessageBody, ProtocolError> {
    if !payload.is_empty() {
        return Err(ProtocolError::MalformedPayload {
            msg_type,
            reason: format!("unexpected {} payload bytes", payload.len()),
        });
    }
    Ok(body)
}

fn decode_name(msg_type: MessageType, payload: &[u8]) -> Result<String, ProtocolError> {
    let Some((&len, bytes)) = payload.split_first() else {
        return Err(ProtocolError::MalformedPayload {
            msg_type,
            reason: "missing name length".to_string(),
        });
    };
    let len = len as usize;
    if len > MAX_NAME_LEN {
        return Err(ProtocolError::NameTooLong { len });
    }
    if bytes.len() != len {
        return Err(ProtocolError::MalformedPayload {
            msg_type,
            reason: format!("name length {} but {} bytes follow", len, bytes.len()),
        });
    }
    String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::MalformedPayload {
        msg_type,
        reason: "name is not valid UTF-8".to_string(),
    })
}

//! WebSocket frames delivered to `WsHandler::on_ws_message`.
//!
//! The listener hands over a [`RawFrame`]; it becomes a [`Frame`] exactly once,
//! and a status code is what marks it as a close frame.

use axum::body::Bytes;
use tokio_tungstenite::tungstenite::Message;

use crate::net::connection::ConnectionId;

/// Close code used when a peer closes without a status.
pub const CLOSE_NO_STATUS: u16 = 1005;

/// WebSocket opcode of a data frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Ping,
    Pong,
    Other(u8),
}

impl From<u8> for OpCode {
    fn from(val: u8) -> Self {
        match val {
            0x0 => OpCode::Continuation,
            0x1 => OpCode::Text,
            0x2 => OpCode::Binary,
            0x9 => OpCode::Ping,
            0xA => OpCode::Pong,
            other => OpCode::Other(other),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> Self {
        match op {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
            OpCode::Other(other) => other,
        }
    }
}

/// Frame payload as delivered by the listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub conn: ConnectionId,
    pub opcode: u8,
    pub data: Bytes,
    pub finish: bool,
    /// Present only on close frames.
    pub code: Option<u16>,
    pub reason: String,
}

impl RawFrame {
    /// Translate a tungstenite message. Raw `Frame` messages are not surfaced.
    pub fn from_message(conn: ConnectionId, message: Message) -> Option<Self> {
        let data = |opcode: u8, data: Bytes| RawFrame {
            conn,
            opcode,
            data,
            finish: true,
            code: None,
            reason: String::new(),
        };

        match message {
            Message::Text(text) => Some(data(0x1, Bytes::copy_from_slice(text.as_bytes()))),
            Message::Binary(bytes) => Some(data(0x2, bytes)),
            Message::Ping(bytes) => Some(data(0x9, bytes)),
            Message::Pong(bytes) => Some(data(0xA, bytes)),
            Message::Close(close) => {
                let (code, reason) = match close {
                    Some(cf) => (u16::from(cf.code), cf.reason.as_str().to_string()),
                    None => (CLOSE_NO_STATUS, String::new()),
                };
                Some(RawFrame {
                    conn,
                    opcode: 0x8,
                    data: Bytes::new(),
                    finish: true,
                    code: Some(code),
                    reason,
                })
            }
            Message::Frame(_) => None,
        }
    }
}

/// A data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub conn: ConnectionId,
    pub opcode: OpCode,
    pub payload: Bytes,
    pub finish: bool,
}

impl DataFrame {
    /// Payload as text, if it is a text frame with valid UTF-8.
    pub fn text(&self) -> Option<&str> {
        match self.opcode {
            OpCode::Text => std::str::from_utf8(&self.payload).ok(),
            _ => None,
        }
    }
}

/// A close control frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub conn: ConnectionId,
    pub code: u16,
    pub reason: String,
}

/// One inbound WebSocket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(DataFrame),
    Close(CloseFrame),
}

impl Frame {
    pub fn conn(&self) -> ConnectionId {
        match self {
            Frame::Data(f) => f.conn,
            Frame::Close(f) => f.conn,
        }
    }

    pub fn is_close(&self) -> bool {
        matches!(self, Frame::Close(_))
    }
}

impl From<RawFrame> for Frame {
    fn from(raw: RawFrame) -> Self {
        match raw.code {
            Some(code) => Frame::Close(CloseFrame {
                conn: raw.conn,
                code,
                reason: raw.reason,
            }),
            None => Frame::Data(DataFrame {
                conn: raw.conn,
                opcode: OpCode::from(raw.opcode),
                payload: raw.data,
                finish: raw.finish,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame as WsCloseFrame;

    #[test]
    fn status_code_marks_close_frame() {
        let conn = ConnectionId::new();
        let raw = RawFrame {
            conn,
            opcode: 0x8,
            data: Bytes::new(),
            finish: true,
            code: Some(1000),
            reason: "bye".into(),
        };
        assert_eq!(
            Frame::from(raw),
            Frame::Close(CloseFrame {
                conn,
                code: 1000,
                reason: "bye".into()
            })
        );
    }

    #[test]
    fn no_status_code_is_data_frame() {
        let conn = ConnectionId::new();
        let frame = Frame::from(RawFrame::from_message(conn, Message::text("hi")).unwrap());
        match frame {
            Frame::Data(data) => {
                assert_eq!(data.opcode, OpCode::Text);
                assert_eq!(data.text(), Some("hi"));
                assert_eq!(data.conn, conn);
            }
            Frame::Close(_) => panic!("expected data frame"),
        }
    }

    #[test]
    fn close_messages_become_close_frames() {
        let conn = ConnectionId::new();
        let with_code = Message::Close(Some(WsCloseFrame {
            code: CloseCode::Away,
            reason: "going".into(),
        }));
        match Frame::from(RawFrame::from_message(conn, with_code).unwrap()) {
            Frame::Close(close) => {
                assert_eq!(close.code, 1001);
                assert_eq!(close.reason, "going");
            }
            Frame::Data(_) => panic!("expected close frame"),
        }

        let bare = Frame::from(RawFrame::from_message(conn, Message::Close(None)).unwrap());
        assert!(matches!(bare, Frame::Close(CloseFrame { code: CLOSE_NO_STATUS, .. })));
    }

    #[test]
    fn binary_payload_is_not_text() {
        let conn = ConnectionId::new();
        let frame = Frame::from(
            RawFrame::from_message(conn, Message::Binary(Bytes::from_static(b"\x00\x01"))).unwrap(),
        );
        let Frame::Data(data) = frame else {
            panic!("expected data frame")
        };
        assert_eq!(data.opcode, OpCode::Binary);
        assert!(data.text().is_none());
        assert_eq!(u8::from(data.opcode), 0x2);
    }
}

//! 線上信封格式
//!
//! 封包：`["packet", typeId, sessionId, from, to, ...fields]`
//! 消息：`["message", sessionId, from, to, payload]`

use crate::messaging::error::ProtocolError;
use crate::messaging::packets::PacketBody;
use crate::messaging::registry::PacketRegistry;
use serde_json::Value;

const KIND_PACKET: &str = "packet";
const KIND_MESSAGE: &str = "message";

/// 具型別的封包
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub session_id: i32,
    pub from: String,
    pub to: String,
    pub body: PacketBody,
}

impl Packet {
    /// 建立封包並分配隨機 session id
    pub fn new(body: PacketBody) -> Self {
        Self {
            session_id: rand::random(),
            from: String::new(),
            to: String::new(),
            body,
        }
    }

    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.to = to.into();
        self
    }

    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = from.into();
        self
    }

    pub fn with_session(mut self, session_id: i32) -> Self {
        self.session_id = session_id;
        self
    }

    /// 對此封包的回覆：送回發送者並沿用 session id
    pub fn reply(&self, body: PacketBody) -> Packet {
        Packet {
            session_id: self.session_id,
            from: String::new(),
            to: self.from.clone(),
            body,
        }
    }

    pub fn packet_id(&self) -> i32 {
        self.body.packet_id()
    }

    pub fn encode(&self) -> String {
        let mut array: Vec<Value> = vec![
            KIND_PACKET.into(),
            self.packet_id().into(),
            self.session_id.into(),
            self.from.as_str().into(),
            self.to.as_str().into(),
        ];
        self.body.write_fields(&mut array);
        Value::Array(array).to_string()
    }
}

/// 無型別的自由格式消息
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub session_id: i32,
    pub from: String,
    pub to: String,
    pub payload: Value,
}

impl Message {
    pub fn new(to: impl Into<String>, payload: Value) -> Self {
        Self {
            session_id: rand::random(),
            from: String::new(),
            to: to.into(),
            payload,
        }
    }

    pub fn reply(&self, payload: Value) -> Message {
        Message {
            session_id: self.session_id,
            from: String::new(),
            to: self.from.clone(),
            payload,
        }
    }

    pub fn encode(&self) -> String {
        Value::Array(vec![
            KIND_MESSAGE.into(),
            self.session_id.into(),
            self.from.as_str().into(),
            self.to.as_str().into(),
            self.payload.clone(),
        ])
        .to_string()
    }
}

/// 解碼後的信封
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Packet(Packet),
    Message(Message),
}

impl Envelope {
    pub fn decode(raw: &str, registry: &PacketRegistry) -> Result<Envelope, ProtocolError> {
        let value: Value = serde_json::from_str(raw)?;
        let array = match value {
            Value::Array(array) => array,
            _ => return Err(ProtocolError::Malformed("envelope is not an array".into())),
        };

        let kind = array
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::Malformed("missing envelope kind".into()))?;

        match kind {
            KIND_PACKET => {
                if array.len() < 5 {
                    return Err(ProtocolError::Malformed(format!(
                        "packet header has {} slots",
                        array.len()
                    )));
                }
                let packet_id = header_int(&array[1], "packet id")?;
                let session_id = header_int(&array[2], "session id")?;
                let from = header_str(&array[3], "from")?;
                let to = header_str(&array[4], "to")?;
                let body = registry.decode(packet_id, &array[5..])?;

                Ok(Envelope::Packet(Packet {
                    session_id,
                    from,
                    to,
                    body,
                }))
            }
            KIND_MESSAGE => {
                if array.len() < 5 {
                    return Err(ProtocolError::Malformed(format!(
                        "message has {} slots",
                        array.len()
                    )));
                }
                Ok(Envelope::Message(Message {
                    session_id: header_int(&array[1], "session id")?,
                    from: header_str(&array[2], "from")?,
                    to: header_str(&array[3], "to")?,
                    payload: array[4].clone(),
                }))
            }
            other => Err(ProtocolError::UnknownKind(other.to_string())),
        }
    }

    pub fn session_id(&self) -> i32 {
        match self {
            Envelope::Packet(p) => p.session_id,
            Envelope::Message(m) => m.session_id,
        }
    }
}

fn header_int(value: &Value, what: &str) -> Result<i32, ProtocolError> {
    value
        .as_i64()
        .and_then(|v| i32::try_from(v).ok())
        .ok_or_else(|| ProtocolError::Malformed(format!("{} is not an int32: {}", what, value)))
}

fn header_str(value: &Value, what: &str) -> Result<String, ProtocolError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        // 部分客戶端把空路由寫成 null
        Value::Null => Ok(String::new()),
        other => Err(ProtocolError::Malformed(format!(
            "{} is not a string: {}",
            what, other
        ))),
    }
}

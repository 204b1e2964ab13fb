//! 封包類型
//!
//! 每種封包有固定的數字 id，欄位依固定順序寫入信封尾端。欄位順序與數量
//! 屬於線上格式的一部分，修改會破壞相容性。

use crate::messaging::error::ProtocolError;
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

pub const CLIENT_AUTH: i32 = 1;
pub const SERVER_CHANGE_STATUS: i32 = 2;
pub const REMOVE_SERVER: i32 = 3;
pub const SERVER_ACTION: i32 = 4;
pub const PLAYER_CONNECT: i32 = 5;
pub const PLAYER_DISCONNECT: i32 = 6;
pub const GET_BEST_TEMPLATE: i32 = 7;
pub const BEST_TEMPLATE_RESULT: i32 = 8;
pub const START_SERVER: i32 = 9;
pub const SERVER_STARTED: i32 = 10;

/// 玩家動作類型，透過 ServerAction 封包送到代理
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerActionKind {
    PlayerSendMessage,
    PlayerConnect,
    PlayerKick,
}

impl ServerActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerActionKind::PlayerSendMessage => "PLAYER_SEND_MESSAGE",
            ServerActionKind::PlayerConnect => "PLAYER_CONNECT",
            ServerActionKind::PlayerKick => "PLAYER_KICK",
        }
    }
}

impl fmt::Display for ServerActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 封包內容，以封包 id 區分
#[derive(Debug, Clone, PartialEq)]
pub enum PacketBody {
    /// 工作進程啟動完成並向調度器報到
    ClientAuth { client_id: String },
    ServerChangeStatus { server: String, new_status: String },
    /// 通知代理移除已退出的伺服器
    RemoveServer { server: String },
    ServerAction {
        action: String,
        player_uuid: String,
        extra_data: Value,
    },
    PlayerConnect {
        player_name: String,
        uuid: Uuid,
        ip_address: String,
        server: String,
    },
    PlayerDisconnect { uuid: Uuid, server: String },
    GetBestTemplate { template: String },
    BestTemplateResult { server: String },
    StartServer { template: String },
    ServerStarted { server: String },
    /// 由外部註冊的封包類型，欄位原樣保留
    Custom { packet_id: i32, fields: Vec<Value> },
}

impl PacketBody {
    pub fn packet_id(&self) -> i32 {
        match self {
            PacketBody::ClientAuth { .. } => CLIENT_AUTH,
            PacketBody::ServerChangeStatus { .. } => SERVER_CHANGE_STATUS,
            PacketBody::RemoveServer { .. } => REMOVE_SERVER,
            PacketBody::ServerAction { .. } => SERVER_ACTION,
            PacketBody::PlayerConnect { .. } => PLAYER_CONNECT,
            PacketBody::PlayerDisconnect { .. } => PLAYER_DISCONNECT,
            PacketBody::GetBestTemplate { .. } => GET_BEST_TEMPLATE,
            PacketBody::BestTemplateResult { .. } => BEST_TEMPLATE_RESULT,
            PacketBody::StartServer { .. } => START_SERVER,
            PacketBody::ServerStarted { .. } => SERVER_STARTED,
            PacketBody::Custom { packet_id, .. } => *packet_id,
        }
    }

    /// 依封包的欄位順序寫入
    pub fn write_fields(&self, out: &mut Vec<Value>) {
        match self {
            PacketBody::ClientAuth { client_id } => out.push(client_id.as_str().into()),
            PacketBody::ServerChangeStatus { server, new_status } => {
                out.push(server.as_str().into());
                out.push(new_status.as_str().into());
            }
            PacketBody::RemoveServer { server }
            | PacketBody::BestTemplateResult { server }
            | PacketBody::ServerStarted { server } => out.push(server.as_str().into()),
            PacketBody::ServerAction {
                action,
                player_uuid,
                extra_data,
            } => {
                out.push(action.as_str().into());
                out.push(player_uuid.as_str().into());
                out.push(extra_data.clone());
            }
            PacketBody::PlayerConnect {
                player_name,
                uuid,
                ip_address,
                server,
            } => {
                out.push(player_name.as_str().into());
                out.push(uuid.to_string().into());
                out.push(ip_address.as_str().into());
                out.push(server.as_str().into());
            }
            PacketBody::PlayerDisconnect { uuid, server } => {
                out.push(uuid.to_string().into());
                out.push(server.as_str().into());
            }
            PacketBody::GetBestTemplate { template } | PacketBody::StartServer { template } => {
                out.push(template.as_str().into())
            }
            PacketBody::Custom { fields, .. } => out.extend(fields.iter().cloned()),
        }
    }
}

/// 依序讀取封包欄位
pub struct FieldReader<'a> {
    packet_id: i32,
    fields: &'a [Value],
    index: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(packet_id: i32, fields: &'a [Value]) -> Self {
        Self {
            packet_id,
            fields,
            index: 0,
        }
    }

    pub fn packet_id(&self) -> i32 {
        self.packet_id
    }

    pub fn value(&mut self) -> Result<Value, ProtocolError> {
        let value = self
            .fields
            .get(self.index)
            .cloned()
            .ok_or(ProtocolError::MissingField {
                packet_id: self.packet_id,
                index: self.index,
            })?;
        self.index += 1;
        Ok(value)
    }

    pub fn string(&mut self) -> Result<String, ProtocolError> {
        let index = self.index;
        match self.value()? {
            Value::String(s) => Ok(s),
            other => Err(self.invalid(index, format!("expected string, got {}", other))),
        }
    }

    pub fn uuid(&mut self) -> Result<Uuid, ProtocolError> {
        let index = self.index;
        let raw = self.string()?;
        Uuid::parse_str(&raw).map_err(|e| self.invalid(index, e.to_string()))
    }

    /// 剩餘欄位
    pub fn rest(&mut self) -> Vec<Value> {
        let rest = self.fields.get(self.index..).unwrap_or_default().to_vec();
        self.index = self.fields.len();
        rest
    }

    fn invalid(&self, index: usize, reason: String) -> ProtocolError {
        ProtocolError::InvalidField {
            packet_id: self.packet_id,
            index,
            reason,
        }
    }
}

/// 內建封包的解碼函式
pub(crate) mod decode {
    use super::*;

    pub fn client_auth(r: &mut FieldReader<'_>) -> Result<PacketBody, ProtocolError> {
        Ok(PacketBody::ClientAuth {
            client_id: r.string()?,
        })
    }

    pub fn server_change_status(r: &mut FieldReader<'_>) -> Result<PacketBody, ProtocolError> {
        Ok(PacketBody::ServerChangeStatus {
            server: r.string()?,
            new_status: r.string()?,
        })
    }

    pub fn remove_server(r: &mut FieldReader<'_>) -> Result<PacketBody, ProtocolError> {
        Ok(PacketBody::RemoveServer { server: r.string()? })
    }

    pub fn server_action(r: &mut FieldReader<'_>) -> Result<PacketBody, ProtocolError> {
        Ok(PacketBody::ServerAction {
            action: r.string()?,
            player_uuid: r.string()?,
            extra_data: r.value()?,
        })
    }

    pub fn player_connect(r: &mut FieldReader<'_>) -> Result<PacketBody, ProtocolError> {
        Ok(PacketBody::PlayerConnect {
            player_name: r.string()?,
            uuid: r.uuid()?,
            ip_address: r.string()?,
            server: r.string()?,
        })
    }

    pub fn player_disconnect(r: &mut FieldReader<'_>) -> Result<PacketBody, ProtocolError> {
        Ok(PacketBody::PlayerDisconnect {
            uuid: r.uuid()?,
            server: r.string()?,
        })
    }

    pub fn get_best_template(r: &mut FieldReader<'_>) -> Result<PacketBody, ProtocolError> {
        Ok(PacketBody::GetBestTemplate {
            template: r.string()?,
        })
    }

    pub fn best_template_result(r: &mut FieldReader<'_>) -> Result<PacketBody, ProtocolError> {
        Ok(PacketBody::BestTemplateResult { server: r.string()? })
    }

    pub fn start_server(r: &mut FieldReader<'_>) -> Result<PacketBody, ProtocolError> {
        Ok(PacketBody::StartServer {
            template: r.string()?,
        })
    }

    pub fn server_started(r: &mut FieldReader<'_>) -> Result<PacketBody, ProtocolError> {
        Ok(PacketBody::ServerStarted { server: r.string()? })
    }
}

use crate::messaging::error::ProtocolError;
use crate::messaging::packets::{self, decode, FieldReader, PacketBody};
use std::collections::HashMap;

/// 封包解碼函式
pub type PacketDecoder = fn(&mut FieldReader<'_>) -> Result<PacketBody, ProtocolError>;

/// 封包 id 到解碼函式的對照表
pub struct PacketRegistry {
    decoders: HashMap<i32, PacketDecoder>,
}

impl PacketRegistry {
    /// 空的註冊表
    pub fn empty() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// 包含所有內建封包的註冊表
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(packets::CLIENT_AUTH, decode::client_auth);
        registry.register(packets::SERVER_CHANGE_STATUS, decode::server_change_status);
        registry.register(packets::REMOVE_SERVER, decode::remove_server);
        registry.register(packets::SERVER_ACTION, decode::server_action);
        registry.register(packets::PLAYER_CONNECT, decode::player_connect);
        registry.register(packets::PLAYER_DISCONNECT, decode::player_disconnect);
        registry.register(packets::GET_BEST_TEMPLATE, decode::get_best_template);
        registry.register(packets::BEST_TEMPLATE_RESULT, decode::best_template_result);
        registry.register(packets::START_SERVER, decode::start_server);
        registry.register(packets::SERVER_STARTED, decode::server_started);
        registry
    }

    /// 註冊或覆蓋封包解碼函式
    pub fn register(&mut self, packet_id: i32, decoder: PacketDecoder) {
        self.decoders.insert(packet_id, decoder);
    }

    pub fn contains(&self, packet_id: i32) -> bool {
        self.decoders.contains_key(&packet_id)
    }

    /// 解碼封包欄位
    pub fn decode(&self, packet_id: i32, fields: &[serde_json::Value]) -> Result<PacketBody, ProtocolError> {
        let decoder = self
            .decoders
            .get(&packet_id)
            .ok_or(ProtocolError::UnknownPacket(packet_id))?;
        decoder(&mut FieldReader::new(packet_id, fields))
    }
}

impl Default for PacketRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

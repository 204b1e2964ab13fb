use crate::cache::{Cacheable, CloudCache, PLAYER_PREFIX};
use crate::messaging::{Broker, Packet, PacketBody, ServerActionKind};
use crate::server::Server;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};
use uuid::Uuid;

/// 線上玩家
///
/// 對伺服器只持有弱引用，實例退出後不會因玩家而延長生命週期。
pub struct CloudPlayer {
    name: String,
    uuid: Uuid,
    address: String,
    network: RwLock<Option<Weak<Server>>>,
    server: RwLock<Option<Weak<Server>>>,
    extra_data: RwLock<Value>,
    broker: Arc<Broker>,
    cache: CloudCache,
}

impl CloudPlayer {
    pub fn new(
        name: impl Into<String>,
        uuid: Uuid,
        address: impl Into<String>,
        broker: Arc<Broker>,
        cache: CloudCache,
    ) -> Self {
        Self {
            name: name.into(),
            uuid,
            address: address.into(),
            network: RwLock::new(None),
            server: RwLock::new(None),
            extra_data: RwLock::new(Value::Object(Default::default())),
            broker,
            cache,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// 玩家所在的代理
    pub fn connected_network(&self) -> Option<Arc<Server>> {
        self.network.read().as_ref().and_then(Weak::upgrade)
    }

    /// 玩家所在的後端伺服器
    pub fn connected_server(&self) -> Option<Arc<Server>> {
        self.server.read().as_ref().and_then(Weak::upgrade)
    }

    pub fn extra_data(&self) -> Value {
        self.extra_data.read().clone()
    }

    pub fn set_extra_data(&self, data: Value) {
        *self.extra_data.write() = data;
        self.cache.update(self);
    }

    pub fn set_connected_network(&self, network: Option<&Arc<Server>>) {
        self.relink(&self.network, network);
    }

    pub fn set_connected_server(&self, server: Option<&Arc<Server>>) {
        self.relink(&self.server, server);
    }

    /// 從舊伺服器移除、更新快取，再加入新伺服器
    fn relink(&self, slot: &RwLock<Option<Weak<Server>>>, target: Option<&Arc<Server>>) {
        let previous = {
            let mut slot = slot.write();
            let previous = slot.take().and_then(|w| w.upgrade());
            *slot = target.map(Arc::downgrade);
            previous
        };

        if let Some(previous) = previous {
            previous.remove_player(&self.uuid);
        }
        self.cache.update(self);
        if let Some(target) = target {
            target.add_player(self.uuid);
        }
    }

    /// 經由代理送出訊息
    pub fn send_message(&self, message: &str) {
        self.send_action(ServerActionKind::PlayerSendMessage, json!({ "message": message }));
    }

    /// 要求代理把玩家轉移到指定伺服器
    pub fn connect(&self, server: &Server) {
        self.send_action(ServerActionKind::PlayerConnect, json!({ "server": server.name() }));
    }

    /// 要求代理踢出玩家
    pub fn disconnect(&self, reason: &str) {
        self.send_action(ServerActionKind::PlayerKick, json!({ "reason": reason }));
    }

    fn send_action(&self, action: ServerActionKind, extra_data: Value) {
        let Some(network) = self.connected_network() else {
            warn!(player = %self.name, action = %action, "玩家不在任何代理上，無法送出動作");
            return;
        };

        debug!(player = %self.name, action = %action, proxy = %network.name(), "送出玩家動作");
        let packet = Packet::new(PacketBody::ServerAction {
            action: action.as_str().to_string(),
            player_uuid: self.uuid.to_string(),
            extra_data,
        })
        .with_to(network.name().to_lowercase());
        self.broker.publish(packet);
    }
}

impl fmt::Debug for CloudPlayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudPlayer")
            .field("name", &self.name)
            .field("uuid", &self.uuid)
            .finish()
    }
}

/// 快取中的玩家文件
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerData {
    pub name: String,
    pub uuid: Uuid,
    pub address: String,
    pub network: Option<String>,
    pub server: Option<String>,
    pub extra_data: Value,
}

impl Cacheable for CloudPlayer {
    const CACHE_PREFIX: &'static str = PLAYER_PREFIX;
    type Document = PlayerData;

    fn cache_id(&self) -> String {
        self.uuid.to_string()
    }

    fn to_document(&self) -> PlayerData {
        PlayerData {
            name: self.name.clone(),
            uuid: self.uuid,
            address: self.address.clone(),
            network: self.connected_network().map(|s| s.name().to_string()),
            server: self.connected_server().map(|s| s.name().to_string()),
            extra_data: self.extra_data(),
        }
    }
}

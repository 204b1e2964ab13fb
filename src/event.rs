// 事件系統模組
//
// 伺服器與玩家生命週期中的重要時刻會以事件形式通知外部觀察者（插件）。
// 伺服器建立事件可被取消，取消後不會建立伺服器。

use crate::player::CloudPlayer;
use crate::server::Server;
use parking_lot::RwLock;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error};

/// 可取消的伺服器建立事件
pub struct ServerCreateEvent {
    pub server: Arc<Server>,
    cancelled: bool,
}

impl ServerCreateEvent {
    pub fn new(server: Arc<Server>) -> Self {
        Self {
            server,
            cancelled: false,
        }
    }

    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

/// 調度器發出的事件
pub enum CloudEvent {
    ServerCreate(ServerCreateEvent),
    ServerStart {
        server: Arc<Server>,
    },
    ServerReady {
        server: Arc<Server>,
    },
    ServerExit {
        server: Arc<Server>,
    },
    PlayerConnect {
        player: Arc<CloudPlayer>,
        server: Arc<Server>,
    },
    PlayerDisconnect {
        player: Arc<CloudPlayer>,
        network: Option<Arc<Server>>,
        server: Option<Arc<Server>>,
    },
    PlayerTransfer {
        player: Arc<CloudPlayer>,
        from: Option<Arc<Server>>,
        to: Arc<Server>,
    },
}

impl CloudEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CloudEvent::ServerCreate(_) => "server_create",
            CloudEvent::ServerStart { .. } => "server_start",
            CloudEvent::ServerReady { .. } => "server_ready",
            CloudEvent::ServerExit { .. } => "server_exit",
            CloudEvent::PlayerConnect { .. } => "player_connect",
            CloudEvent::PlayerDisconnect { .. } => "player_disconnect",
            CloudEvent::PlayerTransfer { .. } => "player_transfer",
        }
    }

    /// 只有建立事件可以被取消
    pub fn is_cancelled(&self) -> bool {
        match self {
            CloudEvent::ServerCreate(event) => event.is_cancelled(),
            _ => false,
        }
    }
}

impl fmt::Debug for CloudEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 事件監聽器
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &mut CloudEvent);
}

impl<F> EventListener for F
where
    F: Fn(&mut CloudEvent) + Send + Sync,
{
    fn on_event(&self, event: &mut CloudEvent) {
        self(event)
    }
}

/// 事件管理器
#[derive(Default)]
pub struct EventManager {
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
}

impl EventManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn EventListener>) {
        self.listeners.write().push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// 依註冊順序通知所有監聽器，並返回（可能已被修改的）事件
    pub fn call(&self, mut event: CloudEvent) -> CloudEvent {
        let listeners = self.listeners.read().clone();
        debug!(event = event.name(), listeners = listeners.len(), "發出事件");

        for listener in listeners {
            let result = catch_unwind(AssertUnwindSafe(|| listener.on_event(&mut event)));
            if result.is_err() {
                error!(event = event.name(), "事件監聽器發生 panic");
            }
        }
        event
    }
}

//! 主路由封包處理
//!
//! 封包依收到的順序在單一背景任務中逐一處理，同一玩家的連線與斷線不會顛倒。
//! 只有啟動伺服器的請求會另開任務等待建立完成。

use crate::event::{CloudEvent, EventManager};
use crate::messaging::{Broker, Packet, PacketBody};
use crate::player::{CloudPlayer, PlayerManager};
use crate::server::{ServerManager, ServerStatus};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct PacketHandler {
    servers: Arc<ServerManager>,
    players: Arc<PlayerManager>,
    events: Arc<EventManager>,
    broker: Arc<Broker>,
    worker: Mutex<Option<AbortHandle>>,
}

impl PacketHandler {
    pub fn new(
        servers: Arc<ServerManager>,
        players: Arc<PlayerManager>,
        events: Arc<EventManager>,
        broker: Arc<Broker>,
    ) -> Arc<Self> {
        Arc::new(Self {
            servers,
            players,
            events,
            broker,
            worker: Mutex::new(None),
        })
    }

    /// 監聽主路由，收到的封包排入處理佇列
    pub fn attach(self: &Arc<Self>) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            warn!("封包處理器已掛載");
            return;
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<Packet>();
        let route = self.broker.main_route().to_string();
        self.broker.listen(&route, move |packet| {
            // 處理任務結束後收到的封包直接丟棄
            let _ = tx.send(packet.clone());
        });

        let handler = self.clone();
        let task = tokio::spawn(async move {
            while let Some(packet) = rx.recv().await {
                handler.handle(packet);
            }
        });
        *worker = Some(task.abort_handle());
        debug!(route = %route, "封包處理器已掛載");
    }

    /// 停止處理佇列
    pub fn detach(&self) {
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
    }

    pub fn handle(self: &Arc<Self>, packet: Packet) {
        if matches!(packet.body, PacketBody::StartServer { .. }) {
            let handler = self.clone();
            tokio::spawn(async move { handler.on_start_server(packet).await });
            return;
        }

        match &packet.body {
            PacketBody::ClientAuth { client_id } => self.on_client_auth(client_id),
            PacketBody::PlayerConnect {
                player_name,
                uuid,
                ip_address,
                server,
            } => self.on_player_connect(player_name, *uuid, ip_address, server),
            PacketBody::PlayerDisconnect { uuid, server } => {
                self.on_player_disconnect(uuid, server)
            }
            PacketBody::ServerChangeStatus { server, new_status } => {
                self.on_change_status(server, new_status)
            }
            PacketBody::GetBestTemplate { template } => self.on_get_best_template(&packet, template),
            _ => {}
        }
    }

    fn on_client_auth(&self, client_id: &str) {
        let Some(server) = self.servers.get_server(client_id) else {
            debug!(client = client_id, "未知的客戶端報到");
            return;
        };

        if !server.transition(ServerStatus::Starting, ServerStatus::Running) {
            debug!(server = %server.name(), status = %server.status(), "報到時伺服器不在啟動中");
            return;
        }

        info!(server = %server.name(), "伺服器已就緒");
        self.events.call(CloudEvent::ServerReady { server });
    }

    fn on_player_connect(&self, name: &str, uuid: Uuid, address: &str, server_name: &str) {
        let Some(server) = self.servers.get_server(server_name) else {
            debug!(player = name, server = server_name, "玩家連線到未知的伺服器");
            return;
        };

        let player = match self.players.get_player(&uuid) {
            Some(player) => player,
            None => {
                let player = Arc::new(CloudPlayer::new(
                    name,
                    uuid,
                    address,
                    self.broker.clone(),
                    self.servers.context().cache.clone(),
                ));
                self.players.add_player(player.clone());
                self.events.call(CloudEvent::PlayerConnect {
                    player: player.clone(),
                    server: server.clone(),
                });
                player
            }
        };

        if server.is_proxy() {
            player.set_connected_network(Some(&server));
        } else {
            self.events.call(CloudEvent::PlayerTransfer {
                player: player.clone(),
                from: player.connected_server(),
                to: server.clone(),
            });
            player.set_connected_server(Some(&server));
        }

        info!(player = %player.name(), server = %server.name(), "玩家已連線");
    }

    fn on_player_disconnect(&self, uuid: &Uuid, server_name: &str) {
        let Some(server) = self.servers.get_server(server_name) else {
            return;
        };
        let player = self.players.get_player(uuid);

        if let Some(player) = &player {
            info!(player = %player.name(), server = %server.name(), "玩家已斷線");
        }

        // 只有離開代理才代表離開整個網路
        if !server.is_proxy() {
            return;
        }

        if let Some(player) = player {
            self.events.call(CloudEvent::PlayerDisconnect {
                player: player.clone(),
                network: player.connected_network(),
                server: player.connected_server(),
            });
            player.set_connected_server(None);
            player.set_connected_network(None);
        }
        self.players.remove_player(uuid);
    }

    fn on_change_status(&self, server_name: &str, new_status: &str) {
        let Some(server) = self.servers.get_server(server_name) else {
            return;
        };

        match new_status.parse::<ServerStatus>() {
            Ok(status) => server.set_status(status),
            Err(e) => warn!(server = %server.name(), "忽略無效的狀態回報: {}", e),
        }
    }

    fn on_get_best_template(&self, packet: &Packet, template_name: &str) {
        let Some(template) = self.servers.get_template(template_name) else {
            debug!(template = template_name, "查詢未知的模板");
            return;
        };

        let best = self.servers.get_best_server(&template);
        let Some(first) = best.first() else {
            debug!(template = template_name, "模板沒有可用的伺服器");
            return;
        };

        self.broker.publish(packet.reply(PacketBody::BestTemplateResult {
            server: first.server.name().to_string(),
        }));
    }

    async fn on_start_server(&self, packet: Packet) {
        let PacketBody::StartServer {
            template: template_name,
        } = &packet.body
        else {
            return;
        };

        let Some(template) = self.servers.get_template(template_name) else {
            warn!(template = %template_name, from = %packet.from, "要求啟動未知的模板");
            return;
        };

        match self.servers.start_server(&template, None).await {
            Ok(Some(server)) => {
                self.broker.publish(packet.reply(PacketBody::ServerStarted {
                    server: server.name().to_string(),
                }));
            }
            Ok(None) => debug!(template = %template_name, "伺服器建立被取消，不回覆"),
            Err(e) => warn!(template = %template_name, "依要求啟動伺服器失敗: {}", e),
        }
    }
}

//! 消息代理
//!
//! 擁有一條訂閱流與一組發布工作槽；負責解碼信封、分派給頻道監聽器，
//! 並以 session id 對應請求與回覆。封包與消息各自有獨立的待回覆表。

use crate::config::types::BrokerConfig;
use crate::messaging::error::ProtocolError;
use crate::messaging::protocol::{Envelope, Message, Packet};
use crate::messaging::registry::{PacketDecoder, PacketRegistry};
use crate::messaging::transport::Transport;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch, Semaphore};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

/// 萬用頻道，收到所有頻道的消息
pub const WILDCARD: &str = "";

pub type PacketListener = Arc<dyn Fn(&Packet) + Send + Sync>;
pub type MessageListener = Arc<dyn Fn(&Message) + Send + Sync>;

type PacketCallback = Box<dyn FnOnce(Option<Packet>) + Send>;
type MessageCallback = Box<dyn FnOnce(Option<Message>) + Send>;

// 回調以鎖包裝，待回覆表才能在執行緒間共享
struct PendingPacket {
    expected: i32,
    token: u64,
    callback: Mutex<PacketCallback>,
    timer: Option<AbortHandle>,
}

struct PendingMessage {
    token: u64,
    callback: Mutex<MessageCallback>,
    timer: Option<AbortHandle>,
}

pub struct Broker {
    main_route: String,
    routes: Vec<String>,
    registry: RwLock<PacketRegistry>,
    transport: Arc<dyn Transport>,
    packet_listeners: RwLock<HashMap<String, Vec<PacketListener>>>,
    message_listeners: RwLock<HashMap<String, Vec<MessageListener>>>,
    pending_packets: Arc<DashMap<i32, PendingPacket>>,
    pending_messages: Arc<DashMap<i32, PendingMessage>>,
    publish_slots: Arc<Semaphore>,
    next_token: AtomicU64,
    running: AtomicBool,
    connected: watch::Sender<bool>,
    subscriber: Mutex<Option<JoinHandle<()>>>,
    response_timeout: Duration,
    reconnect_delay: Duration,
}

impl Broker {
    /// 建立代理，訂閱主路由與額外路由
    pub fn new(
        config: &BrokerConfig,
        transport: Arc<dyn Transport>,
        extra_routes: &[String],
        reconnect_delay: Duration,
    ) -> Self {
        let main_route = config.main_route.to_lowercase();
        let mut routes = vec![main_route.clone()];
        for route in extra_routes {
            let route = route.to_lowercase();
            if !routes.contains(&route) {
                routes.push(route);
            }
        }

        let (connected, _) = watch::channel(false);

        Self {
            main_route,
            routes,
            registry: RwLock::new(PacketRegistry::with_defaults()),
            transport,
            packet_listeners: RwLock::new(HashMap::new()),
            message_listeners: RwLock::new(HashMap::new()),
            pending_packets: Arc::new(DashMap::new()),
            pending_messages: Arc::new(DashMap::new()),
            publish_slots: Arc::new(Semaphore::new(config.publish_workers.max(8))),
            next_token: AtomicU64::new(1),
            running: AtomicBool::new(false),
            connected,
            subscriber: Mutex::new(None),
            response_timeout: config.response_timeout(),
            reconnect_delay: reconnect_delay.max(Duration::from_millis(100)),
        }
    }

    pub fn main_route(&self) -> &str {
        &self.main_route
    }

    pub fn default_timeout(&self) -> Duration {
        self.response_timeout
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// 註冊額外的封包類型
    pub fn register_packet(&self, packet_id: i32, decoder: PacketDecoder) {
        self.registry.write().register(packet_id, decoder);
    }

    /// 啟動訂閱循環
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            warn!("消息代理已在運行");
            return;
        }

        let broker = self.clone();
        let handle = tokio::spawn(async move { broker.subscribe_loop().await });
        *self.subscriber.lock() = Some(handle);
    }

    /// 等待訂閱建立
    pub async fn wait_connected(&self) {
        let mut rx = self.connected.subscribe();
        let _ = rx.wait_for(|connected| *connected).await;
    }

    async fn subscribe_loop(&self) {
        while self.is_running() {
            match self.transport.subscribe(&self.routes).await {
                Ok(mut stream) => {
                    info!(routes = ?self.routes, "消息代理已連接");
                    self.connected.send_replace(true);

                    while let Some(item) = stream.next().await {
                        match item {
                            Ok(message) => self.dispatch(&message.channel, &message.payload),
                            Err(e) => {
                                warn!("訂閱流錯誤: {}", e);
                                break;
                            }
                        }
                    }

                    self.connected.send_replace(false);
                    if self.is_running() {
                        warn!("訂閱連接中斷，準備重連");
                    }
                }
                Err(e) => {
                    error!("訂閱失敗: {}", e);
                }
            }

            if !self.is_running() {
                break;
            }
            tokio::time::sleep(self.reconnect_delay).await;
        }
        debug!("訂閱循環結束");
    }

    /// 處理一筆收到的原始消息
    pub fn dispatch(&self, channel: &str, raw: &str) {
        let decoded = Envelope::decode(raw, &self.registry.read());

        match decoded {
            Ok(Envelope::Packet(packet)) => {
                self.resolve_packet(&packet);
                self.notify_packet(channel, &packet);
            }
            Ok(Envelope::Message(message)) => {
                self.resolve_message(&message);
                self.notify_message(channel, &message);
            }
            Err(ProtocolError::UnknownPacket(id)) => {
                warn!(channel, packet_id = id, "收到無效封包: {}", raw);
            }
            Err(e) => {
                warn!(channel, "無法解碼信封: {} ({})", e, raw);
            }
        }
    }

    fn resolve_packet(&self, packet: &Packet) {
        // 類型不符時保留待回覆項目，由超時處理
        let expected = packet.packet_id();
        let claimed = self
            .pending_packets
            .remove_if(&packet.session_id, |_, pending| pending.expected == expected);

        if let Some((session_id, pending)) = claimed {
            if let Some(timer) = pending.timer {
                timer.abort();
            }
            debug!(session_id, "封包回覆已送達");
            invoke(|| (pending.callback.into_inner())(Some(packet.clone())));
        }
    }

    fn resolve_message(&self, message: &Message) {
        if let Some((session_id, pending)) = self.pending_messages.remove(&message.session_id) {
            if let Some(timer) = pending.timer {
                timer.abort();
            }
            debug!(session_id, "消息回覆已送達");
            invoke(|| (pending.callback.into_inner())(Some(message.clone())));
        }
    }

    fn notify_packet(&self, channel: &str, packet: &Packet) {
        let listeners: Vec<PacketListener> = {
            let map = self.packet_listeners.read();
            map.get(channel)
                .into_iter()
                .chain(map.get(WILDCARD))
                .flatten()
                .cloned()
                .collect()
        };

        for listener in listeners {
            invoke(|| listener(packet));
        }
    }

    fn notify_message(&self, channel: &str, message: &Message) {
        let listeners: Vec<MessageListener> = {
            let map = self.message_listeners.read();
            map.get(channel)
                .into_iter()
                .chain(map.get(WILDCARD))
                .flatten()
                .cloned()
                .collect()
        };

        for listener in listeners {
            invoke(|| listener(message));
        }
    }

    /// 監聽頻道上的封包，空字串代表所有頻道
    pub fn listen<F>(&self, channel: &str, listener: F)
    where
        F: Fn(&Packet) + Send + Sync + 'static,
    {
        self.packet_listeners
            .write()
            .entry(channel.to_lowercase())
            .or_default()
            .push(Arc::new(listener));
    }

    /// 監聽頻道上的自由格式消息
    pub fn listen_messages<F>(&self, channel: &str, listener: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.message_listeners
            .write()
            .entry(channel.to_lowercase())
            .or_default()
            .push(Arc::new(listener));
    }

    /// 發布封包，不等待結果
    pub fn publish(&self, mut packet: Packet) {
        if packet.from.is_empty() {
            packet.from = self.main_route.clone();
        }
        let channel = packet.to.to_lowercase();
        self.publish_raw(channel, packet.encode());
    }

    /// 發布自由格式消息，不等待結果
    pub fn send_message(&self, mut message: Message) {
        if message.from.is_empty() {
            message.from = self.main_route.clone();
        }
        let channel = message.to.to_lowercase();
        self.publish_raw(channel, message.encode());
    }

    fn publish_raw(&self, channel: String, payload: String) {
        let transport = self.transport.clone();
        let slots = self.publish_slots.clone();

        tokio::spawn(async move {
            let Ok(_permit) = slots.acquire_owned().await else {
                return;
            };
            if let Err(e) = transport.publish(&channel, payload).await {
                error!(channel = %channel, "發布失敗: {}", e);
            }
        });
    }

    /// 發送請求並以回調接收回覆；超時時回調收到 None
    pub fn request_with<F>(&self, mut packet: Packet, expected: i32, timeout: Duration, callback: F)
    where
        F: FnOnce(Option<Packet>) + Send + 'static,
    {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let mut pending = Some(PendingPacket {
            expected,
            token,
            callback: Mutex::new(Box::new(callback)),
            timer: None,
        });

        let session_id = loop {
            let candidate = packet.session_id;
            match self.pending_packets.entry(candidate) {
                Entry::Occupied(_) => packet.session_id = rand::random(),
                Entry::Vacant(slot) => {
                    if let Some(entry) = pending.take() {
                        slot.insert(entry);
                    }
                    break candidate;
                }
            }
        };

        let table = self.pending_packets.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some((_, pending)) = table.remove_if(&session_id, |_, p| p.token == token) {
                debug!(session_id, "封包請求超時");
                invoke(|| (pending.callback.into_inner())(None));
            }
        });

        if let Some(mut entry) = self.pending_packets.get_mut(&session_id) {
            if entry.token == token {
                entry.timer = Some(timer.abort_handle());
            }
        }

        self.publish(packet);
    }

    /// 發送請求並等待回覆，超時返回 None
    pub async fn request(&self, packet: Packet, expected: i32, timeout: Duration) -> Option<Packet> {
        let (tx, rx) = oneshot::channel();
        self.request_with(packet, expected, timeout, move |reply| {
            let _ = tx.send(reply);
        });
        rx.await.ok().flatten()
    }

    /// 發送消息並以回調接收回覆
    pub fn request_message_with<F>(&self, mut message: Message, timeout: Duration, callback: F)
    where
        F: FnOnce(Option<Message>) + Send + 'static,
    {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let mut pending = Some(PendingMessage {
            token,
            callback: Mutex::new(Box::new(callback)),
            timer: None,
        });

        let session_id = loop {
            let candidate = message.session_id;
            match self.pending_messages.entry(candidate) {
                Entry::Occupied(_) => message.session_id = rand::random(),
                Entry::Vacant(slot) => {
                    if let Some(entry) = pending.take() {
                        slot.insert(entry);
                    }
                    break candidate;
                }
            }
        };

        let table = self.pending_messages.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some((_, pending)) = table.remove_if(&session_id, |_, p| p.token == token) {
                debug!(session_id, "消息請求超時");
                invoke(|| (pending.callback.into_inner())(None));
            }
        });

        if let Some(mut entry) = self.pending_messages.get_mut(&session_id) {
            if entry.token == token {
                entry.timer = Some(timer.abort_handle());
            }
        }

        self.send_message(message);
    }

    pub async fn request_message(&self, message: Message, timeout: Duration) -> Option<Message> {
        let (tx, rx) = oneshot::channel();
        self.request_message_with(message, timeout, move |reply| {
            let _ = tx.send(reply);
        });
        rx.await.ok().flatten()
    }

    pub fn is_packet_pending(&self, session_id: i32) -> bool {
        self.pending_packets.contains_key(&session_id)
    }

    pub fn is_message_pending(&self, session_id: i32) -> bool {
        self.pending_messages.contains_key(&session_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending_packets.len() + self.pending_messages.len()
    }

    /// 停止重連並釋放傳輸資源；已排入的發布可能仍會完成或靜默失敗
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }

        if let Some(handle) = self.subscriber.lock().take() {
            handle.abort();
        }
        self.connected.send_replace(false);
        self.transport.close().await;
        info!("消息代理已關閉");
    }
}

/// 執行監聽器或回調，單一監聽器的 panic 不影響其他監聽器
fn invoke<F: FnOnce()>(f: F) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!("監聽器執行時發生 panic");
    }
}

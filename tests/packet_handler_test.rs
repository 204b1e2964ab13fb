mod common;

use cloud_server::cache::{cache_key, PLAYER_PREFIX};
use cloud_server::config::BrokerConfig;
use cloud_server::messaging::packets::{BEST_TEMPLATE_RESULT, SERVER_STARTED};
use cloud_server::messaging::{Broker, Envelope, Packet, PacketBody, PacketRegistry};
use cloud_server::server::{Server, ServerStatus};
use common::{wait_until, write_template, write_type, Fixture, WORKER_SCRIPT};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

async fn fleet() -> Fixture {
    Fixture::boot(
        |base| {
            write_type(base, "paper", false, WORKER_SCRIPT);
            write_type(base, "proxy", true, WORKER_SCRIPT);
            write_template(base, "Lobby", "paper", json!({ "maxPlayers": 10 }));
            write_template(base, "Proxy", "proxy", json!({ "maxPlayers": 100 }));
        },
        |_| {},
    )
    .await
}

async fn running_server(fx: &Fixture, template: &str) -> Arc<Server> {
    let servers = fx.cloud.servers();
    let server = servers
        .start_server(&servers.get_template(template).unwrap(), None)
        .await
        .unwrap()
        .unwrap();
    assert!(wait_until(Duration::from_secs(5), || server.status() == ServerStatus::Starting).await);

    fx.send_to_cloud(
        &server.name().to_lowercase(),
        PacketBody::ClientAuth {
            client_id: server.name().to_string(),
        },
    )
    .await;
    assert!(wait_until(Duration::from_secs(5), || server.status() == ServerStatus::Running).await);
    server
}

/// 與調度器共用傳輸層的客戶端
async fn client(fx: &Fixture, route: &str) -> Arc<Broker> {
    let config = BrokerConfig {
        main_route: route.to_string(),
        ..BrokerConfig::default()
    };
    let broker = Arc::new(Broker::new(
        &config,
        fx.transport.clone(),
        &[],
        Duration::from_millis(100),
    ));
    broker.start();
    broker.wait_connected().await;
    broker
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_player_connect_transfer_and_disconnect() {
    let fx = fleet().await;
    let proxy = running_server(&fx, "Proxy").await;
    let lobby = running_server(&fx, "Lobby").await;
    let players = fx.cloud.players();
    let uuid = Uuid::new_v4();

    fx.send_to_cloud(
        "proxy-1",
        PacketBody::PlayerConnect {
            player_name: "Steve".into(),
            uuid,
            ip_address: "10.0.0.7".into(),
            server: "Proxy-1".into(),
        },
    )
    .await;
    assert!(wait_until(Duration::from_secs(5), || proxy.has_player(&uuid)).await);

    let player = players.get_player_by_name("steve").unwrap();
    assert_eq!(player.uuid(), uuid);
    assert_eq!(player.address(), "10.0.0.7");
    assert_eq!(player.connected_network().unwrap().name(), "Proxy-1");
    assert!(player.connected_server().is_none());

    fx.send_to_cloud(
        "lobby-1",
        PacketBody::PlayerConnect {
            player_name: "Steve".into(),
            uuid,
            ip_address: "10.0.0.7".into(),
            server: "Lobby-1".into(),
        },
    )
    .await;
    assert!(wait_until(Duration::from_secs(5), || lobby.has_player(&uuid)).await);
    assert_eq!(player.connected_server().unwrap().name(), "Lobby-1");
    assert_eq!(players.player_count(), 1);

    fx.cloud.cache().flush().await;
    let cached = fx
        .cloud
        .cache()
        .get_raw(&cache_key(PLAYER_PREFIX, &uuid.to_string()))
        .await
        .unwrap()
        .unwrap();
    let document: serde_json::Value = serde_json::from_str(&cached).unwrap();
    assert_eq!(document["name"], "Steve");
    assert_eq!(document["network"], "Proxy-1");
    assert_eq!(document["server"], "Lobby-1");

    // 離開後端伺服器不代表離開網路
    fx.send_to_cloud(
        "lobby-1",
        PacketBody::PlayerDisconnect {
            uuid,
            server: "Lobby-1".into(),
        },
    )
    .await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(players.get_player(&uuid).is_some());

    fx.send_to_cloud(
        "proxy-1",
        PacketBody::PlayerDisconnect {
            uuid,
            server: "Proxy-1".into(),
        },
    )
    .await;
    assert!(wait_until(Duration::from_secs(5), || players.get_player(&uuid).is_none()).await);
    assert!(!proxy.has_player(&uuid));
    assert!(!lobby.has_player(&uuid));

    fx.cloud.cache().flush().await;
    let cached = fx
        .cloud
        .cache()
        .get_raw(&cache_key(PLAYER_PREFIX, &uuid.to_string()))
        .await
        .unwrap();
    assert!(cached.is_none());

    let names = fx.event_names();
    for expected in ["player_connect", "player_transfer", "player_disconnect"] {
        assert!(names.iter().any(|n| n == expected), "缺少事件 {}", expected);
    }

    fx.cloud.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_connect_and_disconnect_are_handled_in_order() {
    let fx = fleet().await;
    let proxy = running_server(&fx, "Proxy").await;
    let players = fx.cloud.players();

    for i in 0..300 {
        let uuid = Uuid::new_v4();
        fx.send_to_cloud(
            "proxy-1",
            PacketBody::PlayerConnect {
                player_name: format!("Player{}", i),
                uuid,
                ip_address: "10.0.0.9".into(),
                server: "Proxy-1".into(),
            },
        )
        .await;
        fx.send_to_cloud(
            "proxy-1",
            PacketBody::PlayerDisconnect {
                uuid,
                server: "Proxy-1".into(),
            },
        )
        .await;
    }

    // 最後一個玩家處理完畢時，前面的封包都已處理
    let last = Uuid::new_v4();
    fx.send_to_cloud(
        "proxy-1",
        PacketBody::PlayerConnect {
            player_name: "Last".into(),
            uuid: last,
            ip_address: "10.0.0.9".into(),
            server: "Proxy-1".into(),
        },
    )
    .await;
    assert!(wait_until(Duration::from_secs(10), || players.get_player(&last).is_some()).await);

    assert_eq!(players.player_count(), 1);
    assert_eq!(proxy.players(), vec![last]);

    fx.cloud.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_player_actions_go_through_proxy() {
    let fx = fleet().await;
    let _proxy = running_server(&fx, "Proxy").await;
    let uuid = Uuid::new_v4();
    let mut tap = fx.transport.tap();

    fx.send_to_cloud(
        "proxy-1",
        PacketBody::PlayerConnect {
            player_name: "Alex".into(),
            uuid,
            ip_address: "10.0.0.8".into(),
            server: "Proxy-1".into(),
        },
    )
    .await;
    assert!(wait_until(Duration::from_secs(5), || fx.cloud.players().get_player(&uuid).is_some()).await);

    let player = fx.cloud.players().get_player(&uuid).unwrap();
    player.disconnect("maintenance");

    let registry = PacketRegistry::with_defaults();
    let action = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let message = tap.recv().await.unwrap();
            if message.channel != "proxy-1" {
                continue;
            }
            if let Ok(Envelope::Packet(packet)) = Envelope::decode(&message.payload, &registry) {
                if let PacketBody::ServerAction { .. } = packet.body {
                    return packet;
                }
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(action.from, "cloud");
    assert_eq!(
        action.body,
        PacketBody::ServerAction {
            action: "PLAYER_KICK".into(),
            player_uuid: uuid.to_string(),
            extra_data: json!({ "reason": "maintenance" }),
        }
    );

    fx.cloud.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_best_template_request_replies_with_fullest_server() {
    let fx = fleet().await;
    let first = running_server(&fx, "Lobby").await;
    let second = running_server(&fx, "Lobby").await;
    for _ in 0..3 {
        second.add_player(Uuid::new_v4());
    }
    first.add_player(Uuid::new_v4());

    let proxy = client(&fx, "proxy-1").await;
    let reply = proxy
        .request(
            Packet::new(PacketBody::GetBestTemplate {
                template: "Lobby".into(),
            })
            .with_to("cloud"),
            BEST_TEMPLATE_RESULT,
            Duration::from_secs(2),
        )
        .await
        .unwrap();

    assert_eq!(
        reply.body,
        PacketBody::BestTemplateResult {
            server: "Lobby-2".into()
        }
    );
    assert_eq!(proxy.pending_count(), 0);

    // 未知模板不回覆，請求以超時結束
    let missing = proxy
        .request(
            Packet::new(PacketBody::GetBestTemplate {
                template: "Nope".into(),
            })
            .with_to("cloud"),
            BEST_TEMPLATE_RESULT,
            Duration::from_millis(300),
        )
        .await;
    assert!(missing.is_none());
    assert_eq!(proxy.pending_count(), 0);

    proxy.shutdown().await;
    fx.cloud.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_server_request_replies_with_name() {
    let fx = fleet().await;
    let proxy = client(&fx, "proxy-1").await;

    let reply = proxy
        .request(
            Packet::new(PacketBody::StartServer {
                template: "Lobby".into(),
            })
            .with_to("cloud"),
            SERVER_STARTED,
            Duration::from_secs(5),
        )
        .await
        .unwrap();

    assert_eq!(
        reply.body,
        PacketBody::ServerStarted {
            server: "Lobby-1".into()
        }
    );
    assert!(fx.cloud.servers().get_server("Lobby-1").is_some());

    proxy.shutdown().await;
    fx.cloud.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_status_change_is_applied_verbatim() {
    let fx = fleet().await;
    let lobby = running_server(&fx, "Lobby").await;

    fx.send_to_cloud(
        "lobby-1",
        PacketBody::ServerChangeStatus {
            server: "Lobby-1".into(),
            new_status: "IN_GAME".into(),
        },
    )
    .await;
    assert!(wait_until(Duration::from_secs(5), || lobby.status() == ServerStatus::InGame).await);

    fx.send_to_cloud(
        "lobby-1",
        PacketBody::ServerChangeStatus {
            server: "Lobby-1".into(),
            new_status: "BOGUS".into(),
        },
    )
    .await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(lobby.status(), ServerStatus::InGame);

    // IN_GAME 不是活躍狀態，但仍可被強制關閉
    fx.cloud.stop().await;
    assert!(lobby.has_exited());
}

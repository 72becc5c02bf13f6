use crate::{
    error::{AppError, Result},
    models::socket::*,
    services::message::MessageService,
};
use axum::extract::ws::{Message as WsMessage, WebSocket};
use chrono::{DateTime, Duration, Utc};
use futures::{sink::SinkExt, stream::StreamExt};
use parking_lot::RwLock;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const SWEEP_INTERVAL_SECS: u64 = 60;
const STALE_AFTER_SECS: i64 = 300;

/// WebSocket连接管理器
#[derive(Clone)]
pub struct WebSocketService {
    // 连接管理
    connections: Arc<RwLock<HashMap<String, ConnectionInfo>>>,
    // 用户到连接的映射
    user_connections: Arc<RwLock<HashMap<String, HashSet<String>>>>,
    // 房间订阅管理
    room_subscriptions: Arc<RwLock<HashMap<String, HashSet<String>>>>,
}

/// 连接信息
#[derive(Debug, Clone)]
struct ConnectionInfo {
    user_id: String,
    tx: mpsc::UnboundedSender<ServerEvent>,
    connected_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
    rooms: HashSet<String>,
}

impl WebSocketService {
    pub async fn new() -> Result<Self> {
        let service = Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            user_connections: Arc::new(RwLock::new(HashMap::new())),
            room_subscriptions: Arc::new(RwLock::new(HashMap::new())),
        };

        // 启动清理任务
        let sweeper = service.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(SWEEP_INTERVAL_SECS));
            loop {
                interval.tick().await;
                sweeper.sweep_stale(Duration::seconds(STALE_AFTER_SECS));
            }
        });

        Ok(service)
    }

    /// 处理新的WebSocket连接，直到客户端断开
    pub async fn handle_connection(&self, websocket: WebSocket, user_id: String, messages: MessageService) {
        let (connection_id, mut rx) = self.register(&user_id);
        info!("New WebSocket connection: {} for user: {}", connection_id, user_id);

        match messages.rooms_for(&user_id).await {
            Ok(rooms) => {
                self.join_rooms(&connection_id, rooms);
            }
            Err(e) => error!("Failed to compute rooms for {}: {}", user_id, e),
        }

        let (mut ws_tx, mut ws_rx) = websocket.split();

        // 处理发送消息任务
        let connection_id_clone = connection_id.clone();
        let mut send_task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match serde_json::to_string(&event) {
                    Ok(json_str) => {
                        if let Err(e) = ws_tx.send(WsMessage::Text(json_str)).await {
                            debug!("Failed to send WebSocket message: {}", e);
                            break;
                        }
                    }
                    Err(e) => error!("Failed to serialize event: {}", e),
                }
            }
            debug!("Send task ended for connection: {}", connection_id_clone);
        });

        // 处理接收消息任务
        let service = self.clone();
        let user_id_clone = user_id.clone();
        let connection_id_clone = connection_id.clone();
        let mut receive_task = tokio::spawn(async move {
            while let Some(msg_result) = ws_rx.next().await {
                service.touch(&connection_id_clone);
                match msg_result {
                    Ok(WsMessage::Text(text)) => {
                        service
                            .handle_incoming(&connection_id_clone, &user_id_clone, &text, &messages)
                            .await;
                    }
                    Ok(WsMessage::Close(_)) => {
                        info!("WebSocket connection closed: {}", connection_id_clone);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("WebSocket error for connection {}: {}", connection_id_clone, e);
                        break;
                    }
                }
            }
            debug!("Receive task ended for connection: {}", connection_id_clone);
        });

        // 任一方向结束即关闭连接
        tokio::select! {
            _ = &mut send_task => receive_task.abort(),
            _ = &mut receive_task => send_task.abort(),
        }

        self.unregister(&connection_id);
    }

    /// 处理客户端事件
    async fn handle_incoming(&self, connection_id: &str, user_id: &str, text: &str, messages: &MessageService) {
        let event: ClientEvent = match serde_json::from_str(text) {
            Ok(event) => event,
            Err(e) => {
                debug!("Invalid event from {}: {}", connection_id, e);
                self.send_or_log(connection_id, ServerEvent::error(format!("Invalid event: {}", e)));
                return;
            }
        };

        match event {
            ClientEvent::JoinRooms => match messages.rooms_for(user_id).await {
                Ok(rooms) => {
                    self.join_rooms(connection_id, rooms);
                }
                Err(e) => self.send_or_log(connection_id, ServerEvent::error(e.to_string())),
            },
            ClientEvent::SendMessage(payload) => {
                if let Err(e) = messages.deliver(user_id, payload, Some(connection_id)).await {
                    self.send_or_log(connection_id, ServerEvent::error(e.to_string()));
                }
            }
            ClientEvent::Ping => {
                self.send_or_log(connection_id, ServerEvent::Pong { timestamp: Utc::now() });
            }
        }
    }

    /// 注册新连接并发送连接确认
    pub fn register(&self, user_id: &str) -> (String, mpsc::UnboundedReceiver<ServerEvent>) {
        let connection_id = format!("conn_{}", uuid::Uuid::new_v4());
        let (tx, rx) = mpsc::unbounded_channel();
        let now = Utc::now();

        let _ = tx.send(ServerEvent::Connected {
            connection_id: connection_id.clone(),
            user_id: user_id.to_string(),
        });

        self.connections.write().insert(
            connection_id.clone(),
            ConnectionInfo {
                user_id: user_id.to_string(),
                tx,
                connected_at: now,
                last_seen_at: now,
                rooms: HashSet::new(),
            },
        );
        self.user_connections
            .write()
            .entry(user_id.to_string())
            .or_default()
            .insert(connection_id.clone());

        debug!("Registered connection: {} for user: {}", connection_id, user_id);
        (connection_id, rx)
    }

    /// 注销连接并清理房间订阅
    pub fn unregister(&self, connection_id: &str) {
        let Some(connection) = self.connections.write().remove(connection_id) else {
            return;
        };

        {
            let mut user_connections = self.user_connections.write();
            if let Some(user_conns) = user_connections.get_mut(&connection.user_id) {
                user_conns.remove(connection_id);
                if user_conns.is_empty() {
                    user_connections.remove(&connection.user_id);
                }
            }
        }

        {
            let mut room_subscriptions = self.room_subscriptions.write();
            for room in &connection.rooms {
                if let Some(subscribers) = room_subscriptions.get_mut(room) {
                    subscribers.remove(connection_id);
                    if subscribers.is_empty() {
                        room_subscriptions.remove(room);
                    }
                }
            }
        }

        info!(
            "Unregistered connection: {} for user: {} (open for {}s)",
            connection_id,
            connection.user_id,
            (Utc::now() - connection.connected_at).num_seconds()
        );
    }

    /// 加入房间并回复 `roomsJoined`
    pub fn join_rooms(&self, connection_id: &str, rooms: Vec<String>) -> Vec<String> {
        {
            let mut connections = self.connections.write();
            let Some(connection) = connections.get_mut(connection_id) else {
                return Vec::new();
            };
            connection.rooms.extend(rooms.iter().cloned());
        }
        {
            let mut room_subscriptions = self.room_subscriptions.write();
            for room in &rooms {
                room_subscriptions
                    .entry(room.clone())
                    .or_default()
                    .insert(connection_id.to_string());
            }
        }

        debug!("Connection {} joined {} rooms", connection_id, rooms.len());
        self.send_or_log(connection_id, ServerEvent::RoomsJoined { rooms: rooms.clone() });
        rooms
    }

    /// 把用户当前所有连接加入房间，不发送确认
    pub fn join_user(&self, user_id: &str, room: &str) {
        let connection_ids: Vec<String> = self
            .user_connections
            .read()
            .get(user_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        if connection_ids.is_empty() {
            return;
        }

        let mut connections = self.connections.write();
        let mut room_subscriptions = self.room_subscriptions.write();
        for connection_id in connection_ids {
            if let Some(connection) = connections.get_mut(&connection_id) {
                connection.rooms.insert(room.to_string());
                room_subscriptions
                    .entry(room.to_string())
                    .or_default()
                    .insert(connection_id);
            }
        }
    }

    /// 推送给房间内除 `except` 以外的连接，返回送达数量
    pub fn broadcast(&self, room: &str, event: ServerEvent, except: Option<&str>) -> usize {
        let subscribers: Vec<String> = self
            .room_subscriptions
            .read()
            .get(room)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();

        let connections = self.connections.read();
        let mut delivered = 0;
        for connection_id in subscribers.iter().filter(|id| Some(id.as_str()) != except) {
            if let Some(connection) = connections.get(connection_id) {
                if connection.tx.send(event.clone()).is_ok() {
                    delivered += 1;
                } else {
                    warn!("Failed to push to connection {}", connection_id);
                }
            }
        }

        debug!("Broadcast to room {} reached {} connections", room, delivered);
        delivered
    }

    /// 发送到指定连接
    pub fn send_to_connection(&self, connection_id: &str, event: ServerEvent) -> Result<()> {
        let connections = self.connections.read();
        let connection = connections
            .get(connection_id)
            .ok_or_else(|| AppError::NotFound(format!("Connection not found: {}", connection_id)))?;
        connection
            .tx
            .send(event)
            .map_err(|_| AppError::Internal("Connection send failed".to_string()))
    }

    fn send_or_log(&self, connection_id: &str, event: ServerEvent) {
        if let Err(e) = self.send_to_connection(connection_id, event) {
            warn!("Failed to send event to {}: {}", connection_id, e);
        }
    }

    fn touch(&self, connection_id: &str) {
        if let Some(connection) = self.connections.write().get_mut(connection_id) {
            connection.last_seen_at = Utc::now();
        }
    }

    /// 清理长时间无活动的连接
    pub fn sweep_stale(&self, max_idle: Duration) -> usize {
        let threshold = Utc::now() - max_idle;
        let stale: Vec<String> = self
            .connections
            .read()
            .iter()
            .filter(|(_, connection)| connection.last_seen_at < threshold || connection.tx.is_closed())
            .map(|(id, _)| id.clone())
            .collect();

        for connection_id in &stale {
            warn!("Cleaning up stale connection: {}", connection_id);
            self.unregister(connection_id);
        }
        stale.len()
    }

    pub fn rooms_of(&self, connection_id: &str) -> Vec<String> {
        let mut rooms: Vec<String> = self
            .connections
            .read()
            .get(connection_id)
            .map(|connection| connection.rooms.iter().cloned().collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }

    /// 获取在线统计
    pub fn stats(&self) -> RealtimeStats {
        RealtimeStats {
            total_connections: self.connections.read().len(),
            online_users: self.user_connections.read().len(),
            active_rooms: self.room_subscriptions.read().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_skips_the_sending_connection() {
        let hub = WebSocketService::new().await.unwrap();
        let (alice, mut alice_rx) = hub.register("alice");
        let (bob, mut bob_rx) = hub.register("bob");
        assert!(matches!(alice_rx.recv().await, Some(ServerEvent::Connected { .. })));
        assert!(matches!(bob_rx.recv().await, Some(ServerEvent::Connected { .. })));

        hub.join_rooms(&alice, vec!["alice_bob".into()]);
        hub.join_rooms(&bob, vec!["alice_bob".into()]);
        assert!(matches!(alice_rx.recv().await, Some(ServerEvent::RoomsJoined { .. })));
        assert!(matches!(bob_rx.recv().await, Some(ServerEvent::RoomsJoined { .. })));

        let delivered = hub.broadcast("alice_bob", ServerEvent::error("hello"), Some(&alice));
        assert_eq!(delivered, 1);
        assert!(matches!(bob_rx.recv().await, Some(ServerEvent::ErrorMessage { .. })));
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregister_clears_every_registry() {
        let hub = WebSocketService::new().await.unwrap();
        let (conn, _rx) = hub.register("alice");
        hub.join_rooms(&conn, vec!["a_b".into(), "a_c".into()]);
        assert_eq!(hub.rooms_of(&conn), vec!["a_b".to_string(), "a_c".to_string()]);
        assert_eq!(hub.stats().active_rooms, 2);

        hub.unregister(&conn);
        let stats = hub.stats();
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.online_users, 0);
        assert_eq!(stats.active_rooms, 0);
        assert_eq!(hub.broadcast("a_b", ServerEvent::error("x"), None), 0);
    }

    #[tokio::test]
    async fn sweep_drops_connections_whose_receiver_is_gone() {
        let hub = WebSocketService::new().await.unwrap();
        let (_kept, _rx) = hub.register("alice");
        let (_dropped, rx) = hub.register("bob");
        drop(rx);

        assert_eq!(hub.sweep_stale(Duration::seconds(STALE_AFTER_SECS)), 1);
        assert_eq!(hub.stats().total_connections, 1);
    }

    #[tokio::test]
    async fn join_user_adds_all_live_connections() {
        let hub = WebSocketService::new().await.unwrap();
        let (first, _rx1) = hub.register("alice");
        let (second, _rx2) = hub.register("alice");

        hub.join_user("alice", "alice_bob");
        hub.join_user("nobody", "alice_bob");
        assert_eq!(hub.rooms_of(&first), vec!["alice_bob".to_string()]);
        assert_eq!(hub.rooms_of(&second), vec!["alice_bob".to_string()]);
    }
}

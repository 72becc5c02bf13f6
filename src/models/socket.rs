use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::message::{Message, SendMessage};

/// 客户端发往服务端的事件
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// 重新加入所有关注对象的房间
    JoinRooms,
    SendMessage(SendMessage),
    Ping,
}

/// 服务端推送的事件
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    Connected {
        connection_id: String,
        user_id: String,
    },
    RoomsJoined {
        rooms: Vec<String>,
    },
    ReceiveMessage(Message),
    ErrorMessage {
        message: String,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::ErrorMessage {
            message: message.into(),
        }
    }
}

/// 在线统计
#[derive(Debug, Clone, Serialize)]
pub struct RealtimeStats {
    pub total_connections: usize,
    pub online_users: usize,
    pub active_rooms: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_events_use_the_event_envelope() {
        let event: ClientEvent = serde_json::from_value(json!({ "event": "joinRooms" })).unwrap();
        assert!(matches!(event, ClientEvent::JoinRooms));

        let event: ClientEvent = serde_json::from_value(json!({
            "event": "sendMessage",
            "data": { "roomId": "a_b", "sender": "a", "receiver": "b", "content": "hi" }
        }))
        .unwrap();
        match event {
            ClientEvent::SendMessage(payload) => assert_eq!(payload.room, "a_b"),
            other => panic!("unexpected event {:?}", other),
        }

        let unknown = serde_json::from_value::<ClientEvent>(json!({
            "event": "sendMessage",
            "data": { "room": "a_b", "sender": "a", "receiver": "b", "content": "hi", "extra": 1 }
        }));
        assert!(unknown.is_err());
    }

    #[test]
    fn server_events_serialize_with_camel_case_names() {
        let value = serde_json::to_value(ServerEvent::error("nope")).unwrap();
        assert_eq!(value, json!({ "event": "errorMessage", "data": { "message": "nope" } }));
    }
}

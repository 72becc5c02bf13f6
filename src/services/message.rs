use crate::{
    config::Config,
    error::{AppError, Result},
    models::{message::*, notification::FanOutAction, socket::ServerEvent, user::User},
    services::{
        database::{Database, PaginatedResult},
        notification::NotificationService,
        user::{ensure_not_blocked_by, UserService},
        websocket::WebSocketService,
    },
    store::{Condition, FieldOp, Query, StoreError},
};
use chrono::Utc;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;
use validator::Validate;

pub const MESSAGE_TABLE: &str = "message";
pub const CHAT_TABLE: &str = "chat";

/// 两个用户的房间号：排序后用 `_` 连接，与参数顺序无关
pub fn room_id(a: &str, b: &str) -> String {
    if a <= b {
        format!("{}_{}", a, b)
    } else {
        format!("{}_{}", b, a)
    }
}

fn is_participant(room: &str, user_id: &str) -> bool {
    room.split('_').any(|part| part == user_id)
}

/// 私信服务：持久化、推送与通知
#[derive(Clone)]
pub struct MessageService {
    db: Arc<Database>,
    config: Config,
    user_service: UserService,
    notification_service: NotificationService,
    hub: WebSocketService,
}

impl MessageService {
    pub async fn new(
        db: Arc<Database>,
        config: &Config,
        user_service: UserService,
        notification_service: NotificationService,
        hub: WebSocketService,
    ) -> Result<Self> {
        Ok(Self {
            db,
            config: config.clone(),
            user_service,
            notification_service,
            hub,
        })
    }

    /// 校验并保存消息；推送与通知由 [`MessageService::deliver`] 负责
    pub async fn send(&self, actor_id: &str, payload: SendMessage) -> Result<Message> {
        Ok(self.persist(actor_id, payload).await?.0)
    }

    async fn persist(&self, actor_id: &str, payload: SendMessage) -> Result<(Message, User)> {
        debug!("User {} sending message to room {}", actor_id, payload.room);
        payload.validate().map_err(AppError::ValidatorError)?;

        if payload.sender != actor_id {
            return Err(AppError::forbidden("Sender must be the authenticated user"));
        }
        if payload.sender == payload.receiver {
            return Err(AppError::bad_request("You cannot message yourself"));
        }
        if payload.room != room_id(&payload.sender, &payload.receiver) {
            return Err(AppError::bad_request("Room does not match the participants"));
        }

        let sender = self.user_service.require_active(&payload.sender).await?;
        let receiver = self.user_service.require_active(&payload.receiver).await?;
        if !sender.is_reachable() || !receiver.is_reachable() {
            return Err(AppError::forbidden("This conversation is not available"));
        }
        ensure_not_blocked_by(&receiver, &sender.id)?;
        if sender.has_blocked(&receiver.id) {
            return Err(AppError::forbidden("Unblock this user to send messages"));
        }

        let message = Message {
            id: Uuid::new_v4().to_string(),
            room: payload.room,
            sender: sender.id.clone(),
            receiver: receiver.id,
            content: payload.content,
            read: false,
            created_at: Utc::now(),
        };
        let message = self.db.create(MESSAGE_TABLE, message).await?;
        self.append_to_chat(&message).await?;

        Ok((message, sender))
    }

    /// 追加到会话；首次发送时创建会话
    async fn append_to_chat(&self, message: &Message) -> Result<()> {
        if self.push_chat_message(message).await? {
            return Ok(());
        }

        let now = Utc::now();
        let users: BTreeSet<String> = [message.sender.clone(), message.receiver.clone()].into();
        let chat = Chat {
            id: message.room.clone(),
            users: users.into_iter().collect(),
            messages: vec![message.id.clone()],
            created_at: now,
            updated_at: now,
        };
        match self.db.create(CHAT_TABLE, chat).await {
            Ok(_) => Ok(()),
            // 并发的首条消息已经创建了会话
            Err(AppError::Database(StoreError::Duplicate { .. })) => {
                self.push_chat_message(message).await.map(|_| ())
            }
            Err(e) => Err(e),
        }
    }

    /// 会话不存在时返回 `false`
    async fn push_chat_message(&self, message: &Message) -> Result<bool> {
        let chat = self
            .db
            .apply_ops::<Chat>(
                CHAT_TABLE,
                &message.room,
                vec![FieldOp::add_to_set("messages", message.id.as_str())],
            )
            .await?;
        Ok(chat.is_some())
    }

    /// 保存、推送给房间内其他连接，并把消息通知交给后台队列
    pub async fn deliver(&self, actor_id: &str, payload: SendMessage, origin: Option<&str>) -> Result<Message> {
        let (message, sender) = self.persist(actor_id, payload).await?;

        self.hub.join_user(&message.sender, &message.room);
        self.hub.join_user(&message.receiver, &message.room);
        let pushed = self
            .hub
            .broadcast(&message.room, ServerEvent::ReceiveMessage(message.clone()), origin);

        self.notification_service.enqueue(FanOutAction::Message {
            actor: sender.id,
            actor_name: sender.username,
            receiver: message.receiver.clone(),
            message: message.id.clone(),
        });

        info!("Message {} delivered to {} live connections", message.id, pushed);
        Ok(message)
    }

    /// 房间历史，仅参与者可读，最新的在前
    pub async fn history(
        &self,
        user_id: &str,
        room: &str,
        page: Option<usize>,
        limit: Option<usize>,
    ) -> Result<PaginatedResult<Message>> {
        if !is_participant(room, user_id) {
            return Err(AppError::forbidden("You are not a participant of this conversation"));
        }
        let (page, limit) = self.config.page_params(page, limit);

        self.db
            .paginate(
                Query::table(MESSAGE_TABLE).eq("room", room).sort_desc("created_at"),
                page,
                limit,
            )
            .await
    }

    /// 仅接收者可标记已读；重复调用结果相同
    pub async fn mark_as_read(&self, user_id: &str, message_id: &str) -> Result<Message> {
        let message: Message = self
            .db
            .get_by_id(MESSAGE_TABLE, message_id)
            .await?
            .ok_or_else(|| AppError::not_found("Message"))?;

        if message.receiver != user_id {
            return Err(AppError::forbidden("Only the receiver can mark a message as read"));
        }
        if message.read {
            return Ok(message);
        }

        self.db
            .update_by_id_with_json(MESSAGE_TABLE, message_id, json!({ "read": true }))
            .await?
            .ok_or_else(|| AppError::not_found("Message"))
    }

    /// 用户参与的会话，最近活跃的在前
    pub async fn list_chats(&self, user_id: &str) -> Result<Vec<Chat>> {
        self.db
            .find(
                &Query::table(CHAT_TABLE)
                    .filter(Condition::contains("users", user_id))
                    .sort_desc("updated_at"),
            )
            .await
    }

    /// 连接建立时加入的房间：关注对象以及已有会话
    pub async fn rooms_for(&self, user_id: &str) -> Result<Vec<String>> {
        let user = self.user_service.require_active(user_id).await?;

        let mut rooms: BTreeSet<String> = user
            .following
            .iter()
            .map(|followed| room_id(&user.id, followed))
            .collect();
        rooms.extend(self.list_chats(user_id).await?.into_iter().map(|chat| chat.id));

        Ok(rooms.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::RegisterRequest;
    use crate::services::{auth::AuthService, email::EmailService, notification::NOTIFICATION_TABLE};
    use crate::store::MemoryStore;
    use proptest::prelude::*;

    struct Fixture {
        db: Arc<Database>,
        users: UserService,
        hub: WebSocketService,
        messages: MessageService,
    }

    async fn setup() -> Fixture {
        let config = Config::default();
        let db = Arc::new(Database::with_store(Arc::new(MemoryStore::new()), &config));
        let auth = AuthService::new(&config).await.unwrap();
        let email = EmailService::new(&config).await.unwrap();
        let notifications = NotificationService::new(db.clone(), &config).await.unwrap();
        let users = UserService::new(db.clone(), &config, auth, email, notifications.clone())
            .await
            .unwrap();
        let hub = WebSocketService::new().await.unwrap();
        let messages = MessageService::new(db.clone(), &config, users.clone(), notifications, hub.clone())
            .await
            .unwrap();
        Fixture { db, users, hub, messages }
    }

    async fn register(users: &UserService, name: &str) -> User {
        users
            .register(RegisterRequest {
                full_name: format!("{} Tester", name),
                username: Some(name.to_string()),
                email: format!("{}@example.com", name),
                password: "password1".into(),
                confirm_password: "password1".into(),
                interests: Vec::new(),
                bio: None,
            })
            .await
            .unwrap()
    }

    fn payload(from: &User, to: &User, content: &str) -> SendMessage {
        SendMessage {
            room: room_id(&from.id, &to.id),
            sender: from.id.clone(),
            receiver: to.id.clone(),
            content: content.to_string(),
        }
    }

    proptest! {
        #[test]
        fn room_ids_are_symmetric(a in "[a-z0-9-]{1,36}", b in "[a-z0-9-]{1,36}") {
            prop_assert_eq!(room_id(&a, &b), room_id(&b, &a));
            prop_assert!(is_participant(&room_id(&a, &b), &a));
        }
    }

    #[tokio::test]
    async fn messages_are_durable_without_listeners() {
        let f = setup().await;
        let alice = register(&f.users, "alice").await;
        let bob = register(&f.users, "bob").await;

        let sent = f
            .messages
            .deliver(&alice.id, payload(&alice, &bob, "anyone there?"), None)
            .await
            .unwrap();

        let history = f.messages.history(&bob.id, &sent.room, None, None).await.unwrap();
        assert_eq!(history.total, 1);
        assert_eq!(history.data[0].content, "anyone there?");

        let chats = f.messages.list_chats(&alice.id).await.unwrap();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].messages, vec![sent.id.clone()]);

        // 消息通知由后台队列写入
        let mut stored = 0;
        for _ in 0..50 {
            stored = f
                .db
                .count(&Query::table(NOTIFICATION_TABLE).eq("recipient", bob.id.as_str()))
                .await
                .unwrap();
            if stored > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(stored, 1);
    }

    #[tokio::test]
    async fn live_room_members_receive_the_message() {
        let f = setup().await;
        let alice = register(&f.users, "alice").await;
        let bob = register(&f.users, "bob").await;
        let (_bob_conn, mut bob_rx) = f.hub.register(&bob.id);
        let _ = bob_rx.recv().await;

        f.messages
            .deliver(&alice.id, payload(&alice, &bob, "hi bob"), None)
            .await
            .unwrap();

        match bob_rx.recv().await {
            Some(ServerEvent::ReceiveMessage(message)) => assert_eq!(message.content, "hi bob"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn blocked_senders_write_nothing() {
        let f = setup().await;
        let alice = register(&f.users, "alice").await;
        let bob = register(&f.users, "bob").await;
        f.users.block_or_unblock(&bob.id, "alice").await.unwrap();

        let result = f
            .messages
            .deliver(&alice.id, payload(&alice, &bob, "let me in"), None)
            .await;
        assert!(matches!(result, Err(AppError::Authorization(_))));
        assert_eq!(f.db.count(&Query::table(MESSAGE_TABLE)).await.unwrap(), 0);
        assert_eq!(f.db.count(&Query::table(NOTIFICATION_TABLE)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn malformed_sends_are_rejected() {
        let f = setup().await;
        let alice = register(&f.users, "alice").await;
        let bob = register(&f.users, "bob").await;

        let mut wrong_room = payload(&alice, &bob, "hi");
        wrong_room.room = "somewhere_else".into();
        assert!(matches!(f.messages.send(&alice.id, wrong_room).await, Err(AppError::BadRequest(_))));

        let spoofed = payload(&bob, &alice, "hi");
        assert!(matches!(f.messages.send(&alice.id, spoofed).await, Err(AppError::Authorization(_))));

        let mut empty = payload(&alice, &bob, "hi");
        empty.content.clear();
        assert!(f.messages.send(&alice.id, empty).await.is_err());

        let mut to_self = payload(&alice, &bob, "hi");
        to_self.receiver = alice.id.clone();
        to_self.room = room_id(&alice.id, &alice.id);
        assert!(matches!(f.messages.send(&alice.id, to_self).await, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn only_the_receiver_marks_messages_read() {
        let f = setup().await;
        let alice = register(&f.users, "alice").await;
        let bob = register(&f.users, "bob").await;
        let sent = f.messages.send(&alice.id, payload(&alice, &bob, "ping")).await.unwrap();

        assert!(matches!(
            f.messages.mark_as_read(&alice.id, &sent.id).await,
            Err(AppError::Authorization(_))
        ));
        assert!(f.messages.mark_as_read(&bob.id, &sent.id).await.unwrap().read);
        assert!(f.messages.mark_as_read(&bob.id, &sent.id).await.unwrap().read);
        assert_eq!(f.db.count(&Query::table(MESSAGE_TABLE)).await.unwrap(), 1);

        assert!(matches!(
            f.messages.history("mallory", &sent.room, None, None).await,
            Err(AppError::Authorization(_))
        ));
    }
}

pub mod admin;
pub mod auth;
pub mod comment;
pub mod database;
pub mod email;
pub mod message;
pub mod notification;
pub mod publication;
pub mod search;
pub mod subscription;
pub mod user;
pub mod websocket;

// 重新导出常用类型
pub use admin::AdminService;
pub use auth::AuthService;
pub use comment::CommentService;
pub use database::Database;
pub use email::EmailService;
pub use message::MessageService;
pub use notification::NotificationService;
pub use publication::PublicationService;
pub use search::SearchService;
pub use subscription::SubscriptionService;
pub use user::UserService;
pub use websocket::WebSocketService;

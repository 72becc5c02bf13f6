pub mod admin;
pub mod comment;
pub mod message;
pub mod notification;
pub mod publication;
pub mod response;
pub mod search;
pub mod socket;
pub mod subscription;
pub mod user;

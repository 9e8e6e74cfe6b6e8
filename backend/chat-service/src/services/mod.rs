pub mod chat_service;
pub mod conversation_service;
pub mod encryption;
pub mod message_service;
pub mod notification_dispatch;

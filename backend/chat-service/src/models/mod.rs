pub mod conversation;
pub mod member;
pub mod message;

pub use conversation::{Conversation, ConversationType};
pub use member::MemberRole;
pub use message::{DeliveryState, MessageType, MessageView, ReplyPreview};

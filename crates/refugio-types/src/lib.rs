pub mod models;

pub use models::{
    ChatMessage, ChatThread, PresenceState, ThreadView, TimestampMs, UserProfile,
};

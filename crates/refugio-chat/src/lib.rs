pub mod config;
pub mod conversation;
pub mod directory;
pub mod error;
pub mod paths;
pub mod presence;
pub mod profiles;
pub mod session;
pub mod threads;

pub use config::ChatConfig;
pub use conversation::Conversations;
pub use directory::Directory;
pub use error::ChatError;
pub use presence::PresenceSignal;
pub use profiles::{ProfileCache, ProfileMap, ProfileSet};
pub use session::ChatSession;
pub use threads::{Inbox, ThreadAggregator};

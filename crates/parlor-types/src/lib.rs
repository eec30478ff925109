pub mod events;
pub mod models;

pub use events::{ChatEvent, ClientCommand};
pub use models::{PresenceRecord, PrivateMessage, PublicMessage};

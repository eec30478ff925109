pub mod auth;
pub mod connection;
pub mod error;
pub mod presence;
pub mod registry;
pub mod router;

pub use auth::{AuthError, Authenticator, JwtAuthenticator};
pub use error::ChatError;
pub use registry::ConnectionRegistry;
pub use router::MessageRouter;

pub mod error;
pub mod relay_client;
pub mod session;
pub mod user;

pub use error::ClientError;
pub use relay_client::RelayClient;
pub use session::{ChatSession, Exchange, SessionEvent, APOLOGY};
pub use user::UserContext;

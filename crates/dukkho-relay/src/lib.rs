pub mod server;

pub use server::{router, serve, RelayError};

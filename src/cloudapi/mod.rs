/// Cloud provider API client implementation.
pub mod client;
pub mod models;

pub use client::{CloudApi, Creds, KamateraClient, CREATE_SERVER_COMMAND_INFO};
pub use models::{CreateServerSpec, ServerInfo};

#[cfg(any(test, feature = "test-util"))]
pub use client::fake;

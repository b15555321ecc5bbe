//! Loopback redirect target for the authorization-code flow.
//!
//! Serves `/signin`, `/callback`, `/` and static assets on an ephemeral
//! port bound to the loopback interface, and settles one pending result per
//! server lifetime.

mod config;
mod http;
mod server;
mod target;

pub use config::LocalServerConfig;
pub use http::Settler;
pub use server::LoopbackServer;

pub(crate) use target::callback_uri;

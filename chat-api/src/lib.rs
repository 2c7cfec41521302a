pub mod auth;
pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod server;
pub mod websocket;

pub use server::{router, run};

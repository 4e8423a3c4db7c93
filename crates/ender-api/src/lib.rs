//! HTTP/JSON and WebSocket surface for ender-deploy
//!
//! Versioned REST routes under `/api/v1`, JWT authentication (bearer header
//! or cookie), and the live WebSocket routes the dashboard connects to.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod openapi;
pub mod router;
pub mod server;
pub mod state;

pub use auth::{create_token, verify_token, AuthState, AuthUser, Claims};
pub use config::Config;
pub use error::{ApiError, Result};
pub use openapi::ApiDoc;
pub use router::build_router;
pub use server::ApiServer;
pub use state::AppState;

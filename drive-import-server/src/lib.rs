//! HTTP interface for drive-import.
//!
//! Routes:
//!
//! - `POST /import-from-drive` start an import (200 when finished, 202 when continuing)
//! - `POST /import-from-drive-runner` accept a continuation payload (202)
//! - `POST /import-from-drive/item` execute one task synchronously
//! - `GET /import-from-drive/list` plan without executing
//! - `GET /import-from-drive-status` run progress and failures
//! - `GET /health`

pub mod auth;
pub mod error;
mod handlers;
mod server;

pub use auth::{JwtSessionVerifier, Session, SessionVerifier};
pub use error::{AppError, AppResult};
pub use server::{create_router, run_server, AppState};

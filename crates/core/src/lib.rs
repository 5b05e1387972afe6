#![warn(clippy::all, missing_docs)]

//! Core domain logic for the JMART marketplace client.
//!
//! This crate hosts the data models, configuration handling, backend
//! API client, session persistence, and the token-economy flows used
//! by the terminal UI and any future frontends.

pub mod api;
pub mod catalog;
pub mod config;
pub mod error;
pub mod exchange;
pub mod models;
pub mod notify;
pub mod purchase;
pub mod session;
pub mod upload;

pub use api::ApiClient;
pub use config::AppConfig;
pub use error::FlowError;
pub use models::{Category, Transaction, User, WasteItem};
pub use notify::BalanceNotifier;
pub use session::{Session, SessionStore};

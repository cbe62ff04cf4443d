//! # Session Module
//!
//! Client-side authenticated session: bearer token acquisition, persistence,
//! silent renewal and transparent retry of requests rejected with 401.
//!
//! ## Overview
//!
//! - [`TokenStore`] holds the access and refresh tokens with their expiries
//!   and mirrors them into the host secure store.
//! - [`SessionManager`] runs the token lifecycle (login, register, refresh,
//!   profile fetch, logout) and guarantees at most one refresh in flight.
//! - [`AuthGateway`] wraps API calls with the bearer token and one
//!   refresh-and-retry on 401.
//! - [`RouteGuard`] decides whether a navigation may proceed.
//!
//! ## Features
//!
//! - Single-flight token refresh shared by every concurrent caller
//! - Execution context (client or server) fixed at construction
//! - Token values never appear in logs or `Debug` output
//! - Session events published on the core event bus

pub mod error;
pub mod gateway;
pub mod guard;
pub mod session;
pub mod token_store;
pub mod types;

pub use error::{AuthError, Result};
pub use bridge_traits::http::FormData;
pub use gateway::{AuthGateway, RequestBody, RequestOptions};
pub use guard::RouteGuard;
pub use session::SessionManager;
pub use token_store::TokenStore;
pub use types::{
    LoginResponse, NavigationDecision, RegisterResult, Route, SessionPhase, TokenPair,
    UserProfile,
};

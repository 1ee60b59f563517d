//! Lifecycle engine for data-recovery requests.
//!
//! Users collect recovery strategies into a draft (their cart) and form it; a
//! moderator then completes or rejects it. Completing a request hands a
//! calculation to an external compute service without waiting for it, and the
//! service later reports the estimated recovery time back through an
//! authenticated callback.
//!
//! The pieces, leaves first:
//! - [`domain`]: identifiers, the [`Actor`], strategies, and the typestate
//!   [`Request`] machine with its transitions
//! - [`manager`]: the [`Storage`] trait, an in-memory store and (with the
//!   `postgres` feature) a PostgreSQL store
//! - [`estimate`]: the recovery-time formula
//! - [`dispatch`] and [`http`]: the bounded background sender
//! - [`callback`]: the inbound result handler
//! - [`desk`]: [`RecoveryDesk`], the guarded operations adapters call

pub mod callback;
pub mod config;
pub mod desk;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod estimate;
pub mod http;
pub mod manager;

// Re-export commonly used types
pub use callback::{CalculationResult, CallbackAck, CallbackHandler, SECRET_HEADER};
pub use config::SalvorConfig;
pub use desk::{RecoveryDesk, RequestView, ResolveAction};
pub use dispatch::{
    CalculationPayload, DispatchConfig, DispatchHandle, DispatchStats, Dispatcher,
};
pub use domain::request::*;
pub use domain::{Actor, Association, LineItem, Strategy, StrategyId, StrategyStatus, UserId};
pub use error::{ErrorKind, Result, SalvorError};
pub use http::{HttpClient, HttpResponse, MockHttpClient, ReqwestHttpClient};
#[cfg(feature = "postgres")]
pub use manager::postgres::PostgresStorage;
pub use manager::{CartBadge, InMemoryStorage, ListQuery, RequestFilter, Storage};

/// Get the salvor database migrator
///
/// Returns a migrator that can be run against a connection pool.
#[cfg(feature = "postgres")]
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

//! Core domain types for the recovery request system.
//!
//! This module contains pure domain types with no persistence dependencies:
//! - Actors (the authenticated caller, passed explicitly to every operation)
//! - Strategies from the externally managed catalog
//! - Request/strategy associations (the ledger rows)
//! - Request typestate machine

/// Declares a positive integer identifier newtype.
///
/// Identifiers are plain `BIGINT`s in storage. Parsing rejects anything that is
/// not a positive integer so adapters can turn path segments into ids directly.
macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        #[cfg_attr(feature = "postgres", derive(sqlx::Type))]
        #[cfg_attr(feature = "postgres", sqlx(transparent))]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                $name(id)
            }
        }

        impl std::ops::Deref for $name {
            type Target = i64;
            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl std::str::FromStr for $name {
            type Err = crate::error::SalvorError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s.trim().parse::<i64>() {
                    Ok(id) if id > 0 => Ok($name(id)),
                    _ => Err(crate::error::SalvorError::Validation(format!(
                        "invalid {} '{}'",
                        $label, s
                    ))),
                }
            }
        }
    };
}

pub mod association;
pub mod request;
pub mod strategy;
pub mod user;

pub use association::{Association, LineItem};
pub use strategy::{Strategy, StrategyId, StrategyStatus};
pub use user::{Actor, UserId};

//! Client-side workflows of a small to-do app: who is signed in, the records
//! that identity owns, and account registration.
//!
//! Durable state lives in an external identity provider and document store,
//! reached through [`authentication::IdentityProvider`] and
//! [`store::DocumentStore`]. SQLite and Firebase implementations are included.

pub mod authentication;
pub mod client;
pub mod config;
pub mod entities;
pub mod error;
pub mod firebase;
pub mod navigation;
pub mod records;
pub mod registration;
pub mod session;
pub mod store;
pub mod validation;

pub use client::TodoClient;
pub use entities::{Credentials, Identity, OwnerId, Record, RecordId};
pub use error::{AuthError, RecordsError, RegistrationError, StoreError, ValidationError};

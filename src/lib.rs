//! Shared grocery list client.
//!
//! The [`list::ListSynchronizer`] keeps a projection of one remote table in
//! step with the store, [`auth::AuthSession`] tracks who is signed in, and
//! [`ingredients`] turns recipe photos into new list entries.

pub mod auth;
pub mod config;
pub mod ingredients;
pub mod list;
pub mod store;

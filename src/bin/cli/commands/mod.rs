pub mod auth;
pub mod edit;
pub mod list;
pub mod scan;
pub mod watch;

pub mod auth;
pub mod reconcile;

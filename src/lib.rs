pub mod audit;
pub mod config;
pub mod error;
pub mod store;
pub mod validation;

// Membership lifecycle
pub mod member;

// Identity, credentials and capability checks
pub mod auth;
pub mod rbac;

// Outbound notices and the HTTP surface
pub mod api;
pub mod notify;

pub mod credentials;
pub mod middleware;
pub mod password;
pub mod token;

pub use credentials::{CredentialError, CredentialStore, LocalCredentialStore, PgCredentialStore};
pub use middleware::ActingMember;

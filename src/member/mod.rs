pub mod error;
pub mod groups;
pub mod lifecycle;
pub mod locks;
pub mod model;
pub mod query;
pub mod rules;
pub mod status;

pub use error::MemberError;
pub use lifecycle::{EngineSettings, LifecycleEngine};
pub use query::MemberQuery;
pub use status::Status;

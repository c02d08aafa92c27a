pub mod backup;
pub mod manager;
pub mod recovery;

pub use manager::{AuthorityError, AuthorityManager, AuthorityRole, WriteCapability};

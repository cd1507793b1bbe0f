pub mod entities;
mod seaorm;
mod store;

pub use seaorm::SeaOrmStore;
pub use store::{CredentialRecord, CredentialStore, StorageError, StorageResult};

mod token_storage;

pub use token_storage::{StorageError, TokenStorage, resolve_token};

#![forbid(unsafe_code)]

pub mod auth;
pub mod http;
pub mod memory;
pub mod repository;

pub use auth::{AuthContext, CredentialProvider};
pub use repository::{Storage, StorageError};

pub mod backend;
pub mod error;
mod models;
mod path;

pub use crate::backend::{BoxAsyncRead, Content, StorageBackend};
pub use crate::models::{Checksums, Credential, FileInfo, Properties};
pub use crate::path::{CACHE_PREFIX, is_reserved, validate as validate_path};
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;

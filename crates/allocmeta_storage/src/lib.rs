//! # allocmeta storage
//!
//! Storage backend trait and implementations for allocator context files.
//!
//! Each context file (segment context, allocator context, rebuild context)
//! is backed by one [`StorageBackend`]. Backends are **opaque byte stores**:
//! they hold one file image and never interpret it.
//!
//! ## Design Principles
//!
//! - A backend holds exactly one file image
//! - `write_all` replaces the whole image atomically
//! - No knowledge of context headers, sections or versions
//! - Must be `Send + Sync`; all methods take `&self`
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral state
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use allocmeta_storage::{StorageBackend, InMemoryBackend};
//!
//! let backend = InMemoryBackend::new();
//! backend.write_all(b"context image").unwrap();
//! assert_eq!(backend.read_all().unwrap(), b"context image");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;

//! Registries holding configuration submitted outside the primary source.
//!
//! - [`WriterRegistry`]: configuration identity to output destination
//! - [`DeclarativeConfigStore`]: identity to owned categories
//! - [`AttachmentRegistry`]: per-origin record of sink attachments, and the only
//!   component allowed to change attachments on the engine
//!
//! Each registry synchronizes its own mutators. None of them is ever called while
//! the coordinator's state lock is held.

pub mod attachment;
pub mod declarative;
pub mod writer;

pub use attachment::{AttachmentEntry, AttachmentRegistry};
pub use declarative::DeclarativeConfigStore;
pub use writer::WriterRegistry;

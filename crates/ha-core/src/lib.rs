//! Core identifiers for Home Assistant configuration
//!
//! Slug and entity id rules shared by the configuration pipeline, plus the
//! handful of constants every crate agrees on.

mod entity_id;
mod slug;

pub use entity_id::{split_entity_id, valid_entity_id, EntityId, EntityIdError};
pub use slug::{is_valid_slug, slugify};

/// Reserved top-level configuration key holding the core settings
pub const CORE_DOMAIN: &str = "homeassistant";

/// Version written to the `.HA_VERSION` marker of new config directories
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

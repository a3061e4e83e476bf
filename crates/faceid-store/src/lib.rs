//! faceid-store — Persistent gallery of named identities plus an
//! append-only action log, backed by SQLite.

mod schema;
pub mod store;

pub use store::{ActionKind, ActionLogEntry, GalleryStore, Identity, IdentitySummary, Stats, StoreError};

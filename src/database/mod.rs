pub mod memory;
pub mod models;
pub mod postgres;
pub mod record;
pub mod repository;
pub mod store;

pub use memory::MemoryStore;
pub use models::{DeletePolicy, KeyClaim, Principal, Resource, ResourceKind, Scope, UniqueKey};
pub use postgres::PgStore;
pub use record::{Record, RecordError};
pub use repository::{OwnerRef, RecordScope, Repository};
pub use store::{Storage, StoreError, Transaction};

pub mod kind;
pub mod principal;
pub mod resource;

pub use kind::{DeletePolicy, KeyClaim, LockRule, ResourceKind, Scope, UniqueKey};
pub use principal::Principal;
pub use resource::Resource;

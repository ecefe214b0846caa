pub mod auth_service;
pub mod resource_service;

pub use auth_service::AuthService;
pub use resource_service::{Page, ResourceService};

pub mod claims;
pub mod credentials;
pub mod error;
pub mod issuer;
pub mod revocation;

pub use claims::{Claims, Identity, PrincipalClaims, Session, TokenKind};
pub use error::AuthError;
pub use issuer::{TokenIssuer, TokenKeys};
pub use revocation::RevocationList;

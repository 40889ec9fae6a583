//! Identity and access: token claims, roles, permissions and shop accounts.
//!
//! Token *issuance* lives outside this system; this crate only validates
//! tokens and decides what a validated principal may do.

pub mod account;
pub mod authorize;
pub mod claims;
pub mod jwt;
pub mod permissions;
pub mod roles;

pub use account::{
    Account, AccountCommand, AccountEvent, AccountRole, ChangeRole, DeactivateAccount,
    RegisterAccount, UpdateProfile,
};
pub use authorize::{AuthzError, CommandAuthorization, Principal, authorize};
pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{Hs256JwtValidator, JwtValidator};
pub use permissions::Permission;
pub use roles::Role;

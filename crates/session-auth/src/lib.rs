//! Credential handling for the authenticated session layer
//!
//! Provides the credential store, the request authenticator, and the calls to
//! the token endpoints. This crate knows nothing about the refresh cycle; it
//! only knows how to obtain, persist, attach and revoke tokens.
//!
//! Credential flow:
//! 1. `token::login()` exchanges email + password for an access/refresh pair
//! 2. Pair stored via `CredentialStore::set()`
//! 3. `authenticator::authenticate()` stamps `Authorization: Bearer <access>`
//! 4. On 401, the refresh cycle calls `token::refresh_access()` and stores the
//!    new access token via `CredentialStore::set_access()`
//! 5. On logout or an unrecoverable refresh failure, `token::revoke()` is
//!    fired and the store is cleared

pub mod authenticator;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod token;

pub use authenticator::{RequestAuthenticator, stamp_bearer};
pub use constants::*;
pub use credentials::{
    CredentialPair, CredentialStore, FileCredentialStore, MemoryCredentialStore, UserIdentity,
};
pub use error::{Error, Result};
pub use token::{LoginResponse, RefreshResponse, login, refresh_access, revoke, signup};

//! Credentials and authentication flows

pub mod ceremony;
pub mod credentials;

pub use ceremony::{AuthClient, AuthEndpoints, CredentialCeremony};
pub use credentials::{CredentialPair, CredentialStore, CREDENTIALS_KEY};

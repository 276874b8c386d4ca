//! JSON Protocol Structs and representations for the registration and authentication
//! payloads a relying party receives from clients, plus the out of band metadata the
//! relying party supplies alongside them.

#![deny(warnings)]
#![warn(unused_extern_crates)]
#![warn(missing_docs)]

pub mod attest;
pub mod auth;
pub mod cose;
pub mod options;

pub use attest::*;
pub use auth::*;
pub use cose::*;
pub use options::*;

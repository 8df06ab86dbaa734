//! Core types shared by every kron crate.
//!
//! - **Identity**: [`ObjectKey`] and [`Uid`] address stored objects
//! - **Metadata**: [`ObjectMeta`] and [`OwnerReference`] carry the fields the
//!   reconciler and the stores agree on
//! - **Registry**: [`TypeRegistry`] resolves Rust types to API type descriptors
//! - **Errors**: [`Error`] and its [`ErrorKind`] classification drive retry policy

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod meta;
pub mod registry;
pub mod result;

pub use error::{Error, ErrorKind};
pub use meta::{ObjectKey, ObjectMeta, OwnerReference, Resource, Uid};
pub use registry::{TypeDescriptor, TypeRegistry, TypeRegistryBuilder};
pub use result::{Result, ResultExt};

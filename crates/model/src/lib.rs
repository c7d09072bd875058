//! An abstraction layer for chat-completion endpoints.
//!
//! This crate establishes an unified protocol for the conversation
//! engine to talk to a streaming chat-completion endpoint, so that the
//! engine can switch between endpoint implementations (a real HTTP
//! provider, a scripted fake) without modifying the core codebase.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to.

#![deny(missing_docs)]

mod error;
mod provider;
mod request;
mod response;

pub use error::*;
pub use provider::*;
pub use request::*;
pub use response::*;

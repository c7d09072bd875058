//! An out-of-the-box multi-agent assistant that assembles the
//! conversation engine, an OpenAI-compatible endpoint and a set of
//! domain tools.
//!
//! The crate includes a CLI tool for using in the terminal. And you can
//! also use it as a library to bring agent functionality into your own
//! host apps.

#![deny(missing_docs)]

pub mod tools;

/// Re-exports of [`parley_core`] crate.
pub mod core {
    pub use parley_core::*;
}

//! CORAL Core - Data Model Types
//!
//! Identifiers, documents, collection and index definitions, and the error
//! model shared by every other crate. This crate contains no storage or
//! network code.

// Core modules
mod identifiers;
mod tick;
mod document;
mod keygen;
mod collection;
mod index;
mod error;

// Re-export identifier types
pub use identifiers::*;

// Re-export the tick/revision generator
pub use tick::*;

// Re-export document helpers and reserved attribute names
pub use document::*;

// Re-export key generators
pub use keygen::*;

// Re-export collection definitions
pub use collection::*;

// Re-export index definitions
pub use index::*;

// Re-export error types
pub use error::*;

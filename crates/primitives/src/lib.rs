//! This crate contains the types, traits and pure functions shared by the coordinator and the
//! client: identifiers, round phases, fee and vsize accounting, ownership proofs, the request and
//! response messages, and the traits describing the coordinator API and the Bitcoin node it talks
//! to.
//!
//! Apart from the credential types it re-exports, this crate sits at the bottom of the workspace
//! hierarchy.

pub mod api;
pub mod coin;
pub mod constants;
pub mod errors;
pub mod fees;
pub mod ids;
pub mod messages;
pub mod node;
pub mod ownership;
pub mod phase;
pub mod round_state;
pub mod witness;

pub use wabisabi_credentials as credentials;

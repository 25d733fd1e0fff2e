//! This crate provides helpers for tests across the workspace: key and coin generation, and an
//! in-memory Bitcoin node.

pub mod bitcoin;
pub mod node;

//! Core domain: repository descriptors and the manifest grammar.

pub mod manifest;
pub mod repo;

//! Command modules - one file per CLI command

pub mod locales;
pub mod repos;
pub mod restore;

//! Core library for the nosh nutrition tracker: data model, input
//! validation, and the numeric integrity guard. Pure and synchronous —
//! persistence and sync live in the `nosh-client` crate.

pub mod integrity;
pub mod models;
pub mod validate;

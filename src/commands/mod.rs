//! Command implementations for the conformance-images CLI

pub mod check;
pub mod config;
pub mod images;

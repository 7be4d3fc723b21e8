//
// lib.rs
// dicomweb-static
//
// Exposes the crate's modules and re-exports the CLI entry point for both binary and library consumers.
//

// Public surface of the library: each module mirrors a CLI verb or shared utility.
pub mod archive;
pub mod cli;
pub mod codec;
pub mod dicom_access;
pub mod discover;
pub mod models;
pub mod render;
pub mod repair;
pub mod storage;

pub use cli::{run as run_cli, Cli, Commands};

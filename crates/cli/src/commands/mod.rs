//! Command handlers for the docsage CLI.

pub mod kb;

pub use kb::KbCommand;

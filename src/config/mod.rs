// src/config/mod.rs

//! Runtime settings for shellfleet.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a settings file from disk and apply environment overrides (`loader.rs`).
//! - Validate required values (`validate.rs`).
//!
//! The resulting [`Settings`] is built once at startup and passed explicitly
//! to everything that opens sessions; nothing reads configuration globally.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{
    CONNECTION_TIMEOUT_ENV, EXECUTION_TIMEOUT_ENV, apply_overrides, load_from_path, load_settings,
};
pub use model::{RawSettings, Settings};

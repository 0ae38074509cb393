//! HTTP request handlers, grouped by resource.

pub mod config;
pub mod models;
pub mod transcripts;
pub mod ui;

pub use self::config::*;
pub use self::models::*;
pub use self::transcripts::*;
pub use self::ui::*;

//! Command handlers and terminal rendering.

pub mod portfolio;
pub mod returns;
pub mod setup;
pub mod sync;
pub mod ui;

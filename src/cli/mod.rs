//! Command-line front end for the jmemos binary.

mod app;
mod main;

pub use app::*;
pub use main::*;

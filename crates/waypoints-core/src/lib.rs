pub mod build;
pub mod error;
pub mod format;
pub mod guard;
pub mod hook;
pub mod io;
pub mod orchestrator;
pub mod paths;
pub mod pattern;
pub mod profile;
pub mod settings;
pub mod state;
pub mod types;

pub use error::{Result, WaypointsError};

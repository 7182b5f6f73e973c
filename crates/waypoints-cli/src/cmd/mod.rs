pub mod detect;
pub mod hook;
pub mod install;
pub mod state;

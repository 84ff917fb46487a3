//! The module for the `cs-filetest` CLI commands.

mod run;

pub use self::run::*;

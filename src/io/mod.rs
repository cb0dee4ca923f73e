//! Terminal output helpers: exit codes and progress bars.

pub mod exit_code;
pub mod progress;

pub use exit_code::ExitCode;

//! Process exit codes.

/// Exit codes returned by the CLI.
///
/// A run that finishes with some `failed` records still exits with
/// `Success`; only a stage where every input failed is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    ConfigError = 2,
    /// Every input of some stage failed.
    BackendUnavailable = 3,
    /// Stopped by Ctrl-C or a cancellation token.
    Interrupted = 130,
}

impl ExitCode {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_success(self) -> bool {
        self == ExitCode::Success
    }

    pub fn description(self) -> &'static str {
        match self {
            ExitCode::Success => "success",
            ExitCode::GeneralError => "general error",
            ExitCode::ConfigError => "configuration error",
            ExitCode::BackendUnavailable => "backend unavailable for a whole stage",
            ExitCode::Interrupted => "interrupted",
        }
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code.code())
    }
}

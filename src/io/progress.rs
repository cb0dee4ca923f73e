//! Stage progress bars on stderr.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

/// Whether bars should be drawn: requested and stderr is a terminal.
pub fn enabled(requested: bool) -> bool {
    requested && is_terminal::is_terminal(std::io::stderr())
}

/// Bar for one stage, `None` when progress is disabled.
pub fn stage_bar(requested: bool) -> Option<ProgressBar> {
    if !enabled(requested) {
        return None;
    }
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} {msg:<9} [{elapsed_precise}] [{bar:30.cyan/blue}] {pos}/{len} ({per_sec}, {eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> "),
    );
    bar.set_draw_target(ProgressDrawTarget::stderr_with_hz(12));
    bar.enable_steady_tick(Duration::from_millis(120));
    Some(bar)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_when_not_requested() {
        assert!(!enabled(false));
        assert!(stage_bar(false).is_none());
    }
}

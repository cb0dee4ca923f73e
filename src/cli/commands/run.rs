//! Run command - chunk, then generate, in one invocation.

use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::io::ExitCode;
use crate::pipeline::Pipeline;

use super::{print_summary, report_error, resolve_backend};

pub async fn run(settings: Settings, force: bool, cancel: CancellationToken) -> ExitCode {
    let backend = match resolve_backend(&settings) {
        Ok(backend) => backend,
        Err(code) => return code,
    };
    let pipeline = Pipeline::new(settings, backend).with_cancellation(cancel);

    match pipeline.run(force).await {
        Ok(summary) => {
            print_summary(&summary);
            summary.exit_code()
        }
        Err(e) => report_error(&e),
    }
}

//! Generate command - run the selected stages over existing chunks.

use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::io::ExitCode;
use crate::pipeline::Pipeline;

use super::{print_summary, report_error, resolve_backend};

pub async fn run(settings: Settings, cancel: CancellationToken) -> ExitCode {
    let backend = match resolve_backend(&settings) {
        Ok(backend) => backend,
        Err(code) => return code,
    };
    let stages = settings.generation.stages.clone();
    let pipeline = Pipeline::new(settings, backend).with_cancellation(cancel);

    let chunks = match pipeline.load_chunks() {
        Ok(chunks) => chunks,
        Err(e) => return report_error(&e),
    };
    tracing::info!(target: "cli", "generating over {} chunks", chunks.len());

    match pipeline.run_stages(&chunks, &stages).await {
        Ok(summary) => {
            print_summary(&summary);
            summary.exit_code()
        }
        Err(e) => report_error(&e),
    }
}

//! Chunk command - build chunks.jsonl from the input directory.

use crate::config::Settings;
use crate::io::ExitCode;
use crate::pipeline::Pipeline;

use super::{report_error, resolve_backend};

pub fn run(settings: Settings, force: bool) -> ExitCode {
    let backend = match resolve_backend(&settings) {
        Ok(backend) => backend,
        Err(code) => return code,
    };
    let pipeline = Pipeline::new(settings, backend);

    match pipeline.prepare_chunks(force) {
        Ok(set) => {
            let path = pipeline.store().chunks_path();
            if set.reused {
                println!(
                    "Inputs unchanged, {} chunks already at {}",
                    set.chunks.len(),
                    path.display()
                );
            } else {
                println!("Wrote {} chunks to {}", set.chunks.len(), path.display());
            }
            if let Some(stats) = set.stats.as_ref().filter(|_| !set.reused) {
                println!(
                    "  pages: {} ({} too short), segments: {}, oversized: {}",
                    stats.pages, stats.empty_pages, stats.segments, stats.oversized
                );
                let rejected = &stats.rejected;
                println!(
                    "  rejected: {} (too short {}, too long {}, low density {}, unterminated {})",
                    rejected.total(),
                    rejected.too_short,
                    rejected.too_long,
                    rejected.low_density,
                    rejected.unterminated
                );
            }
            ExitCode::Success
        }
        Err(e) => report_error(&e),
    }
}

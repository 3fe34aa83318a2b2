use std::sync::Arc;

use anyhow::Context;
use stickers_core::{CompileOptions, Compiler, DispatchConfig, HttpManifestSource, SourceConfig};

use crate::cli::args::CompileArgs;
use crate::cli::console;
use crate::exit_codes;

pub async fn run(args: CompileArgs) -> anyhow::Result<i32> {
    let mut source_config = SourceConfig::from_env();
    if let Some(url) = &args.api_url {
        source_config = source_config.with_url(url.clone());
    }
    let source = HttpManifestSource::new(&source_config).context("creating manifest source")?;
    tracing::debug!(api_url = %source.base_url(), "manifest source");

    let dispatch = DispatchConfig::from_env()
        .with_concurrency(args.concurrency)
        .with_retries(args.retries);
    let options = CompileOptions::new(&args.input_file, &args.output_file)
        .with_cache_dir(&args.cache_dir)
        .with_dispatch(dispatch);

    let mut compiler = Compiler::new(options, Arc::new(source));
    if console::progress_enabled(args.no_progress) {
        compiler = compiler.with_progress(console::progress_sink());
    }

    let report = match compiler.compile().await {
        Ok(report) => report,
        Err(e) => {
            eprintln!("error: {}", e);
            return Ok(e.exit_code());
        }
    };

    console::print_summary(&report);

    if report.is_degraded() {
        Ok(exit_codes::DEGRADED)
    } else {
        Ok(exit_codes::SUCCESS)
    }
}

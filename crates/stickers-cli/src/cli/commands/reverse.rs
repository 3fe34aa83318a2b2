use anyhow::Context;
use stickers_core::reverse_document;

use crate::cli::args::ReverseArgs;
use crate::exit_codes;

pub async fn run(args: ReverseArgs) -> anyhow::Result<i32> {
    let text = tokio::fs::read_to_string(&args.input_file)
        .await
        .with_context(|| format!("reading {}", args.input_file.display()))?;

    let reversed = match reverse_document(&text) {
        Ok(reversed) => reversed,
        Err(e) => {
            eprintln!("error: {}", e);
            return Ok(e.exit_code());
        }
    };

    tokio::fs::write(&args.output_file, reversed)
        .await
        .with_context(|| format!("writing {}", args.output_file.display()))?;

    tracing::info!(output_file = %args.output_file.display(), "wrote reversed input");
    Ok(exit_codes::SUCCESS)
}

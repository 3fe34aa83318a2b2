use stickers_core::{check_deletions, count_artifact_entries, validate_document, CompileError};

use crate::cli::args::ValidateArgs;
use crate::exit_codes;

pub async fn run(args: ValidateArgs) -> anyhow::Result<i32> {
    let text = match tokio::fs::read_to_string(&args.input_file).await {
        Ok(text) => text,
        Err(e) => {
            let err = CompileError::Input {
                path: args.input_file.clone(),
                message: e.to_string(),
            };
            eprintln!("error: {}", err);
            return Ok(err.exit_code());
        }
    };

    let mut report = match validate_document(&text) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("error: {}", e);
            return Ok(exit_codes::FATAL);
        }
    };

    if let Some(baseline) = &args.baseline {
        match count_artifact_entries(baseline).await {
            Ok(published) => {
                if let Some(problem) = check_deletions(report.packs, published, args.max_deletions)
                {
                    report.diagnostics.push(problem);
                }
            }
            Err(e) => {
                eprintln!("error: baseline: {}", e);
                return Ok(exit_codes::FATAL);
            }
        }
    }

    if report.is_valid() {
        println!("{}: {} packs, OK", args.input_file.display(), report.packs);
        return Ok(exit_codes::SUCCESS);
    }

    eprintln!(
        "{}: {} problem(s) found",
        args.input_file.display(),
        report.diagnostics.len()
    );
    for diagnostic in &report.diagnostics {
        eprintln!("  - {}", diagnostic);
    }
    Ok(exit_codes::VALIDATION_FAILED)
}

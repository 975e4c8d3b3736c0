//! Command-line interface for forensically sound PDF redaction.
//!
//! ```text
//! pdf-redact <input.pdf> <output.pdf> --plan <plan.json> [--no-verify] [--quiet]
//! ```

use pdf_redact_core::core::{PdfDocument, RedactError};
use pdf_redact_core::redaction::{redact_with, PageStatus, RedactOptions, RedactionPlan};
use std::env;
use std::path::Path;
use std::process;

const EXIT_OK: i32 = 0;
const EXIT_INVALID_ARGS: i32 = 1;
const EXIT_INPUT_UNREADABLE: i32 = 2;
const EXIT_OUTPUT_UNWRITABLE: i32 = 3;
const EXIT_VERIFICATION_LEAK: i32 = 4;
const EXIT_PARSE_FAILURE: i32 = 5;

fn usage(program: &str) {
    eprintln!("PDF Redaction Tool");
    eprintln!(
        "Usage: {} <input.pdf> <output.pdf> --plan <plan.json> [options]",
        program
    );
    eprintln!("\nOptions:");
    eprintln!("  --plan <file>    Redaction plan (JSON; required unless --extract-text)");
    eprintln!("  --no-verify      Skip post-write verification");
    eprintln!("  --quiet          Suppress the report on stdout");
    eprintln!("  --parallel       Process pages on worker threads");
    eprintln!("  --extract-text   Print the input's text items and exit (debugging)");
}

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        usage(&args[0]);
        process::exit(EXIT_INVALID_ARGS);
    }

    let quiet = args.iter().any(|a| a == "--quiet");
    let no_verify = args.iter().any(|a| a == "--no-verify");
    let parallel = args.iter().any(|a| a == "--parallel");
    let extract_text = args.iter().any(|a| a == "--extract-text");

    let positional: Vec<&String> = args[1..]
        .iter()
        .enumerate()
        .filter(|(i, a)| {
            !a.starts_with("--")
                && !(*i > 0 && args[*i] == "--plan") // value of --plan
        })
        .map(|(_, a)| a)
        .collect();

    if extract_text {
        let Some(input) = positional.first() else {
            usage(&args[0]);
            process::exit(EXIT_INVALID_ARGS);
        };
        process::exit(run_extract_text(Path::new(input)));
    }

    let (Some(input), Some(output)) = (positional.first(), positional.get(1)) else {
        usage(&args[0]);
        process::exit(EXIT_INVALID_ARGS);
    };

    let plan_path = match args.iter().position(|a| a == "--plan") {
        Some(pos) if pos + 1 < args.len() => args[pos + 1].clone(),
        _ => {
            eprintln!("Error: --plan <plan.json> is required");
            process::exit(EXIT_INVALID_ARGS);
        }
    };

    let plan_text = match std::fs::read_to_string(&plan_path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("Error: cannot read plan {}: {}", plan_path, e);
            process::exit(EXIT_INVALID_ARGS);
        }
    };
    let mut plan: RedactionPlan = match serde_json::from_str(&plan_text) {
        Ok(plan) => plan,
        Err(e) => {
            eprintln!("Error: malformed plan {}: {}", plan_path, e);
            process::exit(EXIT_INVALID_ARGS);
        }
    };
    if no_verify {
        plan.verify_after = false;
    }

    let options = RedactOptions {
        parallel,
        cancel: None,
    };

    let report = match redact_with(Path::new(input), Path::new(output), &plan, &options) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(exit_code_for(&e));
        }
    };

    if !quiet {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{:?}", report),
        }
        for warning in &report.warnings {
            eprintln!("Warning: {}", warning);
        }
    }

    if report.success {
        process::exit(EXIT_OK);
    }
    let has_leaks = report.per_page.iter().any(|p| !p.leaks.is_empty());
    if has_leaks {
        eprintln!("Error: verification detected leaks; inspect the report");
        process::exit(EXIT_VERIFICATION_LEAK);
    }
    let failed = report
        .per_page
        .iter()
        .filter(|p| matches!(p.status, PageStatus::ParseFailure { .. }))
        .count();
    eprintln!("Error: {} page(s) failed to parse", failed);
    process::exit(EXIT_PARSE_FAILURE);
}

fn run_extract_text(input: &Path) -> i32 {
    let bytes = match std::fs::read(input) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Error: cannot read {}: {}", input.display(), e);
            return EXIT_INPUT_UNREADABLE;
        }
    };
    let mut doc = match PdfDocument::open(bytes) {
        Ok(doc) => doc,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_PARSE_FAILURE;
        }
    };
    for index in 0..doc.page_count() {
        let page = match doc.get_page(index) {
            Ok(page) => page,
            Err(e) => {
                eprintln!("Page {}: {}", index, e);
                continue;
            }
        };
        match page.extract_text(doc.xref_mut()) {
            Ok(items) => {
                println!("--- page {} ---", index);
                for item in items {
                    println!("({:8.2}, {:8.2}) {}", item.x, item.y, item.text);
                }
            }
            Err(e) => eprintln!("Page {}: {}", index, e),
        }
    }
    EXIT_OK
}

fn exit_code_for(error: &RedactError) -> i32 {
    match error {
        RedactError::InputUnreadable { .. } => EXIT_INPUT_UNREADABLE,
        RedactError::OutputUnwritable { .. } => EXIT_OUTPUT_UNWRITABLE,
        RedactError::InvalidCoordinate { .. } | RedactError::UnsupportedRotation { .. } => {
            EXIT_INVALID_ARGS
        }
        _ => EXIT_PARSE_FAILURE,
    }
}

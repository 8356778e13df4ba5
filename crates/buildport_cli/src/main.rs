use std::env;
use std::io;
use std::process::ExitCode;

use buildport_cli::{parse_args, run, DEFAULT_PORT, DEFAULT_RETRY_MS, DEFAULT_TIMEOUT_MS};

fn main() -> ExitCode {
    let args = env::args().skip(1).collect::<Vec<_>>();
    if args.is_empty() {
        eprintln!("{}", usage_text());
        return ExitCode::from(1);
    }

    let result = match parse_args(&args) {
        Ok(Some((options, kind))) => run(kind, options, &mut io::stdout()),
        Ok(None) => {
            println!("{}", usage_text());
            Ok(())
        }
        Err(message) => Err(message),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::from(1)
        }
    }
}

fn usage_text() -> String {
    let options = "[--port <u16>] [--timeout-ms <u64>] [--retry-ms <u64>] [--include-telemetry]";
    let mut lines = vec![
        "buildport_cli - deterministic buildport client".to_string(),
        String::new(),
        "Usage:".to_string(),
    ];
    for subcommand in [
        "wait-ready",
        "send <command...>",
        "script <file> [--barrier]",
        "barrier",
        "relay <json>",
        "place-rect <x> <y> <w> <h> <tile>",
        "clear-queue",
    ] {
        lines.push(format!("  buildport_cli {options} {subcommand}"));
    }
    lines.extend([
        String::new(),
        "Defaults:".to_string(),
        format!("  --port {DEFAULT_PORT}"),
        format!("  --timeout-ms {DEFAULT_TIMEOUT_MS}"),
        format!("  --retry-ms {DEFAULT_RETRY_MS}"),
    ]);
    lines.join("\n")
}

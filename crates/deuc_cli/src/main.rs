use std::io::Write;

use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, DecompileCommand, DecompileModeCli, TopLevel};

mod cli;

fn read_or_exit(path: &std::path::Path) -> Vec<u8> {
    match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("failed to read {path:?}: {e}");
            std::process::exit(1);
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Some(TopLevel::Decompile { command }) => match command {
            DecompileCommand::File {
                path,
                mode,
                class_name,
                class_id,
                symbols,
                no_switch,
                no_debug_comments,
            } => {
                let mode = match mode {
                    DecompileModeCli::Pseudo => deuc_lib::DecompileMode::Pseudo,
                    DecompileModeCli::Disasm => deuc_lib::DecompileMode::Disasm,
                    DecompileModeCli::Binary => deuc_lib::DecompileMode::Binary,
                };
                let symbols = match symbols {
                    Some(p) => {
                        let text = String::from_utf8_lossy(&read_or_exit(&p)).into_owned();
                        match deuc_lib::SymbolTable::parse(&text) {
                            Ok(t) => t,
                            Err(e) => {
                                eprintln!("bad symbol file {p:?}: {e}");
                                std::process::exit(1);
                            }
                        }
                    }
                    None => deuc_lib::SymbolTable::new(),
                };
                let bytes = read_or_exit(&path);
                let options = deuc_lib::DecompileOptions {
                    mode,
                    collapse_switches: !no_switch,
                    debug_comments: !no_debug_comments,
                    class_name,
                    class_id,
                };
                match deuc_lib::decompile_with(&bytes, &options, deuc_lib::NameTables::u8(), &symbols) {
                    Ok(out) => {
                        let mut stdout = std::io::stdout().lock();
                        if let Err(e) = stdout.write_all(&out).and_then(|_| stdout.flush()) {
                            eprintln!("failed to write output: {e}");
                            std::process::exit(1);
                        }
                    }
                    Err(e) => {
                        eprintln!("decompile error: {e}");
                        std::process::exit(1);
                    }
                }
            }
        },
        Some(TopLevel::Verify { path }) => {
            let bytes = read_or_exit(&path);
            match deuc_lib::verify_roundtrip(&bytes) {
                Ok(report) => {
                    for start in &report.mismatches {
                        println!("mismatch: function at 0x{start:04X}");
                    }
                    for (start, reason) in &report.failed {
                        println!("failed: function at 0x{start:04X}: {reason}");
                    }
                    println!(
                        "{} function(s) checked, {} mismatched, {} failed",
                        report.checked,
                        report.mismatches.len(),
                        report.failed.len()
                    );
                    if !report.is_exact() {
                        std::process::exit(2);
                    }
                }
                Err(e) => {
                    eprintln!("verify error: {e}");
                    std::process::exit(1);
                }
            }
        }
        Some(TopLevel::Completion { shell }) => {
            let mut cmd = Cli::command();
            let bin_name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, bin_name, &mut std::io::stdout());
        }
        None => {
            if let Err(e) = Cli::command().print_help() {
                eprintln!("{e}");
            }
        }
    }
}

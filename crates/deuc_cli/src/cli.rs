use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum, builder::{Styles, styling::{AnsiColor, Effects}}, crate_description, crate_name, crate_version};
use clap_complete::Shell;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DecompileModeCli {
    Pseudo,
    Disasm,
    Binary,
}

#[derive(Parser)]
#[command(name = crate_name!(),
    version = crate_version!(),
    about = crate_description!(),
    styles = Styles::styled()
        .header(AnsiColor::BrightGreen.on_default() | Effects::BOLD | Effects::UNDERLINE)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::BrightCyan.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Cyan.on_default()))]
pub struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Option<TopLevel>,
}

#[derive(Subcommand)]
pub enum TopLevel {
    /// Decompiles a usecode class record
    Decompile {
        #[command(subcommand)]
        command: DecompileCommand,
    },
    /// Re-encodes every function of a class record and compares it with the input
    Verify {
        /// Path to the usecode class record
        path: PathBuf,
    },
    /// Generate shell completion
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum DecompileCommand {
    /// Decompiles a usecode class record
    File {
        /// Path to the usecode class record
        path: PathBuf,

        /// Output mode
        #[arg(long, value_enum, default_value_t = DecompileModeCli::Pseudo)]
        mode: DecompileModeCli,

        /// Class name used in function names (default: taken from symbol info)
        #[arg(long)]
        class_name: Option<String>,

        /// Numeric class id used when no class name is known
        #[arg(long, value_parser = parse_number, default_value = "0")]
        class_id: u32,

        /// Debug symbol file with `offset size name` lines for globals
        #[arg(long)]
        symbols: Option<PathBuf>,

        /// Keep equality chains as plain conditionals
        #[arg(long, default_value_t = false)]
        no_switch: bool,

        /// Omit offsets, line numbers and symbol info from pseudocode
        #[arg(long, default_value_t = false)]
        no_debug_comments: bool,
    }
}

/// Accepts decimal or `0x` prefixed hex.
fn parse_number(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse::<u32>(),
    };
    parsed.map_err(|e| format!("invalid number {s:?}: {e}"))
}

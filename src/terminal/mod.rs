//! Terminal helpers: output sanitization, size detection and TTY checks.

pub mod ansi;
pub mod size;

pub use ansi::{AnsiFilter, filter_bytes, strip_unsafe};
pub use size::{SizeSource, TerminalSize};

use std::io::IsTerminal;

/// True when both stdin and stdout are attached to a terminal.
pub fn is_interactive() -> bool {
    std::io::stdin().is_terminal() && std::io::stdout().is_terminal()
}

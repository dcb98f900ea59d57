//! Host terminal geometry.

pub const DEFAULT_COLUMNS: u16 = 80;
pub const DEFAULT_LINES: u16 = 24;

/// How the size was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeSource {
    /// Queried from the controlling terminal.
    Tty,
    /// Inherited `COLUMNS`/`LINES`.
    Env,
    Default,
}

impl SizeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SizeSource::Tty => "tty",
            SizeSource::Env => "env",
            SizeSource::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSize {
    pub columns: u16,
    pub lines: u16,
    pub source: SizeSource,
}

impl TerminalSize {
    /// Detect from the terminal, then the environment, then 80x24.
    pub fn detect() -> Self {
        let tty = crossterm::terminal::size().ok();
        Self::resolve(
            tty,
            std::env::var("COLUMNS").ok().as_deref(),
            std::env::var("LINES").ok().as_deref(),
        )
    }

    pub fn resolve(tty: Option<(u16, u16)>, columns: Option<&str>, lines: Option<&str>) -> Self {
        if let Some((cols, rows)) = tty.filter(|(c, r)| *c > 0 && *r > 0) {
            return Self {
                columns: cols,
                lines: rows,
                source: SizeSource::Tty,
            };
        }

        let parse = |v: Option<&str>| v.and_then(|s| s.trim().parse::<u16>().ok()).filter(|n| *n > 0);
        if let (Some(cols), Some(rows)) = (parse(columns), parse(lines)) {
            return Self {
                columns: cols,
                lines: rows,
                source: SizeSource::Env,
            };
        }

        Self {
            columns: DEFAULT_COLUMNS,
            lines: DEFAULT_LINES,
            source: SizeSource::Default,
        }
    }
}

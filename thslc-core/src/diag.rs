use crate::line::Loc;

/// Sink for the non-fatal diagnostic kinds. Fatal errors do not pass through
/// here; they are `anyhow::Error` values formatted `file:line:col: message`
/// and propagate with `?` to the caller, which aborts the compilation.
pub struct Diagnostics {
    warnings_enabled: bool,
    warning_count: usize,
}

impl Diagnostics {
    pub fn new(warnings_enabled: bool) -> Self {
        Diagnostics {
            warnings_enabled,
            warning_count: 0,
        }
    }

    pub fn warning(&mut self, loc: &Loc, msg: impl AsRef<str>) {
        self.warning_count += 1;
        if self.warnings_enabled {
            log::warn!("{}: {}", loc, msg.as_ref());
        }
    }

    pub fn info(&self, loc: &Loc, msg: impl AsRef<str>) {
        log::info!("{}: {}", loc, msg.as_ref());
    }

    pub fn debug(&self, loc: &Loc, msg: impl AsRef<str>) {
        log::debug!("{}: {}", loc, msg.as_ref());
    }

    /// Number of warnings reported so far, including suppressed ones. The
    /// CLI uses this to upgrade warnings under `--soE`.
    pub fn warning_count(&self) -> usize {
        self.warning_count
    }
}

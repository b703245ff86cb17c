use std::path::PathBuf;

/// Shader stage the module is compiled for. Exactly one is selected per
/// compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Vertex,
    Fragment,
}

/// Knobs of a single compilation. A fresh `CompileOptions` is handed to
/// [`crate::Compiler::compile`]; nothing here is process-wide.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub stage: Stage,
    /// Include search paths, tried in order after the including file's own
    /// directory.
    pub include_dirs: Vec<PathBuf>,
    /// Predefined macros, name with optional replacement text.
    pub defines: Vec<(String, String)>,
    /// When false, warnings are swallowed by the diagnostics sink.
    pub warnings: bool,
    /// When true the caller treats any warning as a failed compile.
    pub stop_on_error: bool,
    /// Emit OpName debug instructions for functions, parameters and globals.
    pub debug_info: bool,
    /// The unsuffixed `float` keyword (and default vector/matrix component)
    /// is 64-bit instead of 32-bit.
    pub fp64_default: bool,
    /// Allow implicit numeric conversions; when false every mismatch is a
    /// fatal diagnostic.
    pub implicit_conversions: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            stage: Stage::Vertex,
            include_dirs: Vec::new(),
            defines: Vec::new(),
            warnings: true,
            stop_on_error: false,
            debug_info: false,
            fp64_default: false,
            implicit_conversions: true,
        }
    }
}

impl CompileOptions {
    /// Bit width of the default floating-point type.
    pub fn default_fp_bits(&self) -> u8 {
        if self.fp64_default {
            64
        } else {
            32
        }
    }
}

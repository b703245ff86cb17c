//! Line-oriented macro processor: `#include`, `#define`/`#undef`, nested
//! conditionals with a self-contained integer expression evaluator,
//! `#message`/`#error`, comment stripping and whole-word macro expansion.
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::bail;

use crate::diag::Diagnostics;
use crate::error::Result;
use crate::line::{Line, Loc};
use crate::opts::CompileOptions;

/// Iteration bound for fixpoint macro expansion; exceeding it means the
/// macro set is cyclic.
const MAX_EXPANSIONS: usize = 256;

#[derive(Debug, Clone)]
struct Macro {
    name: String,
    value: String,
}

pub struct Preprocessor<'a> {
    macros: Vec<Macro>,
    include_dirs: &'a [PathBuf],
    included: HashSet<PathBuf>,
    diags: &'a mut Diagnostics,
}

impl<'a> Preprocessor<'a> {
    /// Run the whole preprocessing phase: strip comments, resolve includes,
    /// apply directives and expand macros. The result is a directive-free
    /// line sequence ready for tokenization.
    pub fn run(
        source: &str,
        file: &str,
        opts: &'a CompileOptions,
        diags: &'a mut Diagnostics,
    ) -> Result<Vec<Line>> {
        let mut pp = Preprocessor {
            macros: opts
                .defines
                .iter()
                .map(|(name, value)| Macro {
                    name: name.clone(),
                    value: value.clone(),
                })
                .collect(),
            include_dirs: &opts.include_dirs,
            included: HashSet::new(),
            diags,
        };
        if let Ok(canonical) = fs::canonicalize(file) {
            pp.included.insert(canonical);
        }

        let file: Rc<str> = Rc::from(file);
        let code = strip_comments(source, &file)?;
        let mut lines = Line::split(&code, &file);
        pp.process(&mut lines)?;
        Ok(lines)
    }

    fn process(&mut self, lines: &mut Vec<Line>) -> Result<()> {
        let mut i = 0usize;
        while i < lines.len() {
            let trimmed = lines[i].text.trim_start();
            if let Some(rest) = trimmed.strip_prefix('#') {
                let (directive, rest) = split_word(rest);
                let directive = directive.to_owned();
                let rest = rest.to_owned();
                match directive.as_str() {
                    "include" => self.process_include(lines, i, &rest)?,
                    "define" => {
                        self.process_define(&lines[i], &rest);
                        lines.remove(i);
                    }
                    "undef" => {
                        self.process_undef(&lines[i], &rest);
                        lines.remove(i);
                    }
                    "if" | "ifdef" => self.process_if(lines, i)?,
                    "message" | "error" => {
                        self.process_message(&lines[i], &rest, directive == "error")?;
                        lines.remove(i);
                    }
                    "elif" | "else" | "endif" => {
                        bail!(
                            "{}: #{} without a matching #if",
                            lines[i].loc(1),
                            directive
                        );
                    }
                    _ => {
                        bail!("{}: unknown directive #{}", lines[i].loc(1), directive)
                    }
                }
            } else {
                let expanded = self.expand_macros(&lines[i].text, &lines[i].loc(1))?;
                lines[i].text = expanded;
                i += 1;
            }
        }
        Ok(())
    }

    fn find_file(&self, name: &str, including: &Path) -> Option<PathBuf> {
        let mut candidates = Vec::new();
        if let Some(dir) = including.parent() {
            candidates.push(dir.join(name));
        }
        for dir in self.include_dirs {
            candidates.push(dir.join(name));
        }
        candidates.into_iter().find(|p| p.is_file())
    }

    fn process_include(&mut self, lines: &mut Vec<Line>, i: usize, rest: &str) -> Result<()> {
        let line = lines[i].clone();
        let rest = rest.trim();
        let name = rest
            .strip_prefix('<')
            .and_then(|r| r.strip_suffix('>'))
            .ok_or_else(|| {
                anyhow::anyhow!("{}: invalid syntax, expected #include <path>", line.loc(1))
            })?;

        let path = match self.find_file(name, Path::new(&*line.file)) {
            Some(path) => path,
            None => bail!("{}: file \"{}\" not found", line.loc(1), name),
        };

        let canonical = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        if !self.included.insert(canonical) {
            self.diags
                .debug(&line.loc(1), format!("file \"{}\" has already been included", name));
            lines.remove(i);
            return Ok(());
        }

        let source = fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("{}: failed to read \"{}\": {}", line.loc(1), name, e))?;
        let file: Rc<str> = Rc::from(path.to_string_lossy().as_ref());
        let code = strip_comments(&source, &file)?;
        let included = Line::split(&code, &file);
        drop(lines.splice(i..=i, included));
        Ok(())
    }

    fn macro_index(&self, name: &str) -> Option<usize> {
        self.macros.iter().position(|m| m.name == name)
    }

    fn process_define(&mut self, line: &Line, rest: &str) {
        let (name, value) = split_word(rest.trim_start());
        if name.is_empty() {
            self.diags
                .warning(&line.loc(1), "invalid syntax, expected #define NAME [VALUE]");
            return;
        }
        let name = name.to_owned();
        let value = value.trim().to_owned();
        match self.macro_index(&name) {
            Some(index) => {
                self.diags
                    .warning(&line.loc(1), format!("macro redefinition \"{}\"", name));
                self.macros[index].value = value;
            }
            None => self.macros.push(Macro { name, value }),
        }
    }

    fn process_undef(&mut self, line: &Line, rest: &str) {
        let name = rest.trim();
        match self.macro_index(name) {
            Some(index) => {
                self.macros.remove(index);
            }
            None => self
                .diags
                .warning(&line.loc(1), format!("no macro \"{}\" is defined", name)),
        }
    }

    fn process_message(&mut self, line: &Line, rest: &str, error: bool) -> Result<()> {
        let rest = rest.trim();
        let message = rest
            .strip_prefix('"')
            .and_then(|r| r.strip_suffix('"'))
            .unwrap_or(rest);
        if error {
            bail!("{}: {}", line.loc(1), message);
        }
        self.diags.info(&line.loc(1), message);
        Ok(())
    }

    /// Resolve one `#if`/`#ifdef` region: locate the branch boundaries at
    /// this nesting level, evaluate conditions left to right, and splice the
    /// surviving branch body (if any) over the whole region.
    fn process_if(&mut self, lines: &mut Vec<Line>, i: usize) -> Result<()> {
        // Boundary indices at nesting level zero: the #if itself, every
        // #elif, at most one #else, and the #endif.
        let mut boundaries = vec![i];
        let mut endif = None;
        let mut depth = 0usize;
        for k in i + 1..lines.len() {
            let trimmed = lines[k].text.trim_start();
            let Some(rest) = trimmed.strip_prefix('#') else {
                continue;
            };
            let (directive, _) = split_word(rest);
            match directive {
                "if" | "ifdef" => depth += 1,
                "endif" if depth == 0 => {
                    boundaries.push(k);
                    endif = Some(k);
                    break;
                }
                "endif" => depth -= 1,
                "elif" | "else" if depth == 0 => boundaries.push(k),
                _ => {}
            }
        }
        let endif = match endif {
            Some(endif) => endif,
            None => bail!("{}: missing #endif directive", lines[i].loc(1)),
        };

        let mut surviving: Option<(usize, usize)> = None;
        for pair in boundaries.windows(2) {
            let (start, end) = (pair[0], pair[1]);
            let line = lines[start].clone();
            let trimmed = line.text.trim_start().strip_prefix('#').unwrap();
            let (directive, rest) = split_word(trimmed);
            let truthy = match directive {
                "if" | "elif" => self.eval_condition(rest, &line.loc(1))? != 0,
                "ifdef" => self.macro_index(rest.trim()).is_some(),
                "else" => true,
                _ => unreachable!(),
            };
            if truthy {
                surviving = Some((start + 1, end));
                break;
            }
        }

        let body = match surviving {
            Some((start, end)) => lines[start..end].to_vec(),
            None => Vec::new(),
        };
        drop(lines.splice(i..=endif, body));
        Ok(())
    }

    /// Whole-word replacement repeated until a fixed point.
    fn expand_macros(&self, text: &str, loc: &Loc) -> Result<String> {
        let mut current = text.to_owned();
        for _ in 0..MAX_EXPANSIONS {
            let next = self.expand_once(&current);
            if next == current {
                return Ok(current);
            }
            current = next;
        }
        bail!("{}: macro expansion does not terminate", loc);
    }

    fn expand_once(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let bytes = text.as_bytes();
        let mut i = 0usize;
        while i < bytes.len() {
            let c = bytes[i];
            if c == b'_' || c.is_ascii_alphabetic() {
                let mut end = i + 1;
                while end < bytes.len()
                    && (bytes[end] == b'_' || bytes[end].is_ascii_alphanumeric())
                {
                    end += 1;
                }
                let word = &text[i..end];
                match self.macros.iter().find(|m| m.name == word) {
                    Some(m) => out.push_str(&m.value),
                    None => out.push_str(word),
                }
                i = end;
            } else {
                out.push(c as char);
                i += 1;
            }
        }
        out
    }

    fn eval_condition(&self, expr: &str, loc: &Loc) -> Result<u64> {
        let tokens = cond::tokenize(expr, loc)?;
        let mut parser = cond::Parser::new(tokens, self, loc);
        let value = parser.parse_expr(0)?;
        parser.finish()?;
        Ok(value)
    }
}

fn split_word(s: &str) -> (&str, &str) {
    match s.find(|c: char| c.is_ascii_whitespace()) {
        Some(at) => (&s[..at], &s[at + 1..]),
        None => (s, ""),
    }
}

/// Remove `/* */` and `// ` comments. Block comments are replaced by the
/// newlines they contained so later diagnostics keep their line numbers.
pub fn strip_comments(code: &str, file: &Rc<str>) -> Result<String> {
    let mut out = String::with_capacity(code.len());
    let bytes = code.as_bytes();
    let mut i = 0usize;
    let mut line = 1u32;
    let mut col = 1u32;
    while i < bytes.len() {
        if bytes[i] == b'/' && i + 1 < bytes.len() && bytes[i + 1] == b'*' {
            let start = Loc {
                file: file.clone(),
                line,
                col,
            };
            let mut k = i + 2;
            loop {
                if k + 1 >= bytes.len() {
                    bail!("{}: block comment is missing its end", start);
                }
                if bytes[k] == b'*' && bytes[k + 1] == b'/' {
                    break;
                }
                if bytes[k] == b'\n' {
                    out.push('\n');
                    line += 1;
                    col = 1;
                }
                k += 1;
            }
            i = k + 2;
            continue;
        }
        if bytes[i] == b'/' && i + 1 < bytes.len() && bytes[i + 1] == b'/' {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }
        if bytes[i] == b'\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
        out.push(bytes[i] as char);
        i += 1;
    }
    Ok(out)
}

/// The conditional expression evaluator: a miniature tokenizer and
/// precedence-climbing parser over unsigned 64-bit integers.
mod cond {
    use anyhow::bail;

    use super::Preprocessor;
    use crate::error::Result;
    use crate::line::Loc;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Tok {
        Val(u64),
        Ident(String),
        ParenOpen,
        ParenClose,
        Not,
        BitNot,
        Mul,
        Div,
        Add,
        Sub,
        Shl,
        Shr,
        Lt,
        Le,
        Gt,
        Ge,
        Eq,
        Ne,
        BitAnd,
        BitXor,
        BitOr,
        And,
        Or,
    }

    pub fn tokenize(expr: &str, loc: &Loc) -> Result<Vec<Tok>> {
        let bytes = expr.as_bytes();
        let mut tokens = Vec::new();
        let mut i = 0usize;
        while i < bytes.len() {
            let c = bytes[i];
            let c1 = if i + 1 < bytes.len() { bytes[i + 1] } else { 0 };
            let (tok, len) = match (c, c1) {
                (b' ', _) | (b'\t', _) => {
                    i += 1;
                    continue;
                }
                (b'&', b'&') => (Tok::And, 2),
                (b'|', b'|') => (Tok::Or, 2),
                (b'=', b'=') => (Tok::Eq, 2),
                (b'!', b'=') => (Tok::Ne, 2),
                (b'<', b'<') => (Tok::Shl, 2),
                (b'>', b'>') => (Tok::Shr, 2),
                (b'<', b'=') => (Tok::Le, 2),
                (b'>', b'=') => (Tok::Ge, 2),
                (b'&', _) => (Tok::BitAnd, 1),
                (b'|', _) => (Tok::BitOr, 1),
                (b'^', _) => (Tok::BitXor, 1),
                (b'~', _) => (Tok::BitNot, 1),
                (b'!', _) => (Tok::Not, 1),
                (b'(', _) => (Tok::ParenOpen, 1),
                (b')', _) => (Tok::ParenClose, 1),
                (b'+', _) => (Tok::Add, 1),
                (b'-', _) => (Tok::Sub, 1),
                (b'*', _) => (Tok::Mul, 1),
                (b'/', _) => (Tok::Div, 1),
                (b'<', _) => (Tok::Lt, 1),
                (b'>', _) => (Tok::Gt, 1),
                _ if c.is_ascii_digit() => {
                    let mut end = i;
                    let radix = if c == b'0' && (c1 == b'x' || c1 == b'X') {
                        end += 2;
                        16
                    } else {
                        10
                    };
                    let start = end;
                    while end < bytes.len() && (bytes[end] as char).is_digit(radix) {
                        end += 1;
                    }
                    let value = u64::from_str_radix(&expr[start..end], radix).map_err(|_| {
                        anyhow::anyhow!("{}: bad integer in directive expression", loc)
                    })?;
                    tokens.push(Tok::Val(value));
                    i = end;
                    continue;
                }
                _ if c == b'_' || c.is_ascii_alphabetic() => {
                    let mut end = i + 1;
                    while end < bytes.len()
                        && (bytes[end] == b'_' || bytes[end].is_ascii_alphanumeric())
                    {
                        end += 1;
                    }
                    tokens.push(Tok::Ident(expr[i..end].to_owned()));
                    i = end;
                    continue;
                }
                _ => bail!(
                    "{}: unknown symbol \"{}\" in directive expression",
                    loc,
                    c as char
                ),
            };
            tokens.push(tok);
            i += len;
        }
        Ok(tokens)
    }

    fn prec(tok: &Tok) -> Option<u8> {
        let p = match tok {
            Tok::Mul | Tok::Div => 10,
            Tok::Add | Tok::Sub => 9,
            Tok::Shl | Tok::Shr => 8,
            Tok::Lt | Tok::Le | Tok::Gt | Tok::Ge => 7,
            Tok::Eq | Tok::Ne => 6,
            Tok::BitAnd => 5,
            Tok::BitXor => 4,
            Tok::BitOr => 3,
            Tok::And => 2,
            Tok::Or => 1,
            _ => return None,
        };
        Some(p)
    }

    pub struct Parser<'a, 'p> {
        tokens: Vec<Tok>,
        pos: usize,
        pp: &'a Preprocessor<'p>,
        loc: &'a Loc,
    }

    impl<'a, 'p> Parser<'a, 'p> {
        pub fn new(tokens: Vec<Tok>, pp: &'a Preprocessor<'p>, loc: &'a Loc) -> Self {
            Parser {
                tokens,
                pos: 0,
                pp,
                loc,
            }
        }

        fn peek(&self) -> Option<&Tok> {
            self.tokens.get(self.pos)
        }

        fn next(&mut self) -> Result<Tok> {
            let tok = self
                .tokens
                .get(self.pos)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("{}: directive expression ends abruptly", self.loc))?;
            self.pos += 1;
            Ok(tok)
        }

        pub fn finish(&self) -> Result<()> {
            if self.pos != self.tokens.len() {
                bail!("{}: trailing input in directive expression", self.loc);
            }
            Ok(())
        }

        pub fn parse_expr(&mut self, min_prec: u8) -> Result<u64> {
            let mut lhs = self.parse_unary()?;
            while let Some(p) = self.peek().and_then(prec) {
                if p < min_prec {
                    break;
                }
                let op = self.next()?;
                let rhs = self.parse_expr(p + 1)?;
                lhs = self.apply(&op, lhs, rhs)?;
            }
            Ok(lhs)
        }

        fn apply(&self, op: &Tok, lhs: u64, rhs: u64) -> Result<u64> {
            let value = match op {
                Tok::Mul => lhs.wrapping_mul(rhs),
                Tok::Div => {
                    if rhs == 0 {
                        bail!("{}: division by zero in directive expression", self.loc);
                    }
                    lhs / rhs
                }
                Tok::Add => lhs.wrapping_add(rhs),
                Tok::Sub => lhs.wrapping_sub(rhs),
                Tok::Shl => lhs.wrapping_shl(rhs as u32),
                Tok::Shr => lhs.wrapping_shr(rhs as u32),
                Tok::Lt => (lhs < rhs) as u64,
                Tok::Le => (lhs <= rhs) as u64,
                Tok::Gt => (lhs > rhs) as u64,
                Tok::Ge => (lhs >= rhs) as u64,
                Tok::Eq => (lhs == rhs) as u64,
                Tok::Ne => (lhs != rhs) as u64,
                Tok::BitAnd => lhs & rhs,
                Tok::BitXor => lhs ^ rhs,
                Tok::BitOr => lhs | rhs,
                Tok::And => (lhs != 0 && rhs != 0) as u64,
                Tok::Or => (lhs != 0 || rhs != 0) as u64,
                _ => unreachable!(),
            };
            Ok(value)
        }

        fn parse_unary(&mut self) -> Result<u64> {
            let tok = self.next()?;
            let value = match tok {
                Tok::Not => (self.parse_unary()? == 0) as u64,
                Tok::BitNot => !self.parse_unary()?,
                Tok::Sub => self.parse_unary()?.wrapping_neg(),
                Tok::ParenOpen => {
                    let value = self.parse_expr(0)?;
                    match self.next()? {
                        Tok::ParenClose => value,
                        _ => bail!("{}: missing closing parenthesis", self.loc),
                    }
                }
                Tok::Val(value) => value,
                Tok::Ident(name) if name == "defined" => {
                    match (self.next()?, self.next()?, self.next()?) {
                        (Tok::ParenOpen, Tok::Ident(name), Tok::ParenClose) => {
                            self.pp.macro_index(&name).is_some() as u64
                        }
                        _ => bail!("{}: expected defined(NAME)", self.loc),
                    }
                }
                Tok::Ident(name) => self.resolve_macro(&name)?,
                _ => bail!("{}: expected a value in directive expression", self.loc),
            };
            Ok(value)
        }

        /// A macro operand expands (through further macros) to text that
        /// must parse as a single integer literal.
        fn resolve_macro(&self, name: &str) -> Result<u64> {
            let index = self.pp.macro_index(name).ok_or_else(|| {
                anyhow::anyhow!("{}: unknown symbol \"{}\" in directive expression", self.loc, name)
            })?;
            let expanded = self.pp.expand_macros(&self.pp.macros[index].value, self.loc)?;
            let text = expanded.trim();
            let value = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
                u64::from_str_radix(hex, 16)
            } else {
                text.parse::<u64>()
            };
            value.map_err(|_| {
                anyhow::anyhow!(
                    "{}: macro \"{}\" ({}) does not define a numeric value",
                    self.loc,
                    name,
                    text
                )
            })
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::opts::CompileOptions;

    fn run(source: &str) -> Result<String> {
        run_with(source, CompileOptions::default())
    }

    fn run_with(source: &str, opts: CompileOptions) -> Result<String> {
        let mut diags = Diagnostics::new(true);
        let lines = Preprocessor::run(source, "test.thsl", &opts, &mut diags)?;
        Ok(lines
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n"))
    }

    #[test]
    fn test_comment_stripping_preserves_line_numbers() {
        let file: Rc<str> = Rc::from("test.thsl");
        let code = "a /* one\ntwo\nthree */ b // tail\nc";
        let out = strip_comments(code, &file).unwrap();
        assert_eq!(out, "a \n\n b \nc");
    }

    #[test]
    fn test_unterminated_block_comment_is_fatal() {
        let file: Rc<str> = Rc::from("test.thsl");
        assert!(strip_comments("ok /* nope", &file).is_err());
    }

    #[test]
    fn test_define_and_expand() {
        let out = run("#define W 800\nint w = W;").unwrap();
        assert_eq!(out, "int w = 800;");
    }

    #[test]
    fn test_expansion_is_whole_word() {
        let out = run("#define W 800\nint WW = W;").unwrap();
        assert_eq!(out, "int WW = 800;");
    }

    #[test]
    fn test_chained_expansion() {
        let out = run("#define A B\n#define B 3\nx = A;").unwrap();
        assert_eq!(out, "x = 3;");
    }

    #[test]
    fn test_recursive_expansion_is_fatal() {
        assert!(run("#define A A A\nx = A;").is_err());
    }

    #[test]
    fn test_undef() {
        let out = run("#define N 1\n#undef N\nN").unwrap();
        assert_eq!(out, "N");
    }

    #[test]
    fn test_if_arithmetic_selects_true_branch() {
        let out = run("#define N 3\n#if N*2 == 6\nTRUE\n#else\nFALSE\n#endif").unwrap();
        assert_eq!(out, "TRUE");
    }

    #[test]
    fn test_if_false_selects_else() {
        let out = run("#if 0\nA\n#else\nB\n#endif").unwrap();
        assert_eq!(out, "B");
    }

    #[test]
    fn test_elif_chain_left_to_right() {
        let out = run("#define N 2\n#if N == 1\nA\n#elif N == 2\nB\n#elif N == 2\nC\n#else\nD\n#endif")
            .unwrap();
        assert_eq!(out, "B");
    }

    #[test]
    fn test_no_branch_survives() {
        let out = run("keep\n#if 0\nA\n#elif 0\nB\n#endif\nalso").unwrap();
        assert_eq!(out, "keep\nalso");
    }

    #[test]
    fn test_nested_conditionals() {
        let out = run("#if 1\n#if 0\nA\n#else\nB\n#endif\n#else\nC\n#endif").unwrap();
        assert_eq!(out, "B");
    }

    #[test]
    fn test_ifdef_and_defined() {
        let out = run("#define X\n#ifdef X\nA\n#endif\n#if defined(X) && !defined(Y)\nB\n#endif")
            .unwrap();
        assert_eq!(out, "A\nB");
    }

    #[test]
    fn test_predefines_from_options() {
        let mut opts = CompileOptions::default();
        opts.defines.push(("DEBUG".to_owned(), String::new()));
        let out = run_with("#ifdef DEBUG\nyes\n#endif", opts).unwrap();
        assert_eq!(out, "yes");
    }

    #[test]
    fn test_operator_precedence_in_conditions() {
        let out = run("#if 1 + 2 * 3 == 7 && (1 | 2) == 3 && 1 << 4 == 16\nok\n#endif").unwrap();
        assert_eq!(out, "ok");
    }

    #[test]
    fn test_non_numeric_macro_in_condition_is_fatal() {
        assert!(run("#define S hello\n#if S\nx\n#endif").is_err());
    }

    #[test]
    fn test_missing_endif_is_fatal() {
        assert!(run("#if 1\nx").is_err());
    }

    #[test]
    fn test_error_directive_is_fatal() {
        assert!(run("#error \"boom\"").is_err());
    }

    #[test]
    fn test_message_directive_is_removed() {
        let out = run("#message \"hello\"\nx").unwrap();
        assert_eq!(out, "x");
    }

    #[test]
    fn test_include_and_dedup() {
        let dir = tempfile::tempdir().unwrap();
        let header = dir.path().join("common.thsl");
        fs::write(&header, "#define PI 3\nshared").unwrap();

        let main = dir.path().join("main.thsl");
        fs::write(
            &main,
            "#include <common.thsl>\n#include <common.thsl>\nPI",
        )
        .unwrap();

        let mut opts = CompileOptions::default();
        opts.include_dirs.push(dir.path().to_owned());
        let source = fs::read_to_string(&main).unwrap();
        let mut diags = Diagnostics::new(true);
        let lines =
            Preprocessor::run(&source, main.to_str().unwrap(), &opts, &mut diags).unwrap();
        let text = lines
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        assert_eq!(text, "shared\n3");
    }

    #[test]
    fn test_missing_include_is_fatal() {
        assert!(run("#include <nope.thsl>").is_err());
    }

    #[test]
    fn test_idempotence_on_preprocessed_output() {
        let once = run("#define N 2\n#if N == 2\nint x = N;\n#endif\nint y;").unwrap();
        let twice = run(&once).unwrap();
        assert_eq!(once, twice);
    }
}

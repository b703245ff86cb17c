//! Character-level scanner turning preprocessed lines into tokens.
use anyhow::bail;

use crate::error::Result;
use crate::line::Line;
use crate::token::{keyword, Literal, Token, TokenKind};

/// Tokenize preprocessed lines. Two post-passes run over the raw stream:
/// identifier tokens matching the reserved-word table are rewritten into
/// their keyword kinds, and a leading `-` is reclassified as unary negate
/// when its left neighbor does not end an operand.
pub fn tokenize(lines: &[Line], fp_bits: u8) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    for line in lines {
        scan_line(line, &mut tokens)?;
    }

    for tok in tokens.iter_mut() {
        if tok.kind == TokenKind::Name {
            if let Some(kind) = keyword(&tok.lexeme, fp_bits) {
                tok.kind = kind;
            }
        }
    }
    for i in 0..tokens.len() {
        if tokens[i].kind == TokenKind::Sub {
            let negate = i == 0 || !tokens[i - 1].kind.ends_operand();
            if negate {
                tokens[i].kind = TokenKind::Negate;
            }
        }
    }

    Ok(tokens)
}

fn is_name_char(c: u8, first: bool) -> bool {
    c == b'_' || c.is_ascii_alphabetic() || (!first && c.is_ascii_digit())
}

fn scan_line(line: &Line, tokens: &mut Vec<Token>) -> Result<()> {
    let bytes = line.text.as_bytes();
    let mut j = 0usize;

    let mut push = |kind: TokenKind, lexeme: &str, col: usize| {
        tokens.push(Token {
            kind,
            lexeme: lexeme.to_owned(),
            loc: line.loc(col as u32 + 1),
        });
    };

    while j < bytes.len() {
        let c0 = bytes[j];
        let c1 = if j + 1 < bytes.len() { bytes[j + 1] } else { 0 };

        if c0 == b' ' || c0 == b'\t' {
            j += 1;
            continue;
        }

        let two = match (c0, c1) {
            (b'+', b'+') => Some((TokenKind::Increment, "++")),
            (b'-', b'-') => Some((TokenKind::Decrement, "--")),
            (b'+', b'=') => Some((TokenKind::AddAssign, "+=")),
            (b'-', b'=') => Some((TokenKind::SubAssign, "-=")),
            (b'*', b'=') => Some((TokenKind::MulAssign, "*=")),
            (b'/', b'=') => Some((TokenKind::DivAssign, "/=")),
            (b'<', b'<') => Some((TokenKind::Shl, "<<")),
            (b'>', b'>') => Some((TokenKind::Shr, ">>")),
            (b'<', b'=') => Some((TokenKind::Le, "<=")),
            (b'>', b'=') => Some((TokenKind::Ge, ">=")),
            (b'&', b'&') => Some((TokenKind::LogicalAnd, "&&")),
            (b'|', b'|') => Some((TokenKind::LogicalOr, "||")),
            (b'=', b'=') => Some((TokenKind::EqEq, "==")),
            (b'!', b'=') => Some((TokenKind::Ne, "!=")),
            _ => None,
        };
        if let Some((kind, lexeme)) = two {
            push(kind, lexeme, j);
            j += 2;
            continue;
        }

        let one = match c0 {
            b'(' => Some((TokenKind::ParenOpen, "(")),
            b')' => Some((TokenKind::ParenClose, ")")),
            b'{' => Some((TokenKind::BraceOpen, "{")),
            b'}' => Some((TokenKind::BraceClose, "}")),
            b'[' => Some((TokenKind::BracketOpen, "[")),
            b']' => Some((TokenKind::BracketClose, "]")),
            b';' => Some((TokenKind::Semicolon, ";")),
            b',' => Some((TokenKind::Comma, ",")),
            b'+' => Some((TokenKind::Add, "+")),
            b'-' => Some((TokenKind::Sub, "-")),
            b'*' => Some((TokenKind::Mul, "*")),
            b'/' => Some((TokenKind::Div, "/")),
            b'<' => Some((TokenKind::Lt, "<")),
            b'>' => Some((TokenKind::Gt, ">")),
            b'!' => Some((TokenKind::LogicalNot, "!")),
            b'&' => Some((TokenKind::BitAnd, "&")),
            b'|' => Some((TokenKind::BitOr, "|")),
            b'~' => Some((TokenKind::BitNot, "~")),
            b'^' => Some((TokenKind::BitXor, "^")),
            b'?' => Some((TokenKind::Question, "?")),
            b':' => Some((TokenKind::Colon, ":")),
            b'.' => Some((TokenKind::Selector, ".")),
            b'=' => Some((TokenKind::Assign, "=")),
            _ => None,
        };
        if let Some((kind, lexeme)) = one {
            push(kind, lexeme, j);
            j += 1;
            continue;
        }

        if c0.is_ascii_digit() {
            let (lit, len) = scan_number(line, bytes, j)?;
            let lexeme = &line.text[j..j + len];
            push(TokenKind::Value(lit), lexeme, j);
            j += len;
            continue;
        }

        if is_name_char(c0, true) {
            let mut end = j;
            while end < bytes.len() && is_name_char(bytes[end], end == j) {
                end += 1;
            }
            push(TokenKind::Name, &line.text[j..end], j);
            j = end;
            continue;
        }

        bail!("{}: unexpected character \"{}\"", line.loc(j as u32 + 1), c0 as char);
    }

    Ok(())
}

/// Scan a numeric literal starting at `j`. Base 10, hex `0x`, octal `0`,
/// binary `0b`; a decimal point or exponent makes it a float. Integer
/// literals are signed unless their value exceeds `i32::MAX`.
fn scan_number(line: &Line, bytes: &[u8], j: usize) -> Result<(Literal, usize)> {
    let text = &line.text;
    let loc = line.loc(j as u32 + 1);

    if bytes[j] == b'0' && j + 1 < bytes.len() {
        let radix = match bytes[j + 1] {
            b'x' | b'X' => Some((16u32, 2usize)),
            b'b' | b'B' => Some((2, 2)),
            c if c.is_ascii_digit() => Some((8, 1)),
            _ => None,
        };
        if let Some((radix, skip)) = radix {
            let start = j + skip;
            let mut end = start;
            while end < bytes.len() && (bytes[end] as char).is_digit(16) {
                end += 1;
            }
            if end == start {
                bail!("{}: bad numeric literal \"{}\"", loc, &text[j..end]);
            }
            let value = u64::from_str_radix(&text[start..end], radix)
                .map_err(|_| anyhow::anyhow!("{}: bad numeric literal \"{}\"", loc, &text[j..end]))?;
            let lit = Literal::Int {
                value,
                signed: value <= i32::MAX as u64,
            };
            return Ok((lit, end - j));
        }
    }

    let mut end = j;
    let mut is_float = false;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        is_float = true;
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        is_float = true;
        end += 1;
        if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
            end += 1;
        }
        let exp_start = end;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        if end == exp_start {
            bail!("{}: bad numeric literal \"{}\"", loc, &text[j..end]);
        }
    }

    let lexeme = &text[j..end];
    let lit = if is_float {
        let value = lexeme
            .parse::<f64>()
            .map_err(|_| anyhow::anyhow!("{}: bad numeric literal \"{}\"", loc, lexeme))?;
        Literal::Float(value)
    } else {
        let value = lexeme
            .parse::<u64>()
            .map_err(|_| anyhow::anyhow!("{}: bad numeric literal \"{}\"", loc, lexeme))?;
        Literal::Int {
            value,
            signed: value <= i32::MAX as u64,
        }
    };
    Ok((lit, end - j))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::rc::Rc;

    fn toks(code: &str) -> Vec<Token> {
        let file: Rc<str> = Rc::from("test.thsl");
        let lines = Line::split(code, &file);
        tokenize(&lines, 32).unwrap()
    }

    #[test]
    fn test_punctuation_and_operators() {
        let tokens = toks("a += b << 2;");
        let kinds = tokens.iter().map(|t| t.kind).collect::<Vec<_>>();
        assert_eq!(
            kinds,
            [
                TokenKind::Name,
                TokenKind::AddAssign,
                TokenKind::Name,
                TokenKind::Shl,
                TokenKind::Value(Literal::Int {
                    value: 2,
                    signed: true
                }),
                TokenKind::Semicolon,
            ]
        );
    }

    #[test]
    fn test_longest_match() {
        let tokens = toks("a<<=b");
        // "<<" wins over "<", then "=".
        let kinds = tokens.iter().map(|t| t.kind).collect::<Vec<_>>();
        assert_eq!(
            kinds,
            [
                TokenKind::Name,
                TokenKind::Shl,
                TokenKind::Assign,
                TokenKind::Name
            ]
        );
    }

    #[test]
    fn test_numeric_bases() {
        let tokens = toks("10 0x1F 010 0b101");
        let values = tokens
            .iter()
            .map(|t| match t.kind {
                TokenKind::Value(Literal::Int { value, .. }) => value,
                _ => panic!("unexpected token: {:?}", t),
            })
            .collect::<Vec<_>>();
        assert_eq!(values, [10, 31, 8, 5]);
    }

    #[test]
    fn test_unsigned_boundary_literal() {
        let tokens = toks("0xFFFFFFFF");
        match tokens[0].kind {
            TokenKind::Value(Literal::Int { value, signed }) => {
                assert_eq!(value, 0xFFFF_FFFF);
                assert!(!signed);
            }
            _ => panic!("unexpected token: {:?}", tokens[0]),
        }
    }

    #[test]
    fn test_floats() {
        let tokens = toks("1.5 2. 3e2 4.0e-1");
        let values = tokens
            .iter()
            .map(|t| match t.kind {
                TokenKind::Value(Literal::Float(f)) => f,
                _ => panic!("unexpected token: {:?}", t),
            })
            .collect::<Vec<_>>();
        assert_eq!(values, [1.5, 2.0, 300.0, 0.4]);
    }

    #[test]
    fn test_keywords_from_reserved_table() {
        let tokens = toks("uniform float myfloat vec3");
        assert_eq!(tokens[0].kind, TokenKind::Uniform);
        assert_eq!(tokens[1].kind, TokenKind::TypeFloat { bits: 32 });
        assert_eq!(tokens[2].kind, TokenKind::Name);
        assert_eq!(tokens[3].kind, TokenKind::TypeVec { rows: 3 });
    }

    #[test]
    fn test_default_fp_width() {
        let file: Rc<str> = Rc::from("test.thsl");
        let lines = Line::split("float", &file);
        let tokens = tokenize(&lines, 64).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::TypeFloat { bits: 64 });
    }

    #[test]
    fn test_negate_reclassification() {
        let tokens = toks("-a + (b - c) * -2");
        let kinds = tokens.iter().map(|t| t.kind).collect::<Vec<_>>();
        assert_eq!(kinds[0], TokenKind::Negate);
        assert_eq!(kinds[5], TokenKind::Sub);
        assert_eq!(kinds[9], TokenKind::Negate);
    }

    #[test]
    fn test_unexpected_character() {
        let file: Rc<str> = Rc::from("test.thsl");
        let lines = Line::split("a @ b", &file);
        assert!(tokenize(&lines, 32).is_err());
    }

    #[test]
    fn test_roundtrip_through_lexemes() {
        let code = "void main ( ) { vec4 a ; a . xy = b * 2.5 ; }";
        let first = toks(code);
        let joined = first
            .iter()
            .map(|t| t.lexeme.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let second = toks(&joined);
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.kind, b.kind);
            assert_eq!(a.lexeme, b.lexeme);
        }
    }
}

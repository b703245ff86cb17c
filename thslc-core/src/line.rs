use std::fmt;
use std::rc::Rc;

/// A source position, carried by every token and diagnostic. Lines and
/// columns are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loc {
    pub file: Rc<str>,
    pub line: u32,
    pub col: u32,
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.col)
    }
}

/// One line of (preprocessed) source text. The file name and 1-based line
/// number survive all preprocessor rewrites so diagnostics point at the
/// original file.
#[derive(Debug, Clone)]
pub struct Line {
    pub text: String,
    pub file: Rc<str>,
    pub number: u32,
}

impl Line {
    pub fn loc(&self, col: u32) -> Loc {
        Loc {
            file: self.file.clone(),
            line: self.number,
            col,
        }
    }

    /// Split source text on line feeds into numbered lines.
    pub fn split(code: &str, file: &Rc<str>) -> Vec<Line> {
        code.split('\n')
            .enumerate()
            .map(|(i, text)| Line {
                text: text.strip_suffix('\r').unwrap_or(text).to_owned(),
                file: file.clone(),
                number: i as u32 + 1,
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_split_numbers_from_one() {
        let file: Rc<str> = Rc::from("a.thsl");
        let lines = Line::split("a\nb\r\nc", &file);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].text, "a");
        assert_eq!(lines[1].text, "b");
        assert_eq!(lines[2].text, "c");
        assert_eq!(lines[0].number, 1);
        assert_eq!(lines[2].number, 3);
    }
}

//! Minimal s-expression reader for solver responses and model files.

use std::{
    fmt::{self, Display},
    io::BufRead,
};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Sexp {
    Atom(String),
    List(Vec<Sexp>),
}

#[derive(Error, Debug)]
pub enum SexpError {
    #[error("unbalanced parenthesis at offset {0}")]
    Unbalanced(usize),
    #[error("unterminated `{0}` literal")]
    Unterminated(char),
    #[error("unexpected end of input")]
    Eof,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Sexp {
    pub fn atom(&self) -> Option<&str> {
        match self {
            Sexp::Atom(a) => Some(a),
            Sexp::List(_) => None,
        }
    }

    pub fn list(&self) -> Option<&[Sexp]> {
        match self {
            Sexp::List(l) => Some(l),
            Sexp::Atom(_) => None,
        }
    }

    /// Atom with surrounding `|...|` quotes removed.
    pub fn symbol(&self) -> Option<&str> {
        self.atom().map(|a| {
            a.strip_prefix('|')
                .and_then(|a| a.strip_suffix('|'))
                .unwrap_or(a)
        })
    }

    /// `(head ...)` lists.
    pub fn head(&self) -> Option<&str> {
        self.list()?.first()?.atom()
    }
}

impl Display for Sexp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sexp::Atom(a) => write!(f, "{a}"),
            Sexp::List(l) => {
                write!(f, "(")?;
                for (i, s) in l.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{s}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    Atom(String),
}

fn tokenize(src: &str) -> Result<Vec<(usize, Token)>, SexpError> {
    let mut tokens = Vec::new();
    let chars: Vec<(usize, char)> = src.char_indices().collect();
    let mut i = 0;
    while i < chars.len() {
        let (pos, c) = chars[i];
        match c {
            '(' => tokens.push((pos, Token::Open)),
            ')' => tokens.push((pos, Token::Close)),
            ';' => {
                while i < chars.len() && chars[i].1 != '\n' {
                    i += 1;
                }
            }
            c if c.is_whitespace() => (),
            '|' | '"' => {
                let mut atom = String::from(c);
                i += 1;
                loop {
                    let Some(&(_, n)) = chars.get(i) else {
                        return Err(SexpError::Unterminated(c));
                    };
                    atom.push(n);
                    if n == c {
                        // `""` escapes a quote inside string literals
                        if c == '"' && chars.get(i + 1).map(|x| x.1) == Some('"') {
                            i += 2;
                            atom.push('"');
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                tokens.push((pos, Token::Atom(atom)));
            }
            _ => {
                let mut atom = String::new();
                while let Some(&(_, n)) = chars.get(i) {
                    if n.is_whitespace() || matches!(n, '(' | ')' | ';' | '|' | '"') {
                        break;
                    }
                    atom.push(n);
                    i += 1;
                }
                tokens.push((pos, Token::Atom(atom)));
                continue;
            }
        }
        i += 1;
    }
    Ok(tokens)
}

/// Parses every top-level s-expression in `src`.
pub fn parse_all(src: &str) -> Result<Vec<Sexp>, SexpError> {
    let mut stack: Vec<Vec<Sexp>> = vec![Vec::new()];
    for (pos, tok) in tokenize(src)? {
        match tok {
            Token::Open => stack.push(Vec::new()),
            Token::Close => {
                if stack.len() == 1 {
                    return Err(SexpError::Unbalanced(pos));
                }
                let list = stack.pop().unwrap_or_default();
                if let Some(top) = stack.last_mut() {
                    top.push(Sexp::List(list));
                }
            }
            Token::Atom(a) => {
                if let Some(top) = stack.last_mut() {
                    top.push(Sexp::Atom(a));
                }
            }
        }
    }
    if stack.len() != 1 {
        return Err(SexpError::Unbalanced(src.len()));
    }
    Ok(stack.pop().unwrap_or_default())
}

/// Parses exactly one s-expression.
pub fn parse_one(src: &str) -> Result<Sexp, SexpError> {
    let mut all = parse_all(src)?;
    match all.len() {
        1 => Ok(all.remove(0)),
        0 => Err(SexpError::Eof),
        _ => Err(SexpError::Unbalanced(src.len())),
    }
}

/// Reads one complete s-expression from a line-oriented stream, such as a
/// solver's stdout. Responses may span several lines.
pub fn read_sexp(input: &mut impl BufRead) -> Result<Sexp, SexpError> {
    let mut buf = String::new();
    let mut depth = 0i64;
    let mut in_quote = None;
    loop {
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Err(SexpError::Eof);
        }
        for c in line.chars() {
            match (in_quote, c) {
                (Some(q), c) if c == q => in_quote = None,
                (Some(_), _) => (),
                (None, '|' | '"') => in_quote = Some(c),
                (None, '(') => depth += 1,
                (None, ')') => depth -= 1,
                _ => (),
            }
        }
        buf.push_str(&line);
        if depth <= 0 && in_quote.is_none() && !buf.trim().is_empty() {
            return parse_one(buf.trim());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_nested_lists() {
        let s = parse_one("((|x@0| 3) (y (- 2)))").unwrap();
        let l = s.list().unwrap();
        assert_eq!(l.len(), 2);
        assert_eq!(l[0].list().unwrap()[0].symbol(), Some("x@0"));
        assert_eq!(l[1].to_string(), "(y (- 2))");
    }

    #[test]
    fn reads_multiline_response() {
        let mut input = Cursor::new("sat\n((a\n  1)\n (b 2))\n");
        assert_eq!(read_sexp(&mut input).unwrap(), Sexp::Atom("sat".into()));
        let v = read_sexp(&mut input).unwrap();
        assert_eq!(v.list().unwrap().len(), 2);
        assert!(matches!(read_sexp(&mut input), Err(SexpError::Eof)));
    }

    #[test]
    fn strings_and_comments() {
        let all = parse_all("; comment\n(error \"line 3: unknown \"\"x\"\"\")").unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].head(), Some("error"));
        assert!(parse_all("(a (b)").is_err());
        assert!(parse_all("a)").is_err());
    }
}

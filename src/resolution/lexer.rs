//! Tokenizer for resolution logic source text

use super::error::ResolveError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Str(String),
    Num(f64),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

// Longest first so "===" wins over "==" and "="
const PUNCTUATORS: &[&str] = &[
    "...", "===", "!==", "=>", "==", "!=", "<=", ">=", "&&", "||", "??", "+=", "-=",
    "(", ")", "{", "}", "[", "]", ",", ";", ":", ".", "?", "=", "<", ">", "+", "-",
    "*", "/", "%", "!", "`", "&", "|",
];

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, ResolveError> {
    let mut lexer = Lexer {
        chars: source.chars().collect(),
        pos: 0,
        line: 1,
        column: 1,
    };
    let mut tokens = Vec::new();

    loop {
        lexer.skip_trivia()?;
        let (line, column) = (lexer.line, lexer.column);
        let Some(c) = lexer.peek(0) else {
            tokens.push(Token { kind: TokenKind::Eof, line, column });
            return Ok(tokens);
        };

        let kind = if c == '"' || c == '\'' {
            lexer.string(c)?
        } else if c.is_ascii_digit() || (c == '.' && lexer.peek(1).is_some_and(|n| n.is_ascii_digit())) {
            lexer.number()?
        } else if c.is_alphabetic() || c == '_' || c == '$' {
            lexer.ident()
        } else {
            lexer.punct()?
        };
        tokens.push(Token { kind, line, column });
    }
}

impl Lexer {
    fn peek(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek(0)?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> ResolveError {
        ResolveError::compilation(message, self.line, self.column)
    }

    fn skip_trivia(&mut self) -> Result<(), ResolveError> {
        loop {
            match (self.peek(0), self.peek(1)) {
                (Some(c), _) if c.is_whitespace() => {
                    self.bump();
                }
                (Some('/'), Some('/')) => {
                    while let Some(c) = self.peek(0) {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                (Some('/'), Some('*')) => {
                    self.bump();
                    self.bump();
                    loop {
                        match (self.peek(0), self.peek(1)) {
                            (Some('*'), Some('/')) => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            (Some(_), _) => {
                                self.bump();
                            }
                            (None, _) => return Err(self.error("unterminated comment")),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn string(&mut self, quote: char) -> Result<TokenKind, ResolveError> {
        self.bump();
        let mut out = String::new();
        loop {
            let Some(c) = self.bump() else {
                return Err(self.error("unterminated string literal"));
            };
            match c {
                c if c == quote => return Ok(TokenKind::Str(out)),
                '\n' => return Err(self.error("unterminated string literal")),
                '\\' => {
                    let escaped = self.bump().ok_or_else(|| self.error("unterminated string literal"))?;
                    match escaped {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        '0' => out.push('\0'),
                        'x' => out.push(self.hex_escape(2)?),
                        'u' => out.push(self.hex_escape(4)?),
                        other => out.push(other),
                    }
                }
                other => out.push(other),
            }
        }
    }

    fn hex_escape(&mut self, digits: usize) -> Result<char, ResolveError> {
        let mut code = 0u32;
        for _ in 0..digits {
            let d = self
                .bump()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| self.error("invalid escape sequence"))?;
            code = code * 16 + d;
        }
        char::from_u32(code).ok_or_else(|| self.error("invalid escape sequence"))
    }

    fn number(&mut self) -> Result<TokenKind, ResolveError> {
        let mut text = String::new();
        if self.peek(0) == Some('0') && matches!(self.peek(1), Some('x') | Some('X')) {
            self.bump();
            self.bump();
            while let Some(c) = self.peek(0).filter(|c| c.is_ascii_hexdigit()) {
                text.push(c);
                self.bump();
            }
            return u64::from_str_radix(&text, 16)
                .map(|n| TokenKind::Num(n as f64))
                .map_err(|_| self.error("invalid hex literal"));
        }

        while let Some(c) = self.peek(0) {
            let exponent_sign = (c == '+' || c == '-') && (text.ends_with('e') || text.ends_with('E'));
            if c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E' || c == '_' || exponent_sign {
                if c != '_' {
                    text.push(c);
                }
                self.bump();
            } else {
                break;
            }
        }
        text.parse::<f64>()
            .map(TokenKind::Num)
            .map_err(|_| self.error(format!("invalid number literal '{}'", text)))
    }

    fn ident(&mut self) -> TokenKind {
        let mut text = String::new();
        while let Some(c) = self.peek(0) {
            if c.is_alphanumeric() || c == '_' || c == '$' {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        TokenKind::Ident(text)
    }

    fn punct(&mut self) -> Result<TokenKind, ResolveError> {
        for &p in PUNCTUATORS {
            let matches = p.chars().enumerate().all(|(i, pc)| self.peek(i) == Some(pc));
            if matches {
                if p == "`" {
                    return Err(self.error("template literals are not supported"));
                }
                if p == "&" || p == "|" {
                    return Err(self.error("bitwise operators are not supported"));
                }
                for _ in 0..p.chars().count() {
                    self.bump();
                }
                return Ok(TokenKind::Punct(p));
            }
        }
        let c = self.peek(0).unwrap_or(' ');
        Err(self.error(format!("unexpected character '{}'", c)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_arrow_function_tokens() {
        assert_eq!(
            kinds("async () => \"ok\""),
            vec![
                TokenKind::Ident("async".into()),
                TokenKind::Punct("("),
                TokenKind::Punct(")"),
                TokenKind::Punct("=>"),
                TokenKind::Str("ok".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_longest_punctuator_wins() {
        assert_eq!(
            kinds("a === b !== c"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Punct("==="),
                TokenKind::Ident("b".into()),
                TokenKind::Punct("!=="),
                TokenKind::Ident("c".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_strings_numbers_and_comments() {
        assert_eq!(
            kinds("'it\\'s' // trailing\n 1.5e2 /* block */ 0x10"),
            vec![
                TokenKind::Str("it's".into()),
                TokenKind::Num(150.0),
                TokenKind::Num(16.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_positions_are_tracked() {
        let tokens = tokenize("a\n  b").unwrap();
        assert_eq!((tokens[1].line, tokens[1].column), (2, 3));
    }

    #[test]
    fn test_lexical_errors() {
        assert!(matches!(tokenize("\"open"), Err(ResolveError::Compilation { .. })));
        assert!(matches!(tokenize("`tpl`"), Err(ResolveError::Compilation { .. })));
        assert!(matches!(tokenize("a # b"), Err(ResolveError::Compilation { .. })));
        assert!(matches!(tokenize("/* never closed"), Err(ResolveError::Compilation { .. })));
    }
}

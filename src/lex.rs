use std::fmt::Display;

use miette::{Diagnostic, Error, LabeledSpan, NamedSource, SourceSpan};
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
#[error("Unexpected token '{token}'")]
#[diagnostic(help("remove or correct the token: `{token}`"))]
pub struct SingleTokenError {
    #[source_code]
    src: NamedSource<String>,

    #[label("this character")]
    bad_bit: SourceSpan,

    pub token: char,
}

impl SingleTokenError {
    pub fn line(&self) -> usize {
        self.src.inner()[..=self.bad_bit.offset()].lines().count()
    }
}

#[derive(Error, Debug, Diagnostic)]
#[error("unterminated double quote string")]
#[diagnostic(help("add a trailing `\"` to terminate the string literal"))]
pub struct StringTerminationError {
    #[source_code]
    src: NamedSource<String>,

    #[label("string literal opened here")]
    bad_line: SourceSpan,
}

impl StringTerminationError {
    pub fn line(&self) -> usize {
        self.src.inner()[..=self.bad_line.offset()].lines().count()
    }
}

#[derive(Error, Debug, Diagnostic)]
#[error("unterminated unit annotation")]
#[diagnostic(help("unit text is written between pipes, like `|m/s2|`"))]
pub struct UnitTerminationError {
    #[source_code]
    src: NamedSource<String>,

    #[label("unit annotation opened here")]
    bad_line: SourceSpan,
}

#[derive(Error, Debug, Diagnostic)]
#[error("Unexpected end of file")]
#[diagnostic(help(
    "The file ended unexpectedly, possibly due to a missing closing brace or parenthesis."
))]
pub struct Eof {
    #[source_code]
    src: NamedSource<String>,

    #[label("Syntax Error: Unexpected end of file")]
    bad_line: SourceSpan,
}

impl Eof {
    pub fn build(lexer: &Lexer<'_>) -> Self {
        Eof {
            src: NamedSource::new(lexer.filename.unwrap_or("<input>"), lexer.whole.to_string()),
            bad_line: SourceSpan::from(lexer.byte.saturating_sub(1)..lexer.byte),
        }
    }

    pub fn line(&self) -> usize {
        self.src.inner()[..=self.bad_line.offset()].lines().count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Token<'de> {
    pub kind: TokenKind,
    pub literal: &'de str,
}

impl<'de> Token<'de> {
    /// For number tokens: the lexical suffix after the digits (unit text or
    /// the imaginary marker), empty when the number is bare.
    pub fn number_suffix(&self) -> &'de str {
        let digits = self
            .literal
            .find(|c: char| !matches!(c, '0'..='9' | '.' | '\''))
            .unwrap_or(self.literal.len());
        &self.literal[digits..]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TokenKind {
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Comma,
    Semicolon,
    Minus,
    Plus,
    Star,
    Slash,
    Caret,
    PlusMinus,
    BangEqual,
    EqualEqual,
    GreaterEqual,
    LessEqual,
    Greater,
    Less,
    Equal,
    String,
    /// Unit text captured between pipes, e.g. `|m/s2|`.
    Unit,
    Ident,
    /// Numeric literal; the token's `literal` keeps any suffix.
    Number(f64),
    If,
    Else,
    While,
}

impl Display for Token<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lit = self.literal;
        match self.kind {
            TokenKind::LeftParen => write!(f, "LEFT_PAREN {lit}"),
            TokenKind::RightParen => write!(f, "RIGHT_PAREN {lit}"),
            TokenKind::LeftBrace => write!(f, "LEFT_BRACE {lit}"),
            TokenKind::RightBrace => write!(f, "RIGHT_BRACE {lit}"),
            TokenKind::LeftBracket => write!(f, "LEFT_BRACKET {lit}"),
            TokenKind::RightBracket => write!(f, "RIGHT_BRACKET {lit}"),
            TokenKind::Comma => write!(f, "COMMA {lit}"),
            TokenKind::Semicolon => write!(f, "SEMICOLON {lit}"),
            TokenKind::Minus => write!(f, "MINUS {lit}"),
            TokenKind::Plus => write!(f, "PLUS {lit}"),
            TokenKind::Star => write!(f, "STAR {lit}"),
            TokenKind::Slash => write!(f, "SLASH {lit}"),
            TokenKind::Caret => write!(f, "CARET {lit}"),
            TokenKind::PlusMinus => write!(f, "PLUS_MINUS {lit}"),
            TokenKind::BangEqual => write!(f, "BANG_EQUAL {lit}"),
            TokenKind::EqualEqual => write!(f, "EQUAL_EQUAL {lit}"),
            TokenKind::GreaterEqual => write!(f, "GREATER_EQUAL {lit}"),
            TokenKind::LessEqual => write!(f, "LESS_EQUAL {lit}"),
            TokenKind::Greater => write!(f, "GREATER {lit}"),
            TokenKind::Less => write!(f, "LESS {lit}"),
            TokenKind::Equal => write!(f, "EQUAL {lit}"),
            TokenKind::String => write!(f, "STRING \"{lit}\""),
            TokenKind::Unit => write!(f, "UNIT |{lit}|"),
            TokenKind::Ident => write!(f, "IDENTIFIER {lit}"),
            TokenKind::Number(n) => write!(f, "NUMBER {lit} {n}"),
            TokenKind::If => write!(f, "IF {lit}"),
            TokenKind::Else => write!(f, "ELSE {lit}"),
            TokenKind::While => write!(f, "WHILE {lit}"),
        }
    }
}

pub struct Lexer<'de> {
    filename: Option<&'de str>,
    whole: &'de str,
    rest: &'de str,
    pub byte: usize,
    peeked: Option<Result<Token<'de>, Error>>,
}

impl<'de> Lexer<'de> {
    pub fn new(filename: Option<&'de str>, input: &'de str) -> Self {
        Lexer {
            filename,
            whole: input,
            rest: input,
            byte: 0,
            peeked: None,
        }
    }

    pub fn whole(&self) -> &'de str {
        self.whole
    }

    pub fn expect(&mut self, expected: TokenKind, error: &str) -> Result<Token<'de>, Error> {
        self.expect_where(|token| token.kind == expected, expected, error)
    }

    pub fn expect_where(
        &mut self,
        check: impl FnOnce(&Token<'de>) -> bool,
        expected: TokenKind,
        error: &str,
    ) -> Result<Token<'de>, Error> {
        match self.next() {
            Some(Ok(token)) if check(&token) => Ok(token),
            Some(Ok(token)) => Err(miette::miette!(
                help = format!("use `{expected:?}` here instead"),
                labels = vec![LabeledSpan::at(
                    self.byte - token.literal.len()..self.byte,
                    "here",
                )],
                "{error}",
            )
            .with_source_code(self.whole.to_string())),
            Some(Err(e)) => Err(e),
            None => Err(Eof::build(self).into()),
        }
    }

    pub fn peek(&mut self) -> Option<&Result<Token<'de>, Error>> {
        if self.peeked.is_some() {
            return self.peeked.as_ref();
        }
        self.peeked = self.next();
        self.peeked.as_ref()
    }
}

fn is_suffix_start(c: char) -> bool {
    c.is_alphabetic() || c == '°'
}

impl<'de> Iterator for Lexer<'de> {
    type Item = Result<Token<'de>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(peeked) = self.peeked.take() {
            return Some(peeked);
        }
        loop {
            let mut chars = self.rest.chars();
            let c = chars.next()?;
            let literal = &self.rest[..c.len_utf8()];
            let cur = self.rest;
            self.rest = chars.as_str();
            self.byte += c.len_utf8();

            enum Start {
                String,
                Unit,
                Slash,
                Bang,
                Ident,
                Number,
                IfEqualElse(TokenKind, TokenKind),
            }

            let process = |kind: TokenKind| Some(Ok(Token { kind, literal }));

            let started = match c {
                '(' => return process(TokenKind::LeftParen),
                ')' => return process(TokenKind::RightParen),
                '{' => return process(TokenKind::LeftBrace),
                '}' => return process(TokenKind::RightBrace),
                '[' => return process(TokenKind::LeftBracket),
                ']' => return process(TokenKind::RightBracket),
                ',' => return process(TokenKind::Comma),
                ';' => return process(TokenKind::Semicolon),
                '-' => return process(TokenKind::Minus),
                '+' => return process(TokenKind::Plus),
                '*' => return process(TokenKind::Star),
                '^' => return process(TokenKind::Caret),
                '±' => return process(TokenKind::PlusMinus),
                '/' => Start::Slash,
                '!' => Start::Bang,
                '=' => Start::IfEqualElse(TokenKind::EqualEqual, TokenKind::Equal),
                '>' => Start::IfEqualElse(TokenKind::GreaterEqual, TokenKind::Greater),
                '<' => Start::IfEqualElse(TokenKind::LessEqual, TokenKind::Less),
                '"' => Start::String,
                '|' => Start::Unit,
                '0'..='9' => Start::Number,
                c if c.is_alphabetic() || c == '_' => Start::Ident,
                ' ' | '\r' | '\t' | '\n' => continue, // Skip whitespace
                c => {
                    return Some(Err(SingleTokenError {
                        src: NamedSource::new(
                            self.filename.unwrap_or("<input>"),
                            self.whole.to_string(),
                        ),
                        bad_bit: SourceSpan::from(self.byte - c.len_utf8()..self.byte),
                        token: c,
                    }
                    .into()));
                }
            };

            match started {
                Start::String => {
                    if let Some(end) = self.rest.find('"') {
                        let literal = &self.rest[..end];
                        self.byte += end + 1;
                        self.rest = &self.rest[end + 1..];
                        return Some(Ok(Token {
                            kind: TokenKind::String,
                            literal,
                        }));
                    } else {
                        return Some(Err(StringTerminationError {
                            src: NamedSource::new(
                                self.filename.unwrap_or("<input>"),
                                self.whole.to_string(),
                            ),
                            bad_line: SourceSpan::from(self.byte - c.len_utf8()..self.whole.len()),
                        }
                        .into()));
                    }
                }
                Start::Unit => {
                    if let Some(end) = self.rest.find('|') {
                        let literal = &self.rest[..end];
                        self.byte += end + 1;
                        self.rest = &self.rest[end + 1..];
                        return Some(Ok(Token {
                            kind: TokenKind::Unit,
                            literal,
                        }));
                    } else {
                        return Some(Err(UnitTerminationError {
                            src: NamedSource::new(
                                self.filename.unwrap_or("<input>"),
                                self.whole.to_string(),
                            ),
                            bad_line: SourceSpan::from(self.byte - c.len_utf8()..self.whole.len()),
                        }
                        .into()));
                    }
                }
                Start::Slash => {
                    if self.rest.starts_with('/') {
                        let new_line = self.rest.find('\n').unwrap_or(self.rest.len());
                        self.byte += new_line;
                        self.rest = &self.rest[new_line..];
                        continue; // Skip single-line comment
                    } else {
                        return process(TokenKind::Slash);
                    }
                }
                Start::Bang => {
                    if self.rest.starts_with('=') {
                        let literal = &cur[..2];
                        self.rest = &self.rest[1..];
                        self.byte += 1;
                        return Some(Ok(Token {
                            kind: TokenKind::BangEqual,
                            literal,
                        }));
                    }
                    return Some(Err(SingleTokenError {
                        src: NamedSource::new(
                            self.filename.unwrap_or("<input>"),
                            self.whole.to_string(),
                        ),
                        bad_bit: SourceSpan::from(self.byte - 1..self.byte),
                        token: '!',
                    }
                    .into()));
                }
                Start::Ident => {
                    let first_non_ident = cur
                        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
                        .unwrap_or(cur.len());

                    let literal = &cur[..first_non_ident];

                    let extra_bytes = literal.len() - c.len_utf8();
                    self.byte += extra_bytes;
                    self.rest = &self.rest[extra_bytes..];

                    let kind = match literal {
                        "if" => TokenKind::If,
                        "else" => TokenKind::Else,
                        "while" => TokenKind::While,
                        _ => TokenKind::Ident,
                    };

                    return Some(Ok(Token { kind, literal }));
                }
                Start::Number => {
                    // digits with at most one interior dot; `'` groups digits
                    let mut digits_end = c.len_utf8();
                    let mut has_dot = false;
                    for (i, ch) in cur.char_indices().skip(1) {
                        match ch {
                            '0'..='9' => digits_end = i + 1,
                            '.' if !has_dot
                                && cur[i + 1..].starts_with(|c: char| c.is_ascii_digit()) =>
                            {
                                has_dot = true;
                                digits_end = i + 1;
                            }
                            '\'' if cur[i + 1..].starts_with(|c: char| c.is_ascii_digit()) => {
                                digits_end = i + 1;
                            }
                            _ => break,
                        }
                        if i + 1 != digits_end {
                            break;
                        }
                    }

                    // an attached suffix: unit text or the imaginary marker
                    let mut end = digits_end;
                    let mut in_suffix = false;
                    for (i, ch) in cur[digits_end..].char_indices() {
                        let at_start = i == 0;
                        let ok = if at_start || !in_suffix {
                            is_suffix_start(ch)
                        } else {
                            is_suffix_start(ch) || ch.is_ascii_digit()
                        };
                        if !ok {
                            break;
                        }
                        in_suffix = true;
                        end = digits_end + i + ch.len_utf8();
                    }

                    let literal = &cur[..end];
                    let extra_bytes = literal.len() - c.len_utf8();
                    self.byte += extra_bytes;
                    self.rest = &self.rest[extra_bytes..];

                    let digits = &cur[..digits_end];
                    let n = match digits.replace('\'', "").parse() {
                        Ok(n) => n,
                        Err(e) => {
                            return Some(Err(miette::miette!(
                                labels = vec![LabeledSpan::at(
                                    self.byte - literal.len()..self.byte,
                                    "this numeric literal"
                                )],
                                "{e}",
                            )
                            .with_source_code(self.whole.to_string())));
                        }
                    };

                    return Some(Ok(Token {
                        kind: TokenKind::Number(n),
                        literal,
                    }));
                }
                Start::IfEqualElse(yes, no) => {
                    if self.rest.starts_with('=') {
                        let span = &cur[..2];
                        self.rest = &self.rest[1..];
                        self.byte += 1;
                        return Some(Ok(Token {
                            kind: yes,
                            literal: span,
                        }));
                    } else {
                        return Some(Ok(Token { kind: no, literal }));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        Lexer::new(None, input)
            .map(|t| t.unwrap().kind)
            .collect()
    }

    #[test]
    fn numbers_keep_their_suffix() {
        let mut lexer = Lexer::new(None, "5μm 2.5 3i 10kg");
        let t = lexer.next().unwrap().unwrap();
        assert_eq!(t.kind, TokenKind::Number(5.0));
        assert_eq!(t.number_suffix(), "μm");
        let t = lexer.next().unwrap().unwrap();
        assert_eq!(t.kind, TokenKind::Number(2.5));
        assert_eq!(t.number_suffix(), "");
        let t = lexer.next().unwrap().unwrap();
        assert_eq!(t.kind, TokenKind::Number(3.0));
        assert_eq!(t.number_suffix(), "i");
        let t = lexer.next().unwrap().unwrap();
        assert_eq!(t.number_suffix(), "kg");
    }

    #[test]
    fn digit_group_separators() {
        let mut lexer = Lexer::new(None, "1'000'000");
        let t = lexer.next().unwrap().unwrap();
        assert_eq!(t.kind, TokenKind::Number(1_000_000.0));
        assert!(lexer.next().is_none());
    }

    #[test]
    fn uncertainty_operator() {
        assert_eq!(
            kinds("100 ± 1"),
            vec![
                TokenKind::Number(100.0),
                TokenKind::PlusMinus,
                TokenKind::Number(1.0)
            ]
        );
    }

    #[test]
    fn unit_annotation_is_one_token() {
        let mut lexer = Lexer::new(None, "|N.m/s2|");
        let t = lexer.next().unwrap().unwrap();
        assert_eq!(t.kind, TokenKind::Unit);
        assert_eq!(t.literal, "N.m/s2");
    }

    #[test]
    fn keywords_and_comparisons() {
        assert_eq!(
            kinds("while i <= 10 { i = i + 1 }"),
            vec![
                TokenKind::While,
                TokenKind::Ident,
                TokenKind::LessEqual,
                TokenKind::Number(10.0),
                TokenKind::LeftBrace,
                TokenKind::Ident,
                TokenKind::Equal,
                TokenKind::Ident,
                TokenKind::Plus,
                TokenKind::Number(1.0),
                TokenKind::RightBrace,
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("1 // a comment\n2"),
            vec![TokenKind::Number(1.0), TokenKind::Number(2.0)]
        );
    }

    #[test]
    fn unterminated_string_is_reported() {
        let mut lexer = Lexer::new(None, "\"oops");
        let err = lexer.next().unwrap().unwrap_err();
        assert!(err.downcast_ref::<StringTerminationError>().is_some());
    }

    #[test]
    fn stray_character_is_reported() {
        let mut lexer = Lexer::new(None, "#");
        let err = lexer.next().unwrap().unwrap_err();
        assert!(err.downcast_ref::<SingleTokenError>().is_some());
    }
}

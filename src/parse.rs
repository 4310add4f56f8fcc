use std::borrow::Cow;
use std::fmt::Display;

use miette::{Context, Error, LabeledSpan};

use crate::lex::{Eof, Lexer, Token, TokenKind};

/// One parsed expression. Statements are expressions too; the evaluator
/// gives each node kind its value.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr<'de> {
    /// Numeric literal with its lexical suffix (unit text, `i`/`j`, or empty).
    Literal { value: f64, suffix: &'de str },
    /// String literal, split into text and embedded expressions.
    Template(Vec<TemplatePart<'de>>),
    Ident(&'de str),
    Assign {
        name: &'de str,
        value: Box<Expr<'de>>,
    },
    Unary {
        op: UnOp,
        operand: Box<Expr<'de>>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr<'de>>,
        rhs: Box<Expr<'de>>,
    },
    /// Postfix `|unit|`: attaches the unit to a dimensionless operand,
    /// converts a dimensioned one.
    Coerce {
        operand: Box<Expr<'de>>,
        unit: &'de str,
    },
    Call {
        name: &'de str,
        args: Vec<Expr<'de>>,
    },
    Block(Block<'de>),
    If {
        condition: Box<Expr<'de>>,
        then_block: Block<'de>,
        else_block: Option<Block<'de>>,
    },
    While {
        condition: Box<Expr<'de>>,
        body: Block<'de>,
    },
    /// Rows split by `;`, cells by `,`. A single bracketed row is sugar for
    /// an N×1 column.
    MatrixLit(Vec<Vec<Expr<'de>>>),
    Index {
        target: Box<Expr<'de>>,
        indices: Vec<Expr<'de>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart<'de> {
    Text(Cow<'de, str>),
    Expr(Expr<'de>),
}

/// Statement list with an optional tail expression; the tail carries the
/// block's value, a trailing `;` makes the block void.
#[derive(Debug, Clone, PartialEq)]
pub struct Block<'de> {
    pub statements: Vec<Expr<'de>>,
    pub tail: Option<Box<Expr<'de>>>,
}

/// A top-level statement and whether a `;` closed it.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement<'de> {
    pub expr: Expr<'de>,
    pub terminated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnOp {
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    /// The uncertainty operator `±`.
    PlusMinus,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    EqualEqual,
    BangEqual,
}

impl Expr<'_> {
    // block-ended statements need no `;` separator
    fn ends_with_block(&self) -> bool {
        matches!(self, Expr::Block(_) | Expr::If { .. } | Expr::While { .. })
    }
}

pub struct Parser<'de> {
    pub whole: &'de str,
    filename: Option<&'de str>,
    pub lexer: Lexer<'de>,
}

impl<'de> Parser<'de> {
    pub fn new(filename: Option<&'de str>, whole: &'de str) -> Self {
        Parser {
            whole,
            filename,
            lexer: Lexer::new(filename, whole),
        }
    }

    /// The whole program as one implicit block.
    pub fn parse_program(mut self) -> Result<Block<'de>, Error> {
        self.parse_statements(None)
    }

    /// A single expression consuming all input.
    pub fn parse_expr(mut self) -> Result<Expr<'de>, Error> {
        let expr = self.parse_expression_within(0)?;
        if self.lexer.peek().is_some() {
            let token = self.lexer.next().expect("just peeked")?;
            return Err(miette::miette!(
                labels = vec![LabeledSpan::at(
                    self.lexer.byte - token.literal.len()..self.lexer.byte,
                    "here"
                )],
                "unexpected trailing input after expression",
            )
            .with_source_code(self.whole.to_string()));
        }
        Ok(expr)
    }

    /// One top-level statement, or `None` at the end of input. The caller
    /// sees whether a `;` closed it; an unterminated final expression is the
    /// program's value.
    pub fn next_statement(&mut self) -> Option<Result<Statement<'de>, Error>> {
        self.lexer.peek()?;
        let expr = match self.parse_expression_within(0) {
            Ok(expr) => expr,
            Err(e) => return Some(Err(e)),
        };
        match self.lexer.peek() {
            Some(Ok(Token {
                kind: TokenKind::Semicolon,
                ..
            })) => {
                self.lexer.next();
                Some(Ok(Statement {
                    expr,
                    terminated: true,
                }))
            }
            None => Some(Ok(Statement {
                expr,
                terminated: false,
            })),
            Some(_) if expr.ends_with_block() => Some(Ok(Statement {
                expr,
                terminated: true,
            })),
            Some(Ok(_)) => Some(Err(miette::miette!(
                labels = vec![LabeledSpan::at(
                    self.lexer.byte.saturating_sub(1)..self.lexer.byte,
                    "statement ends here"
                )],
                "expected `;` between statements",
            )
            .with_source_code(self.whole.to_string()))),
            Some(Err(_)) => Some(Err(self
                .lexer
                .next()
                .expect("just peeked")
                .expect_err("peeked an error"))),
        }
    }

    /// Statements up to `terminator` (a closing brace) or end of input.
    fn parse_statements(&mut self, terminator: Option<TokenKind>) -> Result<Block<'de>, Error> {
        let mut statements = Vec::new();
        let mut tail = None;
        loop {
            match self.lexer.peek() {
                None => {
                    if terminator.is_some() {
                        return Err(Eof::build(&self.lexer).into());
                    }
                    break;
                }
                Some(Err(_)) => {
                    return Err(self
                        .lexer
                        .next()
                        .expect("just peeked")
                        .expect_err("peeked an error"));
                }
                Some(Ok(token)) if Some(token.kind) == terminator => break,
                Some(Ok(_)) => {}
            }

            let expr = self.parse_expression_within(0)?;
            match self.lexer.peek() {
                Some(Ok(token)) if token.kind == TokenKind::Semicolon => {
                    self.lexer.next();
                    statements.push(expr);
                }
                Some(Ok(token)) if Some(token.kind) == terminator => {
                    tail = Some(Box::new(expr));
                    break;
                }
                None if terminator.is_none() => {
                    tail = Some(Box::new(expr));
                    break;
                }
                _ if expr.ends_with_block() => statements.push(expr),
                _ => {
                    return Err(miette::miette!(
                        labels = vec![LabeledSpan::at(
                            self.lexer.byte.saturating_sub(1)..self.lexer.byte,
                            "statement ends here"
                        )],
                        "expected `;` between statements",
                    )
                    .with_source_code(self.whole.to_string()));
                }
            }
        }
        Ok(Block { statements, tail })
    }

    fn parse_block(&mut self) -> Result<Block<'de>, Error> {
        self.lexer
            .expect(TokenKind::LeftBrace, "expected `{` to open a block")?;
        let block = self.parse_statements(Some(TokenKind::RightBrace))?;
        self.lexer
            .expect(TokenKind::RightBrace, "expected `}` to close the block")?;
        Ok(block)
    }

    pub fn parse_expression_within(&mut self, min_bp: u8) -> Result<Expr<'de>, Error> {
        let token = match self.lexer.next() {
            Some(Ok(token)) => token,
            None => return Err(Eof::build(&self.lexer).into()),
            Some(Err(e)) => return Err(e),
        };

        let mut lhs = match token {
            Token {
                kind: TokenKind::Number(value),
                ..
            } => Expr::Literal {
                value,
                suffix: token.number_suffix(),
            },
            Token {
                kind: TokenKind::String,
                literal,
            } => self.parse_template(literal)?,
            Token {
                kind: TokenKind::Ident,
                literal,
            } => {
                if matches!(
                    self.lexer.peek(),
                    Some(Ok(Token {
                        kind: TokenKind::LeftParen,
                        ..
                    }))
                ) {
                    self.lexer.next();
                    let args = self.parse_call_args()?;
                    Expr::Call {
                        name: literal,
                        args,
                    }
                } else {
                    Expr::Ident(literal)
                }
            }
            Token {
                kind: TokenKind::LeftParen,
                ..
            } => {
                let inner = self.parse_expression_within(0)?;
                self.lexer.expect(
                    TokenKind::RightParen,
                    "expected `)` to close the parenthesis",
                )?;
                inner
            }
            Token {
                kind: TokenKind::LeftBrace,
                ..
            } => {
                let block = self.parse_statements(Some(TokenKind::RightBrace))?;
                self.lexer
                    .expect(TokenKind::RightBrace, "expected `}` to close the block")?;
                Expr::Block(block)
            }
            Token {
                kind: TokenKind::LeftBracket,
                ..
            } => self.parse_matrix_literal()?,
            Token {
                kind: TokenKind::Minus,
                ..
            } => {
                let ((), r_bp) = prefix_binding_power();
                let operand = self.parse_expression_within(r_bp).wrap_err("parse RHS")?;
                Expr::Unary {
                    op: UnOp::Neg,
                    operand: Box::new(operand),
                }
            }
            Token {
                kind: TokenKind::Plus,
                ..
            } => {
                // unary plus is the identity
                let ((), r_bp) = prefix_binding_power();
                self.parse_expression_within(r_bp).wrap_err("parse RHS")?
            }
            Token {
                kind: TokenKind::If,
                ..
            } => {
                let condition = self
                    .parse_expression_within(0)
                    .wrap_err("parse condition")?;
                let then_block = self.parse_block().wrap_err("parse then branch")?;
                let else_block = if matches!(
                    self.lexer.peek(),
                    Some(Ok(Token {
                        kind: TokenKind::Else,
                        ..
                    }))
                ) {
                    self.lexer.next();
                    Some(self.parse_block().wrap_err("parse else branch")?)
                } else {
                    None
                };
                Expr::If {
                    condition: Box::new(condition),
                    then_block,
                    else_block,
                }
            }
            Token {
                kind: TokenKind::While,
                ..
            } => {
                let condition = self
                    .parse_expression_within(0)
                    .wrap_err("parse condition")?;
                let body = self.parse_block().wrap_err("parse loop body")?;
                Expr::While {
                    condition: Box::new(condition),
                    body,
                }
            }
            token => {
                return Err(miette::miette!(
                    labels = vec![LabeledSpan::at(
                        self.lexer.byte - token.literal.len()..self.lexer.byte,
                        "here"
                    )],
                    "expected an expression, found `{}`",
                    token.literal,
                )
                .with_source_code(self.whole.to_string()));
            }
        };

        loop {
            let op = match self.lexer.peek() {
                None => break,
                Some(Err(_)) => {
                    return Err(self
                        .lexer
                        .next()
                        .expect("just peeked")
                        .expect_err("peeked an error"));
                }
                Some(Ok(token)) => *token,
            };

            // postfix: unit coercion and matrix indexing
            if let Some(l_bp) = postfix_binding_power(op.kind) {
                if l_bp < min_bp {
                    break;
                }
                match op.kind {
                    TokenKind::Unit => {
                        self.lexer.next();
                        lhs = Expr::Coerce {
                            operand: Box::new(lhs),
                            unit: op.literal,
                        };
                    }
                    TokenKind::LeftBracket => {
                        self.lexer.next();
                        let mut indices = vec![self.parse_expression_within(0)?];
                        if matches!(
                            self.lexer.peek(),
                            Some(Ok(Token {
                                kind: TokenKind::Comma,
                                ..
                            }))
                        ) {
                            self.lexer.next();
                            indices.push(self.parse_expression_within(0)?);
                        }
                        self.lexer
                            .expect(TokenKind::RightBracket, "expected `]` after index")?;
                        lhs = Expr::Index {
                            target: Box::new(lhs),
                            indices,
                        };
                    }
                    _ => unreachable!("postfix_binding_power filtered the kinds"),
                }
                continue;
            }

            let Some((l_bp, r_bp)) = infix_binding_power(op.kind) else {
                break;
            };
            if l_bp < min_bp {
                break;
            }
            self.lexer.next();

            if op.kind == TokenKind::Equal {
                let Expr::Ident(name) = lhs else {
                    return Err(miette::miette!(
                        labels = vec![LabeledSpan::at(
                            self.lexer.byte.saturating_sub(1)..self.lexer.byte,
                            "assignment here"
                        )],
                        "only identifiers can be assigned to",
                    )
                    .with_source_code(self.whole.to_string()));
                };
                let value = self.parse_expression_within(r_bp).wrap_err("parse RHS")?;
                lhs = Expr::Assign {
                    name,
                    value: Box::new(value),
                };
                continue;
            }

            let binop = match op.kind {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::Caret => BinOp::Pow,
                TokenKind::PlusMinus => BinOp::PlusMinus,
                TokenKind::Less => BinOp::Less,
                TokenKind::LessEqual => BinOp::LessEqual,
                TokenKind::Greater => BinOp::Greater,
                TokenKind::GreaterEqual => BinOp::GreaterEqual,
                TokenKind::EqualEqual => BinOp::EqualEqual,
                TokenKind::BangEqual => BinOp::BangEqual,
                _ => unreachable!("infix_binding_power filtered the kinds"),
            };
            let rhs = self.parse_expression_within(r_bp).wrap_err("parse RHS")?;
            lhs = Expr::Binary {
                op: binop,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }

        Ok(lhs)
    }

    fn parse_call_args(&mut self) -> Result<Vec<Expr<'de>>, Error> {
        let mut args = Vec::new();
        if matches!(
            self.lexer.peek(),
            Some(Ok(Token {
                kind: TokenKind::RightParen,
                ..
            }))
        ) {
            self.lexer.next();
            return Ok(args);
        }
        loop {
            args.push(self.parse_expression_within(0)?);
            match self.lexer.next() {
                Some(Ok(Token {
                    kind: TokenKind::Comma,
                    ..
                })) => continue,
                Some(Ok(Token {
                    kind: TokenKind::RightParen,
                    ..
                })) => break,
                Some(Ok(token)) => {
                    return Err(miette::miette!(
                        labels = vec![LabeledSpan::at(
                            self.lexer.byte - token.literal.len()..self.lexer.byte,
                            "here"
                        )],
                        "expected `,` or `)` in argument list",
                    )
                    .with_source_code(self.whole.to_string()));
                }
                Some(Err(e)) => return Err(e),
                None => return Err(Eof::build(&self.lexer).into()),
            }
        }
        Ok(args)
    }

    // `[a, b; c, d]`, the opening bracket already consumed
    fn parse_matrix_literal(&mut self) -> Result<Expr<'de>, Error> {
        let mut rows = Vec::new();
        let mut row = Vec::new();
        if matches!(
            self.lexer.peek(),
            Some(Ok(Token {
                kind: TokenKind::RightBracket,
                ..
            }))
        ) {
            self.lexer.next();
            return Ok(Expr::MatrixLit(rows));
        }
        loop {
            row.push(self.parse_expression_within(0)?);
            match self.lexer.next() {
                Some(Ok(Token {
                    kind: TokenKind::Comma,
                    ..
                })) => continue,
                Some(Ok(Token {
                    kind: TokenKind::Semicolon,
                    ..
                })) => {
                    rows.push(std::mem::take(&mut row));
                }
                Some(Ok(Token {
                    kind: TokenKind::RightBracket,
                    ..
                })) => {
                    rows.push(row);
                    break;
                }
                Some(Ok(token)) => {
                    return Err(miette::miette!(
                        labels = vec![LabeledSpan::at(
                            self.lexer.byte - token.literal.len()..self.lexer.byte,
                            "here"
                        )],
                        "expected `,`, `;` or `]` in matrix literal",
                    )
                    .with_source_code(self.whole.to_string()));
                }
                Some(Err(e)) => return Err(e),
                None => return Err(Eof::build(&self.lexer).into()),
            }
        }
        Ok(Expr::MatrixLit(rows))
    }

    /// Splits a string literal into text and `{expr}` spans; `{{` and `}}`
    /// escape literal braces. Embedded expressions are parsed eagerly.
    fn parse_template(&self, literal: &'de str) -> Result<Expr<'de>, Error> {
        let mut parts = Vec::new();
        let mut text = String::new();
        let mut rest = literal;
        loop {
            let Some(brace) = rest.find(['{', '}']) else {
                text.push_str(rest);
                break;
            };
            text.push_str(&rest[..brace]);
            let after = &rest[brace..];
            if after.starts_with("{{") {
                text.push('{');
                rest = &after[2..];
                continue;
            }
            if after.starts_with("}}") {
                text.push('}');
                rest = &after[2..];
                continue;
            }
            if after.starts_with('}') {
                return Err(miette::miette!(
                    help = "escape a literal brace by doubling it: `}}`",
                    "unmatched `}}` in string template",
                ));
            }
            let close = after.find('}').ok_or_else(|| {
                miette::miette!(
                    help = "escape a literal brace by doubling it: `{{`",
                    "unclosed `{{` in string template",
                )
            })?;
            if !text.is_empty() {
                parts.push(TemplatePart::Text(Cow::Owned(std::mem::take(&mut text))));
            }
            let inner = &after[1..close];
            let expr = Parser::new(self.filename, inner)
                .parse_expr()
                .wrap_err("parse embedded template expression")?;
            parts.push(TemplatePart::Expr(expr));
            rest = &after[close + 1..];
        }
        if !text.is_empty() || parts.is_empty() {
            parts.push(TemplatePart::Text(Cow::Owned(text)));
        }
        Ok(Expr::Template(parts))
    }
}

fn prefix_binding_power() -> ((), u8) {
    ((), 11)
}

fn postfix_binding_power(kind: TokenKind) -> Option<u8> {
    match kind {
        TokenKind::Unit | TokenKind::LeftBracket => Some(15),
        _ => None,
    }
}

fn infix_binding_power(kind: TokenKind) -> Option<(u8, u8)> {
    let bp = match kind {
        TokenKind::Equal => (2, 1),
        TokenKind::PlusMinus => (3, 4),
        TokenKind::Less
        | TokenKind::LessEqual
        | TokenKind::Greater
        | TokenKind::GreaterEqual
        | TokenKind::EqualEqual
        | TokenKind::BangEqual => (5, 6),
        TokenKind::Plus | TokenKind::Minus => (7, 8),
        TokenKind::Star | TokenKind::Slash => (9, 10),
        TokenKind::Caret => (14, 13),
        _ => return None,
    };
    Some(bp)
}

impl Display for Expr<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Literal { value, suffix } => write!(f, "{value}{suffix}"),
            Expr::Template(parts) => {
                write!(f, "\"")?;
                for part in parts {
                    match part {
                        TemplatePart::Text(t) => write!(f, "{t}")?,
                        TemplatePart::Expr(e) => write!(f, "{{{e}}}")?,
                    }
                }
                write!(f, "\"")
            }
            Expr::Ident(name) => write!(f, "{name}"),
            Expr::Assign { name, value } => write!(f, "(= {name} {value})"),
            Expr::Unary {
                op: UnOp::Neg,
                operand,
            } => write!(f, "(- {operand})"),
            Expr::Binary { op, lhs, rhs } => {
                let sym = match op {
                    BinOp::Add => "+",
                    BinOp::Sub => "-",
                    BinOp::Mul => "*",
                    BinOp::Div => "/",
                    BinOp::Pow => "^",
                    BinOp::PlusMinus => "±",
                    BinOp::Less => "<",
                    BinOp::LessEqual => "<=",
                    BinOp::Greater => ">",
                    BinOp::GreaterEqual => ">=",
                    BinOp::EqualEqual => "==",
                    BinOp::BangEqual => "!=",
                };
                write!(f, "({sym} {lhs} {rhs})")
            }
            Expr::Coerce { operand, unit } => write!(f, "(|{unit}| {operand})"),
            Expr::Call { name, args } => {
                write!(f, "({name}")?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                write!(f, ")")
            }
            Expr::Block(block) => write!(f, "{block}"),
            Expr::If {
                condition,
                then_block,
                else_block,
            } => {
                write!(f, "(if {condition} {then_block}")?;
                if let Some(else_block) = else_block {
                    write!(f, " {else_block}")?;
                }
                write!(f, ")")
            }
            Expr::While { condition, body } => write!(f, "(while {condition} {body})"),
            Expr::MatrixLit(rows) => {
                write!(f, "[")?;
                for (i, row) in rows.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    for (j, cell) in row.iter().enumerate() {
                        if j > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{cell}")?;
                    }
                }
                write!(f, "]")
            }
            Expr::Index { target, indices } => {
                write!(f, "(index {target}")?;
                for idx in indices {
                    write!(f, " {idx}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl Display for Block<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for statement in &self.statements {
            write!(f, " {statement};")?;
        }
        if let Some(tail) = &self.tail {
            write!(f, " {tail}")?;
        }
        write!(f, " }}")
    }
}

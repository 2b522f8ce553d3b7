// Formula language - lexer and recursive-descent parser
//
// Grammar (lowest precedence first):
//
//   expr        := or ( "?" expr ":" expr )?
//   or          := and ( "||" and )*
//   and         := equality ( "&&" equality )*
//   equality    := comparison ( ("==" | "!=") comparison )*
//   comparison  := additive ( ("<" | "<=" | ">" | ">=") additive )*
//   additive    := term ( ("+" | "-") term )*
//   term        := unary ( ("*" | "/" | "%") unary )*
//   unary       := ("-" | "!") unary | postfix
//   postfix     := primary ( "." IDENT )*
//   primary     := NUMBER | STRING | "true" | "false" | "null" | IDENT | "(" expr ")"

use crate::formula::types::{BinaryOp, Expr, Formula, UnaryOp};
use thiserror::Error;

/// Maximum depth of the parsed tree
///
/// Parentheses, unary operators, ternaries, every operator in a binary chain
/// and every `.field` each count one level. Evaluation recurses over the tree,
/// so the bound keeps it off the end of the stack.
const MAX_NESTING: usize = 128;

/// Errors raised while parsing formula text
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("Formula is empty")]
    Empty,

    #[error("Unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },

    #[error("Unterminated string literal starting at offset {0}")]
    UnterminatedString(usize),

    #[error("Invalid number literal '{0}'")]
    InvalidNumber(String),

    #[error("Unexpected token '{found}' at offset {offset}, expected {expected}")]
    UnexpectedToken {
        found: String,
        offset: usize,
        expected: &'static str,
    },

    #[error("Unexpected end of formula, expected {0}")]
    UnexpectedEnd(&'static str),

    #[error("Formula nesting exceeds maximum depth ({0})")]
    TooDeep(usize),
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Number(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    LParen,
    RParen,
    Dot,
    Question,
    Colon,
    Bang,
    Op(BinaryOp),
}

impl Tok {
    fn describe(&self) -> String {
        match self {
            Tok::Number(n) => n.to_string(),
            Tok::Str(s) => format!("\"{}\"", s),
            Tok::Ident(s) => s.clone(),
            Tok::True => "true".into(),
            Tok::False => "false".into(),
            Tok::Null => "null".into(),
            Tok::LParen => "(".into(),
            Tok::RParen => ")".into(),
            Tok::Dot => ".".into(),
            Tok::Question => "?".into(),
            Tok::Colon => ":".into(),
            Tok::Bang => "!".into(),
            Tok::Op(op) => op.symbol().into(),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<(Tok, usize)>, ParseError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, ch) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);

        if ch.is_whitespace() {
            i += 1;
            continue;
        }

        if ch.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].1.is_ascii_digit() || chars[i].1 == '.') {
                // A dot followed by a non-digit is field access, not a decimal point
                if chars[i].1 == '.'
                    && !chars.get(i + 1).map(|(_, c)| c.is_ascii_digit()).unwrap_or(false)
                {
                    break;
                }
                i += 1;
            }
            let text: String = chars[start..i].iter().map(|(_, c)| *c).collect();
            let number = text
                .parse::<f64>()
                .map_err(|_| ParseError::InvalidNumber(text.clone()))?;
            tokens.push((Tok::Number(number), offset));
            continue;
        }

        if ch.is_alphabetic() || ch == '_' || ch == '$' {
            let start = i;
            while i < chars.len()
                && (chars[i].1.is_alphanumeric() || chars[i].1 == '_' || chars[i].1 == '$')
            {
                i += 1;
            }
            let word: String = chars[start..i].iter().map(|(_, c)| *c).collect();
            let tok = match word.as_str() {
                "true" => Tok::True,
                "false" => Tok::False,
                "null" => Tok::Null,
                _ => Tok::Ident(word),
            };
            tokens.push((tok, offset));
            continue;
        }

        if ch == '"' || ch == '\'' {
            let quote = ch;
            let mut text = String::new();
            i += 1;
            let mut closed = false;
            while i < chars.len() {
                let c = chars[i].1;
                if c == '\\' {
                    if let Some((_, escaped)) = chars.get(i + 1) {
                        text.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            other => *other,
                        });
                        i += 2;
                        continue;
                    }
                }
                if c == quote {
                    closed = true;
                    i += 1;
                    break;
                }
                text.push(c);
                i += 1;
            }
            if !closed {
                return Err(ParseError::UnterminatedString(offset));
            }
            tokens.push((Tok::Str(text), offset));
            continue;
        }

        let (tok, width) = match (ch, next) {
            ('=', Some('=')) => (Tok::Op(BinaryOp::Eq), 2),
            ('!', Some('=')) => (Tok::Op(BinaryOp::Ne), 2),
            ('<', Some('=')) => (Tok::Op(BinaryOp::Le), 2),
            ('>', Some('=')) => (Tok::Op(BinaryOp::Ge), 2),
            ('&', Some('&')) => (Tok::Op(BinaryOp::And), 2),
            ('|', Some('|')) => (Tok::Op(BinaryOp::Or), 2),
            ('<', _) => (Tok::Op(BinaryOp::Lt), 1),
            ('>', _) => (Tok::Op(BinaryOp::Gt), 1),
            ('+', _) => (Tok::Op(BinaryOp::Add), 1),
            ('-', _) => (Tok::Op(BinaryOp::Sub), 1),
            ('*', _) => (Tok::Op(BinaryOp::Mul), 1),
            ('/', _) => (Tok::Op(BinaryOp::Div), 1),
            ('%', _) => (Tok::Op(BinaryOp::Rem), 1),
            ('!', _) => (Tok::Bang, 1),
            ('(', _) => (Tok::LParen, 1),
            (')', _) => (Tok::RParen, 1),
            ('.', _) => (Tok::Dot, 1),
            ('?', _) => (Tok::Question, 1),
            (':', _) => (Tok::Colon, 1),
            _ => return Err(ParseError::UnexpectedChar { ch, offset }),
        };
        tokens.push((tok, offset));
        i += width;
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Tok, usize)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn advance(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        self.pos += 1;
        tok
    }

    fn expect(&mut self, wanted: Tok, expected: &'static str) -> Result<(), ParseError> {
        match self.tokens.get(self.pos) {
            Some((tok, _)) if *tok == wanted => {
                self.pos += 1;
                Ok(())
            }
            Some((tok, offset)) => Err(ParseError::UnexpectedToken {
                found: tok.describe(),
                offset: *offset,
                expected,
            }),
            None => Err(ParseError::UnexpectedEnd(expected)),
        }
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(ParseError::TooDeep(MAX_NESTING));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn expr(&mut self) -> Result<Expr, ParseError> {
        self.enter()?;
        let condition = self.binary_level(0)?;
        let result = if self.peek() == Some(&Tok::Question) {
            self.advance();
            let then_branch = self.expr()?;
            self.expect(Tok::Colon, "':' in conditional")?;
            let else_branch = self.expr()?;
            Expr::Conditional {
                condition: Box::new(condition),
                then_branch: Box::new(then_branch),
                else_branch: Box::new(else_branch),
            }
        } else {
            condition
        };
        self.leave();
        Ok(result)
    }

    /// Precedence climbing over the binary operator table
    fn binary_level(&mut self, level: usize) -> Result<Expr, ParseError> {
        const LEVELS: [&[BinaryOp]; 6] = [
            &[BinaryOp::Or],
            &[BinaryOp::And],
            &[BinaryOp::Eq, BinaryOp::Ne],
            &[BinaryOp::Lt, BinaryOp::Le, BinaryOp::Gt, BinaryOp::Ge],
            &[BinaryOp::Add, BinaryOp::Sub],
            &[BinaryOp::Mul, BinaryOp::Div, BinaryOp::Rem],
        ];

        if level == LEVELS.len() {
            return self.unary();
        }

        let mut left = self.binary_level(level + 1)?;
        let mut chained = 0;
        loop {
            let op = match self.peek() {
                Some(Tok::Op(op)) if LEVELS[level].contains(op) => *op,
                _ => break,
            };
            self.advance();
            // Each operator pushes the left operand one level down
            self.enter()?;
            chained += 1;
            let right = self.binary_level(level + 1)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        self.depth -= chained;
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek() {
            Some(Tok::Op(BinaryOp::Sub)) => Some(UnaryOp::Neg),
            Some(Tok::Bang) => Some(UnaryOp::Not),
            _ => None,
        };

        match op {
            Some(op) => {
                self.advance();
                self.enter()?;
                let operand = self.unary()?;
                self.leave();
                Ok(Expr::Unary {
                    op,
                    operand: Box::new(operand),
                })
            }
            None => self.postfix(),
        }
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.primary()?;
        let mut chained = 0;
        while self.peek() == Some(&Tok::Dot) {
            self.advance();
            match self.tokens.get(self.pos).cloned() {
                Some((Tok::Ident(field), _)) => {
                    self.pos += 1;
                    self.enter()?;
                    chained += 1;
                    expr = Expr::Field {
                        target: Box::new(expr),
                        field,
                    };
                }
                Some((tok, offset)) => {
                    return Err(ParseError::UnexpectedToken {
                        found: tok.describe(),
                        offset,
                        expected: "field name after '.'",
                    })
                }
                None => return Err(ParseError::UnexpectedEnd("field name after '.'")),
            }
        }
        self.depth -= chained;
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let (tok, offset) = match self.tokens.get(self.pos).cloned() {
            Some(entry) => entry,
            None => return Err(ParseError::UnexpectedEnd("a value")),
        };
        self.pos += 1;

        match tok {
            Tok::Number(n) => Ok(Expr::Literal(number_literal(n))),
            Tok::Str(s) => Ok(Expr::Literal(serde_json::Value::String(s))),
            Tok::True => Ok(Expr::Literal(serde_json::Value::Bool(true))),
            Tok::False => Ok(Expr::Literal(serde_json::Value::Bool(false))),
            Tok::Null => Ok(Expr::Literal(serde_json::Value::Null)),
            Tok::Ident(name) => Ok(Expr::Binding(name)),
            Tok::LParen => {
                let inner = self.expr()?;
                self.expect(Tok::RParen, "')'")?;
                Ok(inner)
            }
            other => Err(ParseError::UnexpectedToken {
                found: other.describe(),
                offset,
                expected: "a value",
            }),
        }
    }
}

/// Integral literals stay JSON integers so `2` compares and prints as `2`
fn number_literal(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Value::from(n)
    }
}

/// Parse formula text into a [`Formula`]
///
/// # Example
///
/// ```rust
/// use workflow_simulator_core_rs::formula::parse_formula;
///
/// let formula = parse_formula("a + b * 2").unwrap();
/// assert!(formula.bindings().contains("a"));
/// assert!(formula.bindings().contains("b"));
/// ```
pub fn parse_formula(source: &str) -> Result<Formula, ParseError> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(ParseError::Empty);
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.expr()?;

    if let Some((tok, offset)) = parser.tokens.get(parser.pos) {
        return Err(ParseError::UnexpectedToken {
            found: tok.describe(),
            offset: *offset,
            expected: "end of formula",
        });
    }

    Ok(Formula::new(source.to_string(), expr))
}

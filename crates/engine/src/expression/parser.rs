//! Pratt parser producing the expression syntax tree.

use serde_json::Value;

use super::ExpressionSyntaxError;
use super::functions::Function;
use super::lexer::{Token, TokenKind, tokenize};

/// Variable namespaces an expression may read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Root {
    Model,
    Config,
    Response,
}

impl Root {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "model" => Some(Root::Model),
            "config" => Some(Root::Config),
            "response" => Some(Root::Response),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Root::Model => "model",
            Root::Config => "config",
            Root::Response => "response",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

impl BinaryOp {
    pub(crate) fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Remainder => "%",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Value),
    Root(Root),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Coalesce(Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(Function, Vec<Expr>),
}

impl Expr {
    /// Collects the namespaces referenced anywhere in the tree.
    pub(crate) fn roots(&self, into: &mut Vec<Root>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Root(root) => {
                if !into.contains(root) {
                    into.push(*root);
                }
            }
            Expr::Member(target, _) | Expr::Unary(_, target) => target.roots(into),
            Expr::Index(left, right)
            | Expr::Binary(_, left, right)
            | Expr::And(left, right)
            | Expr::Or(left, right)
            | Expr::Coalesce(left, right) => {
                left.roots(into);
                right.roots(into);
            }
            Expr::Conditional(condition, then, otherwise) => {
                condition.roots(into);
                then.roots(into);
                otherwise.roots(into);
            }
            Expr::Call(_, args) => args.iter().for_each(|arg| arg.roots(into)),
        }
    }
}

// Binding powers, lowest first.
const TERNARY: u8 = 1;
const COALESCE: u8 = 2;
const OR: u8 = 3;
const AND: u8 = 4;
const EQUALITY: u8 = 5;
const COMPARISON: u8 = 6;
const ADDITIVE: u8 = 7;
const MULTIPLICATIVE: u8 = 8;
const PREFIX: u8 = 9;

/// Parses a complete expression.
pub(crate) fn parse(source: &str) -> Result<Expr, ExpressionSyntaxError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        source,
        tokens,
        position: 0,
    };
    let expr = parser.expression(0)?;
    let trailing = parser.peek();
    if trailing.kind != TokenKind::Eof {
        return Err(parser.error_at(trailing, format!("unexpected {}", trailing.kind.describe())));
    }
    Ok(expr)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    position: usize,
}

impl Parser<'_> {
    fn peek(&self) -> &Token {
        // The token list always ends with Eof, which is never consumed.
        &self.tokens[self.position.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.position += 1;
        }
        token
    }

    fn error_at(&self, token: &Token, message: impl Into<String>) -> ExpressionSyntaxError {
        ExpressionSyntaxError::new(self.source, token.offset, message)
    }

    fn expect(&mut self, kind: TokenKind, context: &str) -> Result<Token, ExpressionSyntaxError> {
        let token = self.advance();
        if token.kind == kind {
            Ok(token)
        } else {
            Err(self.error_at(&token, format!("expected {} {context}, found {}", kind.describe(), token.kind.describe())))
        }
    }

    fn expression(&mut self, min_power: u8) -> Result<Expr, ExpressionSyntaxError> {
        let mut left = self.prefix()?;
        loop {
            let kind = self.peek().kind.clone();
            let Some(power) = infix_power(&kind) else {
                break;
            };
            if power <= min_power {
                break;
            }
            self.advance();
            left = match kind {
                TokenKind::Question => {
                    let then = self.expression(0)?;
                    self.expect(TokenKind::Colon, "in conditional expression")?;
                    let otherwise = self.expression(TERNARY - 1)?;
                    Expr::Conditional(Box::new(left), Box::new(then), Box::new(otherwise))
                }
                TokenKind::QuestionQuestion => {
                    let right = self.expression(COALESCE - 1)?;
                    Expr::Coalesce(Box::new(left), Box::new(right))
                }
                TokenKind::OrOr => Expr::Or(Box::new(left), Box::new(self.expression(OR)?)),
                TokenKind::AndAnd => Expr::And(Box::new(left), Box::new(self.expression(AND)?)),
                other => {
                    let op = binary_op(&other);
                    let right = self.expression(power)?;
                    Expr::Binary(op, Box::new(left), Box::new(right))
                }
            };
        }
        Ok(left)
    }

    fn prefix(&mut self) -> Result<Expr, ExpressionSyntaxError> {
        let token = self.advance();
        let expr = match token.kind {
            TokenKind::Number(number) => Expr::Literal(Value::Number(number)),
            TokenKind::Str(text) => Expr::Literal(Value::String(text)),
            TokenKind::Bang => Expr::Unary(UnaryOp::Not, Box::new(self.expression(PREFIX)?)),
            TokenKind::Minus => Expr::Unary(UnaryOp::Negate, Box::new(self.expression(PREFIX)?)),
            TokenKind::LParen => {
                let inner = self.expression(0)?;
                self.expect(TokenKind::RParen, "to close group")?;
                inner
            }
            TokenKind::Ident(ref name) => match name.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "null" => Expr::Literal(Value::Null),
                _ if self.peek().kind == TokenKind::LParen => self.call(&token, name)?,
                _ => match Root::parse(name) {
                    Some(root) => Expr::Root(root),
                    None => {
                        return Err(self.error_at(
                            &token,
                            format!("unknown root '{name}'; expected model, config or response"),
                        ));
                    }
                },
            },
            ref other => return Err(self.error_at(&token, format!("unexpected {}", other.describe()))),
        };
        self.postfix(expr)
    }

    fn call(&mut self, token: &Token, name: &str) -> Result<Expr, ExpressionSyntaxError> {
        let Some(function) = Function::lookup(name) else {
            return Err(self.error_at(token, format!("unknown function '{name}'")));
        };
        self.expect(TokenKind::LParen, "after function name")?;
        let mut args = Vec::new();
        if self.peek().kind != TokenKind::RParen {
            loop {
                args.push(self.expression(0)?);
                if self.peek().kind == TokenKind::Comma {
                    self.advance();
                    continue;
                }
                break;
            }
        }
        self.expect(TokenKind::RParen, "to close argument list")?;
        let (min, max) = function.arity();
        if args.len() < min || max.is_some_and(|max| args.len() > max) {
            let expected = match max {
                Some(max) if max == min => format!("{min}"),
                Some(max) => format!("{min} to {max}"),
                None => format!("at least {min}"),
            };
            return Err(self.error_at(
                token,
                format!("function '{name}' expects {expected} argument(s), got {}", args.len()),
            ));
        }
        Ok(Expr::Call(function, args))
    }

    fn postfix(&mut self, mut expr: Expr) -> Result<Expr, ExpressionSyntaxError> {
        loop {
            match self.peek().kind {
                TokenKind::Dot => {
                    self.advance();
                    let token = self.advance();
                    let TokenKind::Ident(name) = token.kind else {
                        return Err(self.error_at(&token, "expected a field name after '.'"));
                    };
                    expr = Expr::Member(Box::new(expr), name);
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.expression(0)?;
                    self.expect(TokenKind::RBracket, "to close index")?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                _ => return Ok(expr),
            }
        }
    }
}

/// Returns the binding power of an infix operator.
///
/// `?:` and `??` recurse one power lower on their right side, which makes them
/// right-associative; every other operator is left-associative.
fn infix_power(kind: &TokenKind) -> Option<u8> {
    let power = match kind {
        TokenKind::Question => TERNARY,
        TokenKind::QuestionQuestion => COALESCE,
        TokenKind::OrOr => OR,
        TokenKind::AndAnd => AND,
        TokenKind::EqEq | TokenKind::NotEq => EQUALITY,
        TokenKind::Lt | TokenKind::Le | TokenKind::Gt | TokenKind::Ge => COMPARISON,
        TokenKind::Plus | TokenKind::Minus => ADDITIVE,
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent => MULTIPLICATIVE,
        _ => return None,
    };
    Some(power)
}

fn binary_op(kind: &TokenKind) -> BinaryOp {
    match kind {
        TokenKind::Plus => BinaryOp::Add,
        TokenKind::Minus => BinaryOp::Subtract,
        TokenKind::Star => BinaryOp::Multiply,
        TokenKind::Slash => BinaryOp::Divide,
        TokenKind::Percent => BinaryOp::Remainder,
        TokenKind::EqEq => BinaryOp::Equal,
        TokenKind::NotEq => BinaryOp::NotEqual,
        TokenKind::Lt => BinaryOp::Less,
        TokenKind::Le => BinaryOp::LessEqual,
        TokenKind::Gt => BinaryOp::Greater,
        _ => BinaryOp::GreaterEqual,
    }
}

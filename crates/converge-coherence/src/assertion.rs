//! A restricted-grammar assertion evaluator. Tokens are limited to
//! `result`/`baseline`, the six comparison operators, parentheses, and
//! case-insensitive `AND`/`OR` — deliberately not a general-purpose
//! expression evaluator, per the harness's safety contract.

#[derive(Debug, Clone, Copy, PartialEq)]
enum Operand {
    Result,
    Baseline,
    Number(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CmpOp {
    Ge,
    Le,
    Eq,
    Ne,
    Gt,
    Lt,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Comparison {
    left: Operand,
    op: CmpOp,
    right: Operand,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Cmp(Comparison),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Op(CmpOp),
    LParen,
    RParen,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError(pub String);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EvalError {
    MissingBaseline,
}

fn tokenize(src: &str) -> Result<Vec<Token>, ParseError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '(' {
            tokens.push(Token::LParen);
            i += 1;
            continue;
        }
        if c == ')' {
            tokens.push(Token::RParen);
            i += 1;
            continue;
        }
        if c == '>' || c == '<' || c == '=' || c == '!' {
            let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
            let op = match two.as_str() {
                ">=" => Some((CmpOp::Ge, 2)),
                "<=" => Some((CmpOp::Le, 2)),
                "==" => Some((CmpOp::Eq, 2)),
                "!=" => Some((CmpOp::Ne, 2)),
                _ => match c {
                    '>' => Some((CmpOp::Gt, 1)),
                    '<' => Some((CmpOp::Lt, 1)),
                    _ => None,
                },
            };
            match op {
                Some((op, len)) => {
                    tokens.push(Token::Op(op));
                    i += len;
                }
                None => return Err(ParseError(format!("unexpected character '{c}' at {i}"))),
            }
            continue;
        }
        if c.is_ascii_digit() || c == '-' || c == '.' {
            let start = i;
            i += 1;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let s: String = chars[start..i].iter().collect();
            let n = s
                .parse::<f64>()
                .map_err(|_| ParseError(format!("invalid number literal '{s}'")))?;
            tokens.push(Token::Number(n));
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let start = i;
            i += 1;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let s: String = chars[start..i].iter().collect();
            tokens.push(Token::Ident(s));
            continue;
        }
        return Err(ParseError(format!("unexpected character '{c}' at {i}")));
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s.eq_ignore_ascii_case(kw))
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;
        while self.peek_keyword("or") {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_atom()?;
        while self.peek_keyword("and") {
            self.advance();
            let right = self.parse_atom()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_atom(&mut self) -> Result<Expr, ParseError> {
        if matches!(self.peek(), Some(Token::LParen)) {
            self.advance();
            let inner = self.parse_expr()?;
            match self.advance() {
                Some(Token::RParen) => return Ok(inner),
                _ => return Err(ParseError("expected closing parenthesis".to_string())),
            }
        }
        self.parse_comparison()
    }

    fn parse_operand(&mut self) -> Result<Operand, ParseError> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Operand::Number(n)),
            Some(Token::Ident(s)) if s.eq_ignore_ascii_case("result") => Ok(Operand::Result),
            Some(Token::Ident(s)) if s.eq_ignore_ascii_case("baseline") => Ok(Operand::Baseline),
            other => Err(ParseError(format!("expected operand, found {other:?}"))),
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_operand()?;
        let op = match self.advance() {
            Some(Token::Op(op)) => op,
            other => return Err(ParseError(format!("expected comparison operator, found {other:?}"))),
        };
        let right = self.parse_operand()?;
        Ok(Expr::Cmp(Comparison { left, op, right }))
    }
}

pub fn parse_assertion(src: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(ParseError("trailing tokens after expression".to_string()));
    }
    Ok(expr)
}

fn resolve(op: Operand, result: f64, baseline: Option<f64>) -> Result<f64, EvalError> {
    match op {
        Operand::Result => Ok(result),
        Operand::Baseline => baseline.ok_or(EvalError::MissingBaseline),
        Operand::Number(n) => Ok(n),
    }
}

fn eval_cmp(cmp: &Comparison, result: f64, baseline: Option<f64>) -> Result<bool, EvalError> {
    let l = resolve(cmp.left, result, baseline)?;
    let r = resolve(cmp.right, result, baseline)?;
    Ok(match cmp.op {
        CmpOp::Ge => l >= r,
        CmpOp::Le => l <= r,
        CmpOp::Eq => (l - r).abs() < f64::EPSILON,
        CmpOp::Ne => (l - r).abs() >= f64::EPSILON,
        CmpOp::Gt => l > r,
        CmpOp::Lt => l < r,
    })
}

pub fn eval(expr: &Expr, result: f64, baseline: Option<f64>) -> Result<bool, EvalError> {
    match expr {
        Expr::Cmp(c) => eval_cmp(c, result, baseline),
        Expr::And(a, b) => Ok(eval(a, result, baseline)? && eval(b, result, baseline)?),
        Expr::Or(a, b) => Ok(eval(a, result, baseline)? || eval(b, result, baseline)?),
    }
}

/// Parse + evaluate in one step. Any parse error, or a reference to a
/// missing baseline, is a conservative pass — logged, never propagated.
pub fn evaluate_assertion(assertion: &str, result: f64, baseline: Option<f64>) -> bool {
    match parse_assertion(assertion) {
        Ok(expr) => match eval(&expr, result, baseline) {
            Ok(b) => b,
            Err(EvalError::MissingBaseline) => {
                tracing::warn!(assertion, "baseline referenced but unavailable; treating as pass");
                true
            }
        },
        Err(e) => {
            tracing::warn!(assertion, error = %e.0, "unparsable assertion; treating as pass");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_comparison() {
        assert!(evaluate_assertion("result >= baseline", 10.0, Some(5.0)));
        assert!(!evaluate_assertion("result >= baseline", 1.0, Some(5.0)));
    }

    #[test]
    fn and_or_case_insensitive() {
        assert!(evaluate_assertion("result > 0 AND result < 100", 50.0, None));
        assert!(evaluate_assertion("result > 100 or result < 100", 50.0, None));
        assert!(!evaluate_assertion("result > 100 and result < 10", 50.0, None));
    }

    #[test]
    fn parenthesized_precedence() {
        assert!(evaluate_assertion("(result > 0 AND result < 10) OR result == 50", 50.0, None));
    }

    #[test]
    fn missing_baseline_is_conservative_pass() {
        assert!(evaluate_assertion("result >= baseline", 1.0, None));
    }

    #[test]
    fn unparsable_expression_is_conservative_pass() {
        assert!(evaluate_assertion("result ~~ baseline", 1.0, Some(1.0)));
    }
}

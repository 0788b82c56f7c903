//! Trigger expression parsing (C5, parse half): `"A and (B or C)"`,
//! `"seq(A,B)"` -> tokens -> shunting-yard -> binary tree.
//!
//! The tree built here ([`ExprNode`]) is operator-only; [`crate::graph`] wires
//! its leaves to concrete [`crate::trigger::TriggerDefinition`]s and turns it
//! into the predecessor/successor [`crate::graph::TriggerGraph`] the state
//! machine walks.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExprError {
    #[error("unexpected character {0:?} in trigger expression")]
    UnexpectedChar(char),
    #[error("unbalanced parentheses in trigger expression")]
    UnbalancedParens,
    #[error("empty trigger expression")]
    Empty,
    #[error("seq(...) requires at least one trigger name")]
    EmptySeq,
    #[error("dangling operator in trigger expression")]
    DanglingOperator,
    #[error("expected trigger name or '(' but found {0:?}")]
    ExpectedOperand(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprNode {
    Leaf(String),
    And(Box<ExprNode>, Box<ExprNode>),
    Or(Box<ExprNode>, Box<ExprNode>),
    /// `seq(a, b, ...)`: left-to-right ordered satisfaction, spec.md §4.4.
    Seq(Vec<ExprNode>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Seq(Vec<String>),
    And,
    Or,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
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
        if c.is_alphanumeric() || c == '_' || c == '-' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '-') {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            match word.as_str() {
                "and" => tokens.push(Token::And),
                "or" => tokens.push(Token::Or),
                "seq" => {
                    let mut j = i;
                    while j < chars.len() && chars[j].is_whitespace() {
                        j += 1;
                    }
                    if j >= chars.len() || chars[j] != '(' {
                        return Err(ExprError::ExpectedOperand("seq without (".to_string()));
                    }
                    j += 1;
                    let args_start = j;
                    let mut depth = 1;
                    while j < chars.len() && depth > 0 {
                        match chars[j] {
                            '(' => depth += 1,
                            ')' => depth -= 1,
                            _ => {}
                        }
                        if depth > 0 {
                            j += 1;
                        }
                    }
                    if depth != 0 {
                        return Err(ExprError::UnbalancedParens);
                    }
                    let inner: String = chars[args_start..j].iter().collect();
                    let names: Vec<String> = inner
                        .split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect();
                    if names.is_empty() {
                        return Err(ExprError::EmptySeq);
                    }
                    tokens.push(Token::Seq(names));
                    i = j + 1;
                    continue;
                }
                _ => tokens.push(Token::Ident(word)),
            }
            continue;
        }
        return Err(ExprError::UnexpectedChar(c));
    }
    Ok(tokens)
}

fn precedence(op: &Token) -> u8 {
    match op {
        Token::And => 2,
        Token::Or => 1,
        _ => 0,
    }
}

/// Shunting-yard: infix tokens -> RPN (postfix) token stream.
fn to_postfix(tokens: Vec<Token>) -> Result<Vec<Token>, ExprError> {
    let mut output = Vec::new();
    let mut ops: Vec<Token> = Vec::new();
    for tok in tokens {
        match tok {
            Token::Ident(_) | Token::Seq(_) => output.push(tok),
            Token::And | Token::Or => {
                while let Some(top) = ops.last() {
                    if matches!(top, Token::And | Token::Or) && precedence(top) >= precedence(&tok) {
                        output.push(ops.pop().unwrap());
                    } else {
                        break;
                    }
                }
                ops.push(tok);
            }
            Token::LParen => ops.push(tok),
            Token::RParen => {
                let mut found = false;
                while let Some(top) = ops.pop() {
                    if matches!(top, Token::LParen) {
                        found = true;
                        break;
                    }
                    output.push(top);
                }
                if !found {
                    return Err(ExprError::UnbalancedParens);
                }
            }
        }
    }
    while let Some(top) = ops.pop() {
        if matches!(top, Token::LParen | Token::RParen) {
            return Err(ExprError::UnbalancedParens);
        }
        output.push(top);
    }
    Ok(output)
}

/// RPN -> binary tree.
fn build_tree(postfix: Vec<Token>) -> Result<ExprNode, ExprError> {
    let mut stack: Vec<ExprNode> = Vec::new();
    for tok in postfix {
        match tok {
            Token::Ident(name) => stack.push(ExprNode::Leaf(name)),
            Token::Seq(names) => stack.push(ExprNode::Seq(names.into_iter().map(ExprNode::Leaf).collect())),
            Token::And => {
                let rhs = stack.pop().ok_or(ExprError::DanglingOperator)?;
                let lhs = stack.pop().ok_or(ExprError::DanglingOperator)?;
                stack.push(ExprNode::And(Box::new(lhs), Box::new(rhs)));
            }
            Token::Or => {
                let rhs = stack.pop().ok_or(ExprError::DanglingOperator)?;
                let lhs = stack.pop().ok_or(ExprError::DanglingOperator)?;
                stack.push(ExprNode::Or(Box::new(lhs), Box::new(rhs)));
            }
            Token::LParen | Token::RParen => unreachable!("parens are consumed by to_postfix"),
        }
    }
    if stack.len() != 1 {
        return Err(ExprError::DanglingOperator);
    }
    Ok(stack.pop().unwrap())
}

/// Parses a full trigger expression, e.g. `"a and (b or seq(c,d))"`.
pub fn parse_expression(input: &str) -> Result<ExprNode, ExprError> {
    if input.trim().is_empty() {
        return Err(ExprError::Empty);
    }
    let tokens = tokenize(input)?;
    let postfix = to_postfix(tokens)?;
    build_tree(postfix)
}

//! Recursive-descent parser for the mapping template language.
//!
//! Body text is scanned character by character; `$` starts a reference and
//! `#` a directive or comment. Directive arguments use a small expression
//! grammar. Nesting of blocks and expressions is capped at compile time, and
//! directives that could recurse or pull in other templates are rejected.

use super::ast::{Accessor, BinaryOp, Expr, Node, Reference};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors produced while compiling or evaluating a template.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TemplateError {
    /// The template text is malformed.
    #[error("Template syntax error at line {line}: {message}")]
    Syntax {
        /// 1-based line of the error.
        line: usize,
        /// Explanation.
        message: String,
    },
    /// A directive outside the supported subset was used.
    #[error("Directive #{directive} is not supported (line {line})")]
    Forbidden {
        /// Directive name.
        directive: String,
        /// 1-based line.
        line: usize,
    },
    /// A reference named an unknown variable, property or method.
    #[error("Unresolvable reference {reference}")]
    Unresolvable {
        /// The reference text or method description.
        reference: String,
    },
    /// An operator or method got a value of the wrong type.
    #[error("{message}")]
    Type {
        /// Explanation.
        message: String,
    },
    /// A step, depth, iteration or output cap was hit.
    #[error("Template exceeded its {limit} limit of {max}")]
    LimitExceeded {
        /// Which cap.
        limit: &'static str,
        /// The cap.
        max: usize,
    },
    /// Raised by `$util.error` or a failed `$util.validate`.
    #[error("{message}")]
    Custom {
        /// Client-visible message.
        message: String,
        /// Client-visible error type.
        error_type: Option<String>,
        /// Extra data.
        data: Option<serde_json::Value>,
        /// Extra info.
        error_info: Option<serde_json::Value>,
    },
    /// Raised by `$util.unauthorized()`.
    #[error("Not Authorized to access this field")]
    Unauthorized,
}

impl TemplateError {
    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        Self::Type {
            message: message.into(),
        }
    }
}

const FORBIDDEN_DIRECTIVES: &[&str] = &["macro", "define", "include", "parse", "evaluate"];

/// How a block ended.
enum Terminator {
    Eof,
    End,
    Else,
    ElseIf(Expr),
}

/// Parse template text into nodes.
///
/// # Errors
///
/// Returns `TemplateError::Syntax`, `TemplateError::Forbidden`, or
/// `TemplateError::LimitExceeded` when nesting exceeds `max_depth`.
pub fn parse_template(source: &str, max_depth: usize) -> Result<Vec<Node>, TemplateError> {
    let mut parser = Parser::new(source, max_depth);
    let (nodes, terminator) = parser.parse_block()?;
    match terminator {
        Terminator::Eof => Ok(nodes),
        Terminator::End => Err(parser.syntax("#end without a matching block")),
        Terminator::Else | Terminator::ElseIf(_) => {
            Err(parser.syntax("#else or #elseif without a matching #if"))
        }
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
    max_depth: usize,
}

impl Parser {
    fn new(source: &str, max_depth: usize) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            depth: 0,
            max_depth,
        }
    }

    // -- Cursor helpers --

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn line(&self) -> usize {
        self.chars[..self.pos.min(self.chars.len())]
            .iter()
            .filter(|c| **c == '\n')
            .count()
            + 1
    }

    fn syntax(&self, message: impl Into<String>) -> TemplateError {
        TemplateError::Syntax {
            line: self.line(),
            message: message.into(),
        }
    }

    fn enter(&mut self) -> Result<(), TemplateError> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(TemplateError::LimitExceeded {
                limit: "nesting",
                max: self.max_depth,
            });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, token: &str) -> bool {
        let matches = token
            .chars()
            .enumerate()
            .all(|(i, c)| self.peek_at(i) == Some(c));
        if matches {
            self.pos += token.chars().count();
        }
        matches
    }

    fn eat_word(&mut self, word: &str) -> bool {
        let len = word.chars().count();
        let matches = word
            .chars()
            .enumerate()
            .all(|(i, c)| self.peek_at(i) == Some(c))
            && !self.peek_at(len).is_some_and(is_ident_char);
        if matches {
            self.pos += len;
        }
        matches
    }

    fn expect(&mut self, c: char) -> Result<(), TemplateError> {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.syntax(format!(
                "expected '{c}', found {}",
                self.peek().map_or_else(|| "end of template".to_owned(), |f| format!("'{f}'"))
            )))
        }
    }

    fn identifier(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_char) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    // -- Body text --

    fn parse_block(&mut self) -> Result<(Vec<Node>, Terminator), TemplateError> {
        let mut nodes = Vec::new();
        let mut text = String::new();

        while let Some(c) = self.peek() {
            match c {
                '\\' if matches!(self.peek_at(1), Some('$' | '#')) => {
                    text.extend(self.peek_at(1));
                    self.pos += 2;
                }
                '$' => match self.try_reference()? {
                    Some(reference) => {
                        flush_text(&mut text, &mut nodes);
                        nodes.push(Node::Reference(reference));
                    }
                    None => {
                        text.push('$');
                        self.pos += 1;
                    }
                },
                '#' if self.peek_at(1) == Some('#') => self.skip_line_comment(),
                '#' if self.peek_at(1) == Some('*') => self.skip_block_comment()?,
                '#' => {
                    let Some((name, len)) = self.directive_name() else {
                        text.push('#');
                        self.pos += 1;
                        continue;
                    };
                    if FORBIDDEN_DIRECTIVES.contains(&name.as_str()) {
                        return Err(TemplateError::Forbidden {
                            directive: name,
                            line: self.line(),
                        });
                    }
                    if !matches!(
                        name.as_str(),
                        "set" | "if" | "elseif" | "else" | "end" | "foreach" | "break" | "return"
                    ) {
                        text.push('#');
                        self.pos += 1;
                        continue;
                    }
                    flush_text(&mut text, &mut nodes);
                    self.pos += len;
                    match name.as_str() {
                        "set" => nodes.push(self.parse_set()?),
                        "if" => nodes.push(self.parse_if()?),
                        "foreach" => nodes.push(self.parse_foreach()?),
                        "break" => nodes.push(Node::Break),
                        "return" => nodes.push(self.parse_return()?),
                        "elseif" => {
                            let condition = self.parse_condition()?;
                            return Ok((nodes, Terminator::ElseIf(condition)));
                        }
                        "else" => return Ok((nodes, Terminator::Else)),
                        _ => return Ok((nodes, Terminator::End)),
                    }
                }
                c => {
                    text.push(c);
                    self.pos += 1;
                }
            }
        }

        flush_text(&mut text, &mut nodes);
        Ok((nodes, Terminator::Eof))
    }

    /// Text and references only, for double-quoted strings.
    fn parse_interpolation(&mut self) -> Result<Vec<Node>, TemplateError> {
        let mut nodes = Vec::new();
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c == '\\' && self.peek_at(1) == Some('$') {
                text.push('$');
                self.pos += 2;
            } else if c == '$' {
                if let Some(reference) = self.try_reference()? {
                    flush_text(&mut text, &mut nodes);
                    nodes.push(Node::Reference(reference));
                } else {
                    text.push('$');
                    self.pos += 1;
                }
            } else {
                text.push(c);
                self.pos += 1;
            }
        }
        flush_text(&mut text, &mut nodes);
        Ok(nodes)
    }

    fn skip_line_comment(&mut self) {
        while let Some(c) = self.peek() {
            self.pos += 1;
            if c == '\n' {
                break;
            }
        }
    }

    fn skip_block_comment(&mut self) -> Result<(), TemplateError> {
        let start_line = self.line();
        self.pos += 2;
        while self.peek().is_some() {
            if self.eat("*#") {
                return Ok(());
            }
            self.pos += 1;
        }
        Err(TemplateError::Syntax {
            line: start_line,
            message: "unterminated #* comment".to_owned(),
        })
    }

    /// Name of the directive at `#`, with the length of `#name` or `#{name}`.
    fn directive_name(&self) -> Option<(String, usize)> {
        let braced = self.peek_at(1) == Some('{');
        let start = if braced { 2 } else { 1 };
        let mut len = 0;
        while self.peek_at(start + len).is_some_and(|c| c.is_ascii_alphabetic()) {
            len += 1;
        }
        if len == 0 {
            return None;
        }
        if braced && self.peek_at(start + len) != Some('}') {
            return None;
        }
        let name = self.chars[self.pos + start..self.pos + start + len]
            .iter()
            .collect();
        Some((name, start + len + usize::from(braced)))
    }

    // -- Directives --

    fn parse_set(&mut self) -> Result<Node, TemplateError> {
        self.expect('(')?;
        self.skip_ws();
        let target = self
            .try_reference()?
            .ok_or_else(|| self.syntax("#set requires a $reference target"))?;
        if target.ends_with_method() {
            return Err(self.syntax("#set target cannot end with a method call"));
        }
        self.expect('=')?;
        let value = self.parse_expr()?;
        self.expect(')')?;
        Ok(Node::Set { target, value })
    }

    fn parse_condition(&mut self) -> Result<Expr, TemplateError> {
        self.expect('(')?;
        let condition = self.parse_expr()?;
        self.expect(')')?;
        Ok(condition)
    }

    fn parse_if(&mut self) -> Result<Node, TemplateError> {
        let mut condition = self.parse_condition()?;
        self.enter()?;
        let mut branches = Vec::new();
        let mut otherwise = Vec::new();
        loop {
            let (body, terminator) = self.parse_block()?;
            branches.push((condition, body));
            match terminator {
                Terminator::ElseIf(next) => condition = next,
                Terminator::Else => {
                    let (body, terminator) = self.parse_block()?;
                    if !matches!(terminator, Terminator::End) {
                        return Err(self.syntax("#else without a closing #end"));
                    }
                    otherwise = body;
                    break;
                }
                Terminator::End => break,
                Terminator::Eof => return Err(self.syntax("#if without a closing #end")),
            }
        }
        self.leave();
        Ok(Node::If {
            branches,
            otherwise,
        })
    }

    fn parse_foreach(&mut self) -> Result<Node, TemplateError> {
        self.expect('(')?;
        self.expect('$')?;
        if !self.peek().is_some_and(is_ident_start) {
            return Err(self.syntax("#foreach requires a loop variable"));
        }
        let var = self.identifier();
        self.skip_ws();
        if !self.eat_word("in") {
            return Err(self.syntax("expected 'in' in #foreach"));
        }
        let iterable = self.parse_expr()?;
        self.expect(')')?;

        self.enter()?;
        let (body, terminator) = self.parse_block()?;
        if !matches!(terminator, Terminator::End) {
            return Err(self.syntax("#foreach without a closing #end"));
        }
        self.leave();
        Ok(Node::Foreach {
            var,
            iterable,
            body,
        })
    }

    fn parse_return(&mut self) -> Result<Node, TemplateError> {
        if self.peek() != Some('(') {
            return Ok(Node::Return(None));
        }
        self.pos += 1;
        self.skip_ws();
        if self.peek() == Some(')') {
            self.pos += 1;
            return Ok(Node::Return(None));
        }
        let value = self.parse_expr()?;
        self.expect(')')?;
        Ok(Node::Return(Some(value)))
    }

    // -- References --

    fn try_reference(&mut self) -> Result<Option<Reference>, TemplateError> {
        let start = self.pos;
        let mut p = self.pos + 1;
        let quiet = self.chars.get(p) == Some(&'!');
        if quiet {
            p += 1;
        }
        let braced = self.chars.get(p) == Some(&'{');
        if braced {
            p += 1;
        }
        if !self.chars.get(p).copied().is_some_and(is_ident_start) {
            return Ok(None);
        }
        self.pos = p;
        let root = self.identifier();
        let accessors = self.accessors()?;
        if braced {
            if self.peek() != Some('}') {
                return Err(self.syntax("unterminated ${ reference"));
            }
            self.pos += 1;
        }
        Ok(Some(Reference {
            quiet,
            root,
            accessors,
            source: self.chars[start..self.pos].iter().collect(),
        }))
    }

    fn accessors(&mut self) -> Result<Vec<Accessor>, TemplateError> {
        let mut accessors = Vec::new();
        loop {
            match self.peek() {
                Some('.') if self.peek_at(1).is_some_and(is_ident_start) => {
                    self.pos += 1;
                    let name = self.identifier();
                    if self.peek() == Some('(') {
                        self.pos += 1;
                        let args = self.parse_args(')')?;
                        accessors.push(Accessor::Method { name, args });
                    } else {
                        accessors.push(Accessor::Property(name));
                    }
                }
                Some('[') => {
                    self.pos += 1;
                    let index = self.parse_expr()?;
                    self.expect(']')?;
                    accessors.push(Accessor::Index(index));
                }
                _ => return Ok(accessors),
            }
        }
    }

    fn parse_args(&mut self, close: char) -> Result<Vec<Expr>, TemplateError> {
        let mut args = Vec::new();
        self.skip_ws();
        if self.peek() == Some(close) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some(c) if c == close => {
                    self.pos += 1;
                    return Ok(args);
                }
                _ => return Err(self.syntax(format!("expected ',' or '{close}' in argument list"))),
            }
        }
    }

    // -- Expressions --

    fn parse_expr(&mut self) -> Result<Expr, TemplateError> {
        self.enter()?;
        let expr = self.parse_or();
        self.leave();
        expr
    }

    fn parse_or(&mut self) -> Result<Expr, TemplateError> {
        let mut left = self.parse_and()?;
        loop {
            self.skip_ws();
            if self.eat("||") || self.eat_word("or") {
                let right = self.parse_and()?;
                left = binary(BinaryOp::Or, left, right);
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_and(&mut self) -> Result<Expr, TemplateError> {
        let mut left = self.parse_equality()?;
        loop {
            self.skip_ws();
            if self.eat("&&") || self.eat_word("and") {
                let right = self.parse_equality()?;
                left = binary(BinaryOp::And, left, right);
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_equality(&mut self) -> Result<Expr, TemplateError> {
        let mut left = self.parse_relational()?;
        loop {
            self.skip_ws();
            let op = if self.eat("==") || self.eat_word("eq") {
                BinaryOp::Eq
            } else if self.eat("!=") || self.eat_word("ne") {
                BinaryOp::Ne
            } else {
                return Ok(left);
            };
            let right = self.parse_relational()?;
            left = binary(op, left, right);
        }
    }

    fn parse_relational(&mut self) -> Result<Expr, TemplateError> {
        let mut left = self.parse_additive()?;
        loop {
            self.skip_ws();
            let op = if self.eat("<=") || self.eat_word("le") {
                BinaryOp::Le
            } else if self.eat(">=") || self.eat_word("ge") {
                BinaryOp::Ge
            } else if self.eat("<") || self.eat_word("lt") {
                BinaryOp::Lt
            } else if self.eat(">") || self.eat_word("gt") {
                BinaryOp::Gt
            } else {
                return Ok(left);
            };
            let right = self.parse_additive()?;
            left = binary(op, left, right);
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, TemplateError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            self.skip_ws();
            let op = match self.peek() {
                Some('+') => BinaryOp::Add,
                Some('-') => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, TemplateError> {
        let mut left = self.parse_unary()?;
        loop {
            self.skip_ws();
            let op = match self.peek() {
                Some('*') => BinaryOp::Mul,
                Some('/') => BinaryOp::Div,
                Some('%') => BinaryOp::Mod,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, TemplateError> {
        self.skip_ws();
        if self.peek() == Some('!') && self.peek_at(1) != Some('=') {
            self.pos += 1;
            return self.nested_unary().map(|e| Expr::Not(Box::new(e)));
        }
        if self.eat_word("not") {
            return self.nested_unary().map(|e| Expr::Not(Box::new(e)));
        }
        if self.peek() == Some('-') {
            self.pos += 1;
            return self.nested_unary().map(|e| match e {
                Expr::Int(i) => Expr::Int(-i),
                Expr::Float(f) => Expr::Float(-f),
                other => Expr::Neg(Box::new(other)),
            });
        }
        self.parse_primary()
    }

    fn nested_unary(&mut self) -> Result<Expr, TemplateError> {
        self.enter()?;
        let expr = self.parse_unary();
        self.leave();
        expr
    }

    fn parse_primary(&mut self) -> Result<Expr, TemplateError> {
        self.skip_ws();
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let expr = self.parse_expr()?;
                self.expect(')')?;
                Ok(expr)
            }
            Some('$') => self
                .try_reference()?
                .map(Expr::Ref)
                .ok_or_else(|| self.syntax("expected a reference after '$'")),
            Some('"') => self.parse_double_quoted(),
            Some('\'') => self.parse_single_quoted(),
            Some(c) if c.is_ascii_digit() => self.parse_number(),
            Some('[') => self.parse_list(),
            Some('{') => self.parse_map(),
            Some(c) if is_ident_start(c) => {
                if self.eat_word("true") {
                    Ok(Expr::Bool(true))
                } else if self.eat_word("false") {
                    Ok(Expr::Bool(false))
                } else if self.eat_word("null") {
                    Ok(Expr::Null)
                } else {
                    let word = self.identifier();
                    Err(self.syntax(format!("unexpected identifier '{word}'")))
                }
            }
            Some(c) => Err(self.syntax(format!("unexpected character '{c}'"))),
            None => Err(self.syntax("unexpected end of template")),
        }
    }

    fn parse_number(&mut self) -> Result<Expr, TemplateError> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        let is_float = self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit());
        if is_float {
            self.pos += 1;
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        if is_float {
            text.parse()
                .map(Expr::Float)
                .map_err(|_| self.syntax(format!("invalid number {text}")))
        } else {
            text.parse()
                .map(Expr::Int)
                .map_err(|_| self.syntax(format!("integer {text} is out of range")))
        }
    }

    fn parse_double_quoted(&mut self) -> Result<Expr, TemplateError> {
        self.pos += 1;
        let mut raw = String::new();
        loop {
            match self.peek() {
                Some('\\') if self.peek_at(1) == Some('"') => {
                    raw.push('"');
                    self.pos += 2;
                }
                Some('"') => {
                    self.pos += 1;
                    break;
                }
                Some(c) => {
                    raw.push(c);
                    self.pos += 1;
                }
                None => return Err(self.syntax("unterminated string literal")),
            }
        }
        if !raw.contains('$') {
            return Ok(Expr::Str(raw));
        }
        let mut inner = Parser::new(&raw, self.max_depth);
        inner.depth = self.depth;
        let mut nodes = inner.parse_interpolation().map_err(|e| match e {
            TemplateError::Syntax { message, .. } => self.syntax(message),
            other => other,
        })?;
        match nodes.as_mut_slice() {
            [Node::Text(text)] => Ok(Expr::Str(std::mem::take(text))),
            _ => Ok(Expr::Interpolated(nodes)),
        }
    }

    fn parse_single_quoted(&mut self) -> Result<Expr, TemplateError> {
        self.pos += 1;
        let start = self.pos;
        while self.peek().is_some_and(|c| c != '\'') {
            self.pos += 1;
        }
        if self.peek().is_none() {
            return Err(self.syntax("unterminated string literal"));
        }
        let text = self.chars[start..self.pos].iter().collect();
        self.pos += 1;
        Ok(Expr::Str(text))
    }

    fn parse_list(&mut self) -> Result<Expr, TemplateError> {
        self.pos += 1;
        self.skip_ws();
        if self.peek() == Some(']') {
            self.pos += 1;
            return Ok(Expr::List(Vec::new()));
        }
        let first = self.parse_expr()?;
        self.skip_ws();
        if self.eat("..") {
            let last = self.parse_expr()?;
            self.expect(']')?;
            return Ok(Expr::Range(Box::new(first), Box::new(last)));
        }
        let mut items = vec![first];
        while self.eat(",") {
            items.push(self.parse_expr()?);
            self.skip_ws();
        }
        self.expect(']')?;
        Ok(Expr::List(items))
    }

    fn parse_map(&mut self) -> Result<Expr, TemplateError> {
        self.pos += 1;
        self.skip_ws();
        let mut entries = Vec::new();
        if self.peek() == Some('}') {
            self.pos += 1;
            return Ok(Expr::Map(entries));
        }
        loop {
            self.skip_ws();
            let key = if self.peek().is_some_and(is_ident_start) {
                Expr::Str(self.identifier())
            } else {
                self.parse_expr()?
            };
            self.expect(':')?;
            let value = self.parse_expr()?;
            entries.push((key, value));
            self.skip_ws();
            if !self.eat(",") {
                break;
            }
        }
        self.expect('}')?;
        Ok(Expr::Map(entries))
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn flush_text(text: &mut String, nodes: &mut Vec<Node>) {
    if !text.is_empty() {
        nodes.push(Node::Text(std::mem::take(text)));
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Vec<Node> {
        parse_template(source, 32).unwrap()
    }

    #[test]
    fn test_should_parse_references_in_text() {
        let nodes = parse(r#"{"id": "$ctx.args.id", "n": $!{ctx.args.items[0]}}"#);
        let refs: Vec<_> = nodes
            .iter()
            .filter_map(|n| match n {
                Node::Reference(r) => Some(r),
                _ => None,
            })
            .collect();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].source, "$ctx.args.id");
        assert!(refs[1].quiet);
        assert!(matches!(refs[1].accessors[2], Accessor::Index(Expr::Int(0))));
    }

    #[test]
    fn test_should_keep_dollar_without_identifier_as_text() {
        assert_eq!(parse("cost: $5 and \\$x"), vec![Node::Text("cost: $5 and $x".to_owned())]);
    }

    #[test]
    fn test_should_parse_if_elseif_else_chain() {
        let nodes = parse("#if($a == 1)one#elseif($a lt 3)few#{else}many#end");
        let [Node::If { branches, otherwise }] = nodes.as_slice() else {
            panic!("expected one #if node");
        };
        assert_eq!(branches.len(), 2);
        assert_eq!(otherwise, &vec![Node::Text("many".to_owned())]);
    }

    #[test]
    fn test_should_parse_foreach_over_range() {
        let nodes = parse("#foreach($i in [1..3])$i#end");
        assert!(matches!(
            &nodes[0],
            Node::Foreach { var, iterable: Expr::Range(..), .. } if var == "i"
        ));
    }

    #[test]
    fn test_should_parse_map_and_interpolated_string() {
        let nodes = parse(r#"#set($m = {"k": "v-$x", other: [1, 2.5, true, null]})"#);
        let [Node::Set { value: Expr::Map(entries), .. }] = nodes.as_slice() else {
            panic!("expected #set of a map");
        };
        assert!(matches!(entries[0].1, Expr::Interpolated(_)));
        assert_eq!(entries[1].0, Expr::Str("other".to_owned()));
    }

    #[test]
    fn test_should_skip_comments() {
        assert_eq!(parse("a## line\nb#* block *#c"), vec![Node::Text("abc".to_owned())]);
    }

    #[test]
    fn test_should_reject_macros_at_parse_time() {
        let err = parse_template("#macro(loop)#loop()#end", 32).unwrap_err();
        assert!(matches!(err, TemplateError::Forbidden { directive, .. } if directive == "macro"));
    }

    #[test]
    fn test_should_reject_unclosed_block() {
        let err = parse_template("#if(true) yes", 32).unwrap_err();
        assert!(matches!(err, TemplateError::Syntax { .. }));
    }

    #[test]
    fn test_should_cap_nesting_depth() {
        let source = format!("#set($x = {}1{})", "(".repeat(40), ")".repeat(40));
        let err = parse_template(&source, 16).unwrap_err();
        assert!(matches!(err, TemplateError::LimitExceeded { limit: "nesting", .. }));
    }

    #[test]
    fn test_should_parse_return_forms() {
        assert_eq!(parse("#return"), vec![Node::Return(None)]);
        assert!(matches!(&parse("#return($ctx.result)")[0], Node::Return(Some(Expr::Ref(_)))));
    }
}

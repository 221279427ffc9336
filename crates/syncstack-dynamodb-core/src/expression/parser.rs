//! Parser for the table expression languages.
//!
//! One byte scanner feeds five entry points: [`parse_condition`],
//! [`parse_key_condition`], [`parse_filter`], [`parse_update`] and
//! [`parse_projection`]. The first three share the boolean grammar. Errors
//! name the request parameter the text came from, phrased the way the table
//! API reports them, because templates surface these messages verbatim.
//!
//! Keywords and function names are case-insensitive; a word is a function
//! call only when `(` follows it. Input length, nesting and document path
//! depth are capped.

use std::fmt;

use super::ast::{
    AddAction, AttributePath, CompareOp, DeleteAction, Expr, FunctionName, LogicalOp, Operand,
    PathElement, SetAction, SetValue, UpdateExpr,
};

/// Longest accepted expression, in bytes.
pub const MAX_EXPRESSION_LENGTH: usize = 4096;

/// Deepest accepted nesting of parentheses, `NOT` and `list_append`.
pub const MAX_NESTING_DEPTH: usize = 64;

/// Most elements accepted in one document path.
pub const MAX_PATH_DEPTH: usize = 32;

/// Words that never name an attribute without a `#name` placeholder.
const RESERVED: [&str; 9] = [
    "AND", "OR", "NOT", "BETWEEN", "IN", "SET", "REMOVE", "ADD", "DELETE",
];

/// The request parameter an expression was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpressionKind {
    /// `ConditionExpression` of a write or condition check.
    Condition,
    /// `KeyConditionExpression` of a query.
    KeyCondition,
    /// `FilterExpression` of a query or scan.
    Filter,
    /// `UpdateExpression`.
    Update,
    /// `ProjectionExpression`.
    Projection,
}

impl fmt::Display for ExpressionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Condition => "ConditionExpression",
            Self::KeyCondition => "KeyConditionExpression",
            Self::Filter => "FilterExpression",
            Self::Update => "UpdateExpression",
            Self::Projection => "ProjectionExpression",
        })
    }
}

/// Errors produced while parsing or evaluating an expression.
#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    /// The text does not follow the grammar.
    #[error("Invalid {kind}: Syntax error; token: \"{token}\", near: \"{near}\"")]
    Syntax {
        /// Parameter the text came from.
        kind: ExpressionKind,
        /// Offending token, `<EOF>` at the end of input.
        token: String,
        /// The token with what precedes it.
        near: String,
    },
    /// The expression has no tokens at all.
    #[error("Invalid {kind}: The expression can not be empty")]
    Empty {
        /// Parameter the text came from.
        kind: ExpressionKind,
    },
    /// A call to a function the grammar does not offer at that position.
    #[error("Invalid {kind}: Invalid function name; function: {name}")]
    UnknownFunction {
        /// Parameter the text came from.
        kind: ExpressionKind,
        /// Name as written.
        name: String,
    },
    /// An update section keyword appears twice.
    #[error(
        "Invalid UpdateExpression: The \"{section}\" section can only be used once in an update expression"
    )]
    DuplicateSection {
        /// `SET`, `REMOVE`, `ADD` or `DELETE`.
        section: &'static str,
    },
    /// A `#name` placeholder has no entry in the name map.
    #[error("An expression attribute name used in the document path is not defined; attribute name: {name}")]
    UnresolvedName {
        /// The placeholder.
        name: String,
    },
    /// A `:value` placeholder has no entry in the value map.
    #[error("An expression attribute value used in expression is not defined; attribute value: {name}")]
    UnresolvedValue {
        /// The placeholder.
        name: String,
    },
    /// A name map entry is never referenced.
    #[error("Value provided in ExpressionAttributeNames unused in expressions: keys: {{{name}}}")]
    UnusedName {
        /// The placeholder.
        name: String,
    },
    /// A value map entry is never referenced.
    #[error("Value provided in ExpressionAttributeValues unused in expressions: keys: {{{name}}}")]
    UnusedValue {
        /// The placeholder.
        name: String,
    },
    /// An operand is invalid for the given operation.
    #[error("Incorrect operand for {operation}: {message}")]
    InvalidOperand {
        /// The operation that failed.
        operation: String,
        /// Explanation.
        message: String,
    },
    /// An operator was applied to a value of the wrong type.
    #[error("Incorrect operand type: {message}")]
    TypeMismatch {
        /// Explanation.
        message: String,
    },
    /// Two update actions target overlapping document paths.
    #[error("Two document paths overlap with each other: {path}")]
    ConflictingClause {
        /// The later of the two paths.
        path: String,
    },
    /// The expression text exceeds [`MAX_EXPRESSION_LENGTH`].
    #[error("Expression size has exceeded the maximum allowed size; size: {len}, limit: {max}")]
    TooLong {
        /// Actual length.
        len: usize,
        /// Limit.
        max: usize,
    },
    /// Nesting or path depth exceeds its cap.
    #[error("Expression is nested deeper than the limit of {max}")]
    TooDeep {
        /// Limit that was hit.
        max: usize,
    },
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sym {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
}

/// Token borrowing its text from the expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tok<'a> {
    /// Identifier, keyword or function name, in its original case.
    Word(&'a str),
    /// `#name`, sigil included.
    Name(&'a str),
    /// `:value`, sigil included.
    Value(&'a str),
    /// Digits; only meaningful inside `[...]`.
    Index(usize),
    Sym(Sym),
    End,
}

#[derive(Debug, Clone, Copy)]
struct Lexeme<'a> {
    tok: Tok<'a>,
    start: usize,
    end: usize,
}

fn scan(kind: ExpressionKind, src: &str) -> Result<Vec<Lexeme<'_>>, ExpressionError> {
    let bytes = src.as_bytes();
    let mut lexemes = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let byte = bytes[pos];
        if byte.is_ascii_whitespace() {
            pos += 1;
            continue;
        }
        let start = pos;
        let tok = match byte {
            b'#' | b':' => {
                pos = word_end(bytes, pos + 1);
                if pos == start + 1 {
                    return Err(syntax(kind, src, start, pos, start));
                }
                let text = &src[start..pos];
                if byte == b'#' {
                    Tok::Name(text)
                } else {
                    Tok::Value(text)
                }
            }
            b'0'..=b'9' => {
                while bytes.get(pos).is_some_and(u8::is_ascii_digit) {
                    pos += 1;
                }
                let digits = &src[start..pos];
                let index = digits.parse().map_err(|_| ExpressionError::InvalidOperand {
                    operation: "list index".to_owned(),
                    message: format!("{digits} is out of range"),
                })?;
                Tok::Index(index)
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                pos = word_end(bytes, pos);
                Tok::Word(&src[start..pos])
            }
            _ => {
                let Some((sym, width)) = symbol(&bytes[pos..]) else {
                    let width = src[pos..].chars().next().map_or(1, char::len_utf8);
                    return Err(syntax(kind, src, start, start + width, start));
                };
                pos += width;
                Tok::Sym(sym)
            }
        };
        lexemes.push(Lexeme {
            tok,
            start,
            end: pos,
        });
    }

    lexemes.push(Lexeme {
        tok: Tok::End,
        start: bytes.len(),
        end: bytes.len(),
    });
    Ok(lexemes)
}

fn word_end(bytes: &[u8], mut pos: usize) -> usize {
    while bytes
        .get(pos)
        .is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_')
    {
        pos += 1;
    }
    pos
}

fn symbol(rest: &[u8]) -> Option<(Sym, usize)> {
    let pair = match rest {
        [b'<', b'=', ..] => Some(Sym::Le),
        [b'<', b'>', ..] => Some(Sym::Ne),
        [b'>', b'=', ..] => Some(Sym::Ge),
        _ => None,
    };
    if let Some(sym) = pair {
        return Some((sym, 2));
    }
    let sym = match rest.first()? {
        b'=' => Sym::Eq,
        b'<' => Sym::Lt,
        b'>' => Sym::Gt,
        b'+' => Sym::Plus,
        b'-' => Sym::Minus,
        b'.' => Sym::Dot,
        b',' => Sym::Comma,
        b'(' => Sym::LParen,
        b')' => Sym::RParen,
        b'[' => Sym::LBracket,
        b']' => Sym::RBracket,
        _ => return None,
    };
    Some((sym, 1))
}

/// Syntax error for `src[start..end]`, quoting from `context` onwards.
fn syntax(kind: ExpressionKind, src: &str, start: usize, end: usize, context: usize) -> ExpressionError {
    let token = if start == end {
        "<EOF>".to_owned()
    } else {
        src[start..end].to_owned()
    };
    ExpressionError::Syntax {
        kind,
        token,
        near: src[context..end].trim().to_owned(),
    }
}

fn is_reserved(word: &str) -> bool {
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(word))
}

fn compare_op(sym: Sym) -> Option<CompareOp> {
    Some(match sym {
        Sym::Eq => CompareOp::Eq,
        Sym::Ne => CompareOp::Ne,
        Sym::Lt => CompareOp::Lt,
        Sym::Le => CompareOp::Le,
        Sym::Gt => CompareOp::Gt,
        Sym::Ge => CompareOp::Ge,
        _ => return None,
    })
}

fn condition_function(name: &str) -> Option<FunctionName> {
    Some(match name.to_ascii_lowercase().as_str() {
        "attribute_exists" => FunctionName::AttributeExists,
        "attribute_not_exists" => FunctionName::AttributeNotExists,
        "attribute_type" => FunctionName::AttributeType,
        "begins_with" => FunctionName::BeginsWith,
        "contains" => FunctionName::Contains,
        _ => return None,
    })
}

/// Sections of an update expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Set,
    Remove,
    Add,
    Delete,
}

impl Section {
    fn from_word(word: &str) -> Option<Self> {
        [Self::Set, Self::Remove, Self::Add, Self::Delete]
            .into_iter()
            .find(|s| s.keyword().eq_ignore_ascii_case(word))
    }

    fn keyword(self) -> &'static str {
        match self {
            Self::Set => "SET",
            Self::Remove => "REMOVE",
            Self::Add => "ADD",
            Self::Delete => "DELETE",
        }
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    kind: ExpressionKind,
    src: &'a str,
    lexemes: Vec<Lexeme<'a>>,
    cursor: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(kind: ExpressionKind, src: &'a str) -> Result<Self, ExpressionError> {
        if src.len() > MAX_EXPRESSION_LENGTH {
            return Err(ExpressionError::TooLong {
                len: src.len(),
                max: MAX_EXPRESSION_LENGTH,
            });
        }
        let lexemes = scan(kind, src)?;
        if lexemes.len() == 1 {
            return Err(ExpressionError::Empty { kind });
        }
        Ok(Self {
            kind,
            src,
            lexemes,
            cursor: 0,
            depth: 0,
        })
    }

    fn lexeme(&self, ahead: usize) -> Lexeme<'a> {
        self.lexemes
            .get(self.cursor + ahead)
            .copied()
            .unwrap_or(Lexeme {
                tok: Tok::End,
                start: self.src.len(),
                end: self.src.len(),
            })
    }

    fn peek(&self) -> Tok<'a> {
        self.lexeme(0).tok
    }

    /// Syntax error at the current token.
    fn error(&self) -> ExpressionError {
        let here = self.lexeme(0);
        let context = self
            .cursor
            .checked_sub(1)
            .and_then(|i| self.lexemes.get(i))
            .map_or(here.start, |previous| previous.start);
        syntax(self.kind, self.src, here.start, here.end, context)
    }

    fn eat(&mut self, sym: Sym) -> bool {
        let hit = self.peek() == Tok::Sym(sym);
        if hit {
            self.cursor += 1;
        }
        hit
    }

    fn expect(&mut self, sym: Sym) -> Result<(), ExpressionError> {
        if self.eat(sym) { Ok(()) } else { Err(self.error()) }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        let hit = matches!(self.peek(), Tok::Word(w) if w.eq_ignore_ascii_case(keyword));
        if hit {
            self.cursor += 1;
        }
        hit
    }

    fn finish(&self) -> Result<(), ExpressionError> {
        if self.peek() == Tok::End {
            Ok(())
        } else {
            Err(self.error())
        }
    }

    /// Name of the function called at the cursor, if `word (` is next.
    fn call_name(&self) -> Option<&'a str> {
        match (self.peek(), self.lexeme(1).tok) {
            (Tok::Word(name), Tok::Sym(Sym::LParen)) => Some(name),
            _ => None,
        }
    }

    fn nested<T>(
        &mut self,
        inner: impl FnOnce(&mut Self) -> Result<T, ExpressionError>,
    ) -> Result<T, ExpressionError> {
        if self.depth == MAX_NESTING_DEPTH {
            return Err(ExpressionError::TooDeep {
                max: MAX_NESTING_DEPTH,
            });
        }
        self.depth += 1;
        let out = inner(self);
        self.depth -= 1;
        out
    }

    /// One or more items separated by commas.
    fn separated<T>(
        &mut self,
        mut item: impl FnMut(&mut Self) -> Result<T, ExpressionError>,
    ) -> Result<Vec<T>, ExpressionError> {
        let mut items = Vec::new();
        loop {
            items.push(item(self)?);
            if !self.eat(Sym::Comma) {
                return Ok(items);
            }
        }
    }

    // -- boolean grammar ----------------------------------------------------

    /// Precedence climbing over `OR` (1) and `AND` (2).
    fn condition(&mut self, min_power: u8) -> Result<Expr, ExpressionError> {
        let mut left = self.negation()?;
        while let Some((op, power)) = self.logical_op() {
            if power < min_power {
                break;
            }
            self.cursor += 1;
            let right = self.condition(power + 1)?;
            left = Expr::Logical {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn logical_op(&self) -> Option<(LogicalOp, u8)> {
        match self.peek() {
            Tok::Word(w) if w.eq_ignore_ascii_case("OR") => Some((LogicalOp::Or, 1)),
            Tok::Word(w) if w.eq_ignore_ascii_case("AND") => Some((LogicalOp::And, 2)),
            _ => None,
        }
    }

    fn negation(&mut self) -> Result<Expr, ExpressionError> {
        if self.eat_keyword("NOT") {
            return self.nested(|p| Ok(Expr::Not(Box::new(p.negation()?))));
        }
        if self.eat(Sym::LParen) {
            return self.nested(|p| {
                let inner = p.condition(0)?;
                p.expect(Sym::RParen)?;
                Ok(inner)
            });
        }
        if let Some(name) = self.call_name().and_then(condition_function) {
            return self.function(name);
        }
        let left = self.operand()?;
        self.comparison(left)
    }

    fn function(&mut self, name: FunctionName) -> Result<Expr, ExpressionError> {
        self.cursor += 2;
        let args = self.separated(Self::operand)?;
        self.expect(Sym::RParen)?;

        if args.len() != name.arity() {
            return Err(ExpressionError::InvalidOperand {
                operation: name.to_string(),
                message: format!("takes {} argument(s), {} given", name.arity(), args.len()),
            });
        }
        if !matches!(args.first(), Some(Operand::Path(_))) {
            return Err(ExpressionError::InvalidOperand {
                operation: name.to_string(),
                message: "the first argument must be a document path".to_owned(),
            });
        }
        Ok(Expr::Function { name, args })
    }

    fn comparison(&mut self, left: Operand) -> Result<Expr, ExpressionError> {
        let op = match self.peek() {
            Tok::Sym(sym) => compare_op(sym),
            _ => None,
        };
        if let Some(op) = op {
            self.cursor += 1;
            let right = self.operand()?;
            return Ok(Expr::Compare {
                left: Box::new(left),
                op,
                right: Box::new(right),
            });
        }

        if self.eat_keyword("BETWEEN") {
            let low = self.operand()?;
            if !self.eat_keyword("AND") {
                return Err(self.error());
            }
            let high = self.operand()?;
            return Ok(Expr::Between {
                value: Box::new(left),
                low: Box::new(low),
                high: Box::new(high),
            });
        }

        if self.eat_keyword("IN") {
            self.expect(Sym::LParen)?;
            let list = self.separated(Self::operand)?;
            self.expect(Sym::RParen)?;
            return Ok(Expr::In {
                value: Box::new(left),
                list,
            });
        }

        Err(self.error())
    }

    // -- operands and paths -------------------------------------------------

    fn operand(&mut self) -> Result<Operand, ExpressionError> {
        if let Tok::Value(name) = self.peek() {
            self.cursor += 1;
            return Ok(Operand::Value(name.to_owned()));
        }
        match self.call_name() {
            Some(name) if name.eq_ignore_ascii_case("size") => {
                self.cursor += 2;
                let path = self.path()?;
                self.expect(Sym::RParen)?;
                Ok(Operand::Size(path))
            }
            Some(name) => Err(ExpressionError::UnknownFunction {
                kind: self.kind,
                name: name.to_owned(),
            }),
            None => self.path().map(Operand::Path),
        }
    }

    fn path(&mut self) -> Result<AttributePath, ExpressionError> {
        let mut elements = vec![self.path_segment()?];
        loop {
            if self.eat(Sym::Dot) {
                elements.push(self.path_segment()?);
            } else if self.eat(Sym::LBracket) {
                let Tok::Index(index) = self.peek() else {
                    return Err(self.error());
                };
                self.cursor += 1;
                self.expect(Sym::RBracket)?;
                elements.push(PathElement::Index(index));
            } else {
                return Ok(AttributePath { elements });
            }
            if elements.len() > MAX_PATH_DEPTH {
                return Err(ExpressionError::TooDeep {
                    max: MAX_PATH_DEPTH,
                });
            }
        }
    }

    fn path_segment(&mut self) -> Result<PathElement, ExpressionError> {
        let name = match self.peek() {
            Tok::Name(name) => name,
            Tok::Word(word) if !is_reserved(word) => word,
            _ => return Err(self.error()),
        };
        self.cursor += 1;
        Ok(PathElement::Attribute(name.to_owned()))
    }

    // -- update grammar -----------------------------------------------------

    fn update(&mut self) -> Result<UpdateExpr, ExpressionError> {
        let mut update = UpdateExpr::default();
        let mut seen: Vec<Section> = Vec::with_capacity(4);

        while self.peek() != Tok::End {
            let section = match self.peek() {
                Tok::Word(word) => Section::from_word(word),
                _ => None,
            }
            .ok_or_else(|| self.error())?;
            self.cursor += 1;
            if seen.contains(&section) {
                return Err(ExpressionError::DuplicateSection {
                    section: section.keyword(),
                });
            }
            seen.push(section);

            match section {
                Section::Set => update.set_actions = self.separated(Self::set_action)?,
                Section::Remove => update.remove_paths = self.separated(Self::path)?,
                Section::Add => {
                    update.add_actions = self.separated(|p| {
                        let path = p.path()?;
                        Ok(AddAction {
                            path,
                            value: p.operand()?,
                        })
                    })?;
                }
                Section::Delete => {
                    update.delete_actions = self.separated(|p| {
                        let path = p.path()?;
                        Ok(DeleteAction {
                            path,
                            value: p.operand()?,
                        })
                    })?;
                }
            }
        }
        Ok(update)
    }

    fn set_action(&mut self) -> Result<SetAction, ExpressionError> {
        let path = self.path()?;
        self.expect(Sym::Eq)?;
        let first = self.set_term()?;
        let value = if self.eat(Sym::Plus) {
            SetValue::Plus(Box::new(first), Box::new(self.set_term()?))
        } else if self.eat(Sym::Minus) {
            SetValue::Minus(Box::new(first), Box::new(self.set_term()?))
        } else {
            first
        };
        Ok(SetAction { path, value })
    }

    fn set_term(&mut self) -> Result<SetValue, ExpressionError> {
        match self.call_name() {
            Some(name) if name.eq_ignore_ascii_case("if_not_exists") => {
                self.cursor += 2;
                let path = self.path()?;
                self.expect(Sym::Comma)?;
                let fallback = self.operand()?;
                self.expect(Sym::RParen)?;
                Ok(SetValue::IfNotExists(path, fallback))
            }
            Some(name) if name.eq_ignore_ascii_case("list_append") => {
                self.cursor += 2;
                let (head, tail) = self.nested(|p| {
                    let head = p.set_term()?;
                    p.expect(Sym::Comma)?;
                    Ok((head, p.set_term()?))
                })?;
                self.expect(Sym::RParen)?;
                Ok(SetValue::ListAppend(Box::new(head), Box::new(tail)))
            }
            _ => self.operand().map(SetValue::Operand),
        }
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

fn parse_boolean(kind: ExpressionKind, input: &str) -> Result<Expr, ExpressionError> {
    let mut parser = Parser::new(kind, input)?;
    let expr = parser.condition(0)?;
    parser.finish()?;
    Ok(expr)
}

/// Parse the `ConditionExpression` of a write.
///
/// # Errors
///
/// Returns `ExpressionError` if the text is empty, does not follow the
/// grammar, or exceeds a length or nesting cap.
pub fn parse_condition(input: &str) -> Result<Expr, ExpressionError> {
    parse_boolean(ExpressionKind::Condition, input)
}

/// Parse the `KeyConditionExpression` of a query. Which shapes a key
/// condition may take is checked against the key schema later.
///
/// # Errors
///
/// As [`parse_condition`].
pub fn parse_key_condition(input: &str) -> Result<Expr, ExpressionError> {
    parse_boolean(ExpressionKind::KeyCondition, input)
}

/// Parse the `FilterExpression` of a query or scan.
///
/// # Errors
///
/// As [`parse_condition`].
pub fn parse_filter(input: &str) -> Result<Expr, ExpressionError> {
    parse_boolean(ExpressionKind::Filter, input)
}

/// Parse an `UpdateExpression` (`SET`, `REMOVE`, `ADD`, `DELETE`).
///
/// # Errors
///
/// Returns `ExpressionError` if the text is empty, does not follow the
/// grammar, or repeats a section.
pub fn parse_update(input: &str) -> Result<UpdateExpr, ExpressionError> {
    let mut parser = Parser::new(ExpressionKind::Update, input)?;
    parser.update()
}

/// Parse a `ProjectionExpression`: comma-separated document paths.
///
/// # Errors
///
/// Returns `ExpressionError` if the text is empty or not a path list.
pub fn parse_projection(input: &str) -> Result<Vec<AttributePath>, ExpressionError> {
    let mut parser = Parser::new(ExpressionKind::Projection, input)?;
    let paths = parser.separated(Parser::path)?;
    parser.finish()?;
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_parse_placeholder_comparison() {
        let Expr::Compare { left, op, right } = parse_condition("#name = :val").unwrap() else {
            panic!("expected a comparison");
        };
        assert!(matches!(left.as_ref(), Operand::Path(p) if p.to_string() == "#name"));
        assert_eq!(op, CompareOp::Eq);
        assert!(matches!(right.as_ref(), Operand::Value(v) if v == ":val"));
    }

    #[test]
    fn test_should_group_and_before_or() {
        let Expr::Logical { op, left, right } =
            parse_filter("a = :a OR b = :b AND c = :c").unwrap()
        else {
            panic!("expected a logical root");
        };
        assert_eq!(op, LogicalOp::Or);
        assert!(matches!(left.as_ref(), Expr::Compare { .. }));
        assert!(matches!(right.as_ref(), Expr::Logical { op: LogicalOp::And, .. }));

        let Expr::Logical { op, left, .. } = parse_filter("a = :a AND b = :b OR c = :c").unwrap()
        else {
            panic!("expected a logical root");
        };
        assert_eq!(op, LogicalOp::Or);
        assert!(matches!(left.as_ref(), Expr::Logical { op: LogicalOp::And, .. }));
    }

    #[test]
    fn test_should_parse_between_in_and_not() {
        assert!(matches!(
            parse_key_condition("pk = :pk AND sk BETWEEN :low AND :high").unwrap(),
            Expr::Logical { op: LogicalOp::And, .. }
        ));
        match parse_condition("#status IN (:v1, :v2, :v3)").unwrap() {
            Expr::In { list, .. } => assert_eq!(list.len(), 3),
            other => panic!("expected In, got {other:?}"),
        }
        assert!(matches!(
            parse_condition("NOT (a = :a)").unwrap(),
            Expr::Not(_)
        ));
    }

    #[test]
    fn test_should_match_function_names_in_any_case() {
        let Expr::Logical { left, right, .. } =
            parse_condition("BEGINS_WITH(#name, :prefix) and Attribute_Exists(x)").unwrap()
        else {
            panic!("expected a logical root");
        };
        assert!(matches!(
            left.as_ref(),
            Expr::Function { name: FunctionName::BeginsWith, .. }
        ));
        assert!(matches!(
            right.as_ref(),
            Expr::Function { name: FunctionName::AttributeExists, .. }
        ));
    }

    #[test]
    fn test_should_reject_wrong_arity_and_unknown_functions() {
        let err = parse_condition("attribute_exists(a, b)").unwrap_err();
        assert!(matches!(err, ExpressionError::InvalidOperand { .. }));

        let err = parse_filter("shout(a) = :a").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid FilterExpression: Invalid function name; function: shout"
        );
    }

    #[test]
    fn test_should_parse_nested_path_with_index() {
        let Expr::Compare { left, .. } = parse_condition("info.tags[0].name = :val").unwrap() else {
            panic!("expected a comparison");
        };
        let Operand::Path(path) = left.as_ref() else {
            panic!("expected a path operand");
        };
        assert_eq!(path.elements.len(), 4);
        assert_eq!(path.elements[2], PathElement::Index(0));
    }

    #[test]
    fn test_should_treat_size_as_function_only_before_paren() {
        match parse_condition("size(#name) > :val").unwrap() {
            Expr::Compare { left, op, .. } => {
                assert!(matches!(left.as_ref(), Operand::Size(_)));
                assert_eq!(op, CompareOp::Gt);
            }
            other => panic!("expected a comparison, got {other:?}"),
        }
        match parse_condition("size = :val").unwrap() {
            Expr::Compare { left, .. } => assert!(matches!(left.as_ref(), Operand::Path(_))),
            other => panic!("expected a comparison, got {other:?}"),
        }
    }

    #[test]
    fn test_should_parse_every_update_section() {
        let update =
            parse_update("SET #a = :v1, b = b + :one REMOVE #c ADD d :v2 DELETE e :v3").unwrap();
        assert!(!update.is_empty());
        assert_eq!(update.set_actions.len(), 2);
        assert!(matches!(update.set_actions[1].value, SetValue::Plus(_, _)));
        assert_eq!(update.remove_paths.len(), 1);
        assert_eq!(update.add_actions.len(), 1);
        assert_eq!(update.delete_actions.len(), 1);
    }

    #[test]
    fn test_should_parse_list_append_around_if_not_exists() {
        let update = parse_update("set l = LIST_APPEND(if_not_exists(l, :empty), :more)").unwrap();
        let SetValue::ListAppend(head, _) = &update.set_actions[0].value else {
            panic!("expected list_append");
        };
        assert!(matches!(head.as_ref(), SetValue::IfNotExists(_, _)));
    }

    #[test]
    fn test_should_reject_repeated_update_section() {
        let err = parse_update("SET a = :a set b = :b").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid UpdateExpression: The \"SET\" section can only be used once in an update expression"
        );
    }

    #[test]
    fn test_should_name_the_parameter_in_empty_expression_errors() {
        assert_eq!(
            parse_condition("").unwrap_err().to_string(),
            "Invalid ConditionExpression: The expression can not be empty"
        );
        assert!(matches!(
            parse_update("   ").unwrap_err(),
            ExpressionError::Empty { kind: ExpressionKind::Update }
        ));
        assert!(matches!(
            parse_projection("").unwrap_err(),
            ExpressionError::Empty { kind: ExpressionKind::Projection }
        ));
    }

    #[test]
    fn test_should_quote_token_and_context_in_syntax_errors() {
        assert_eq!(
            parse_condition("a = :a b").unwrap_err().to_string(),
            "Invalid ConditionExpression: Syntax error; token: \"b\", near: \":a b\""
        );
        assert_eq!(
            parse_filter("a = ").unwrap_err().to_string(),
            "Invalid FilterExpression: Syntax error; token: \"<EOF>\", near: \"=\""
        );
        assert!(matches!(
            parse_key_condition("= :val").unwrap_err(),
            ExpressionError::Syntax { kind: ExpressionKind::KeyCondition, .. }
        ));
        assert!(matches!(
            parse_condition("a = :a ; b").unwrap_err(),
            ExpressionError::Syntax { ref token, .. } if token == ";"
        ));
    }

    #[test]
    fn test_should_require_placeholder_for_reserved_words() {
        assert!(parse_condition("in = :v").is_err());
        assert!(parse_projection("id, #in").is_ok());
    }

    #[test]
    fn test_should_parse_projection() {
        let paths = parse_projection("id, name, info.rating").unwrap();
        assert_eq!(paths.len(), 3);
        assert_eq!(paths[2].elements.len(), 2);
    }

    #[test]
    fn test_should_cap_expression_length() {
        let long = format!("a = :v{}", "x".repeat(MAX_EXPRESSION_LENGTH));
        assert!(matches!(
            parse_condition(&long),
            Err(ExpressionError::TooLong { .. })
        ));
    }

    #[test]
    fn test_should_cap_nesting_depth() {
        let depth = MAX_NESTING_DEPTH + 1;
        let text = format!("{}a = :v{}", "(".repeat(depth), ")".repeat(depth));
        assert!(matches!(
            parse_condition(&text),
            Err(ExpressionError::TooDeep { .. })
        ));

        let ok_depth = MAX_NESTING_DEPTH - 1;
        let text = format!("{}a = :v{}", "(".repeat(ok_depth), ")".repeat(ok_depth));
        assert!(parse_condition(&text).is_ok());
    }

    #[test]
    fn test_should_cap_path_depth() {
        let path = vec!["a"; MAX_PATH_DEPTH + 1].join(".");
        assert!(matches!(
            parse_projection(&path),
            Err(ExpressionError::TooDeep { max }) if max == MAX_PATH_DEPTH
        ));
    }
}

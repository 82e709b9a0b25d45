//! Purpose: Parse dzn text into native assignments.
//! Exports: `DecodeOptions`, `MAX_RANGE_LEN`, `decode`, `decode_str`, `decode_file`, `decode_value`.
//! Role: Read half of the codec; also decodes solution blocks for the stream parser.
//! Invariants: A malformed statement aborts decoding; nothing is silently skipped.
//! Invariants: Parse errors carry the statement text and the 1-based line/column of the fault.
//! Invariants: Enum declaration statements are registered before any other statement decodes.
use std::collections::BTreeSet;
use std::path::Path;

use crate::core::error::{Error, ErrorKind};
use crate::core::rebase::{Rebase, rebase_value};
use crate::core::types::{MAX_ARRAY_DIMS, VarType, VarTypes};
use crate::core::value::{ArrayValue, Assignment, EnumCase, EnumTable, SetValue, Value};

/// Largest integer range materialized into a set.
pub const MAX_RANGE_LEN: u64 = 1 << 20;

const SNIPPET_MAX: usize = 120;

#[derive(Clone, Debug, Default)]
pub struct DecodeOptions {
    pub rebase: Rebase,
    /// Declared variable types; without them value kinds are inferred.
    pub types: Option<VarTypes>,
}

impl DecodeOptions {
    pub fn with_rebase(mut self, rebase: Rebase) -> Self {
        self.rebase = rebase;
        self
    }

    pub fn with_types(mut self, types: VarTypes) -> Self {
        self.types = Some(types);
        self
    }
}

/// Decodes a dzn document with a fresh enum table and default options.
pub fn decode_str(text: &str) -> Result<Assignment, Error> {
    decode(text, &mut EnumTable::new(), &DecodeOptions::default())
}

/// Reads and decodes a dzn file; errors carry the file path.
pub fn decode_file(
    path: &Path,
    enums: &mut EnumTable,
    options: &DecodeOptions,
) -> Result<Assignment, Error> {
    let text = std::fs::read_to_string(path).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to read data file")
            .with_path(path)
            .with_source(err)
    })?;
    decode(&text, enums, options).map_err(|err| err.with_path(path))
}

/// Decodes a dzn document. Enum declarations found in `text` are added to `enums`.
pub fn decode(
    text: &str,
    enums: &mut EnumTable,
    options: &DecodeOptions,
) -> Result<Assignment, Error> {
    let tokens = Lexer::new(text).tokenize()?;
    let statements = split_statements(text, &tokens);

    let mut headers = Vec::with_capacity(statements.len());
    let mut seen = BTreeSet::new();
    for statement in &statements {
        let header = split_header(text, statement, options.types.as_ref())
            .map_err(|err| attach_snippet(err, statement))?;
        if !seen.insert(header.name.clone()) {
            let err = error_at(
                header.name_token,
                format!("`{}` is assigned more than once", header.name),
            );
            return Err(attach_snippet(err, statement));
        }
        headers.push((statement, header));
    }

    for (statement, header) in headers.iter().filter(|(_, header)| header.is_enum) {
        declare_enum(header, enums).map_err(|err| attach_snippet(err, statement))?;
    }

    let mut assignment = Assignment::new();
    for (statement, header) in headers.iter().filter(|(_, header)| !header.is_enum) {
        let hint = options
            .types
            .as_ref()
            .and_then(|types| types.get(&header.name))
            .or(header.declared.as_ref());
        let value = parse_complete(header.value, header.eq_token, enums, hint)
            .map_err(|err| attach_snippet(err, statement))?;
        assignment.insert(header.name.clone(), rebase_value(value, options.rebase));
    }
    Ok(assignment)
}

/// Decodes a single value literal such as `{1, 3}` or `array1d(0..1, [4, 5])`.
pub fn decode_value(
    text: &str,
    enums: &EnumTable,
    options: &DecodeOptions,
    hint: Option<&VarType>,
) -> Result<Value, Error> {
    let tokens = Lexer::new(text).tokenize()?;
    let tokens = match tokens.split_last() {
        Some((last, rest)) if last.tok == Tok::Semi => rest,
        _ => &tokens[..],
    };
    let value = match tokens.first() {
        Some(first) => parse_complete(tokens, first, enums, hint),
        None => Err(Error::new(ErrorKind::Parse)
            .with_message("expected a value")
            .with_position(1, 1)),
    }
    .map_err(|err| err.with_fragment(truncate_snippet(text.trim(), SNIPPET_MAX)))?;
    Ok(rebase_value(value, options.rebase))
}

/// Shortens `input` to at most `max` bytes, marking the cut with `...`.
pub(crate) fn truncate_snippet(input: &str, max: usize) -> String {
    if input.len() <= max {
        return input.to_string();
    }
    let suffix = "...";
    if max <= suffix.len() {
        return suffix[..max].to_string();
    }
    let mut take = max - suffix.len();
    while !input.is_char_boundary(take) {
        take -= 1;
    }
    format!("{}{suffix}", &input[..take])
}

#[derive(Clone, Debug, PartialEq)]
enum Tok {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    DotDot,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Eq,
    Semi,
    Colon,
    Slash,
}

impl Tok {
    fn describe(&self) -> String {
        match self {
            Tok::Ident(name) => format!("identifier `{name}`"),
            Tok::Int(number) => format!("integer {number}"),
            Tok::Float(number) => format!("float {number}"),
            Tok::Str(_) => "string literal".to_string(),
            Tok::DotDot => "`..`".to_string(),
            Tok::LBrace => "`{`".to_string(),
            Tok::RBrace => "`}`".to_string(),
            Tok::LBracket => "`[`".to_string(),
            Tok::RBracket => "`]`".to_string(),
            Tok::LParen => "`(`".to_string(),
            Tok::RParen => "`)`".to_string(),
            Tok::Comma => "`,`".to_string(),
            Tok::Eq => "`=`".to_string(),
            Tok::Semi => "`;`".to_string(),
            Tok::Colon => "`:`".to_string(),
            Tok::Slash => "`/`".to_string(),
        }
    }
}

#[derive(Clone, Debug)]
struct Token {
    tok: Tok,
    line: u64,
    column: u64,
    start: usize,
    end: usize,
}

impl Token {
    fn is_ident(&self, word: &str) -> bool {
        matches!(&self.tok, Tok::Ident(name) if name == word)
    }
}

fn error_at(token: &Token, message: impl Into<String>) -> Error {
    Error::new(ErrorKind::Parse)
        .with_message(message)
        .with_position(token.line, token.column)
}

struct Lexer<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: u64,
    // Byte offset and character column of the last token start on this line.
    column_mark: (usize, u64),
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            bytes: text.as_bytes(),
            pos: 0,
            line: 1,
            column_mark: (0, 1),
        }
    }

    // Token starts only move forward within a line.
    fn column_at(&mut self, offset: usize) -> u64 {
        let (mark, column) = self.column_mark;
        let column = column + self.text[mark..offset].chars().count() as u64;
        self.column_mark = (offset, column);
        column
    }

    // Recomputes the line from `offset`; block comments may have advanced past it.
    fn error(&self, offset: usize, message: impl Into<String>) -> Error {
        let before = &self.text[..offset];
        let line = before.matches('\n').count() as u64 + 1;
        let line_start = before.rfind('\n').map_or(0, |newline| newline + 1);
        let line_end = self.text[offset..]
            .find('\n')
            .map_or(self.text.len(), |end| offset + end);
        Error::new(ErrorKind::Parse)
            .with_message(message)
            .with_position(line, before[line_start..].chars().count() as u64 + 1)
            .with_fragment(truncate_snippet(
                self.text[line_start..line_end].trim(),
                SNIPPET_MAX,
            ))
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(offset).copied()
    }

    fn newline(&mut self, offset: usize) {
        self.line += 1;
        self.column_mark = (offset + 1, 1);
    }

    fn skip_trivia(&mut self) -> Result<(), Error> {
        while let Some(byte) = self.peek_at(self.pos) {
            match byte {
                b'\n' => {
                    self.newline(self.pos);
                    self.pos += 1;
                }
                b' ' | b'\t' | b'\r' => self.pos += 1,
                b'%' => {
                    while let Some(next) = self.peek_at(self.pos) {
                        if next == b'\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                b'/' if self.peek_at(self.pos + 1) == Some(b'*') => {
                    let open = self.pos;
                    self.pos += 2;
                    loop {
                        match self.peek_at(self.pos) {
                            None => return Err(self.error(open, "unterminated block comment")),
                            Some(b'*') if self.peek_at(self.pos + 1) == Some(b'/') => {
                                self.pos += 2;
                                break;
                            }
                            Some(b'\n') => {
                                self.newline(self.pos);
                                self.pos += 1;
                            }
                            Some(_) => self.pos += 1,
                        }
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn tokenize(mut self) -> Result<Vec<Token>, Error> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia()?;
            let Some(byte) = self.peek_at(self.pos) else {
                return Ok(tokens);
            };
            let start = self.pos;
            let line = self.line;
            let column = self.column_at(start);
            let tok = match byte {
                b'{' => self.punct(Tok::LBrace, 1),
                b'}' => self.punct(Tok::RBrace, 1),
                b'[' => self.punct(Tok::LBracket, 1),
                b']' => self.punct(Tok::RBracket, 1),
                b'(' => self.punct(Tok::LParen, 1),
                b')' => self.punct(Tok::RParen, 1),
                b',' => self.punct(Tok::Comma, 1),
                b'=' => self.punct(Tok::Eq, 1),
                b';' => self.punct(Tok::Semi, 1),
                b':' => self.punct(Tok::Colon, 1),
                b'/' => self.punct(Tok::Slash, 1),
                b'.' if self.peek_at(start + 1) == Some(b'.') => self.punct(Tok::DotDot, 2),
                b'"' => self.string()?,
                b'-' | b'+' if self.signed_number_follows() => self.number()?,
                b'0'..=b'9' => self.number()?,
                b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.ident(),
                _ => {
                    let ch = self.text[start..].chars().next().unwrap_or('?');
                    return Err(self.error(start, format!("unexpected character `{ch}`")));
                }
            };
            tokens.push(Token {
                tok,
                line,
                column,
                start,
                end: self.pos,
            });
        }
    }

    fn punct(&mut self, tok: Tok, width: usize) -> Tok {
        self.pos += width;
        tok
    }

    fn signed_number_follows(&self) -> bool {
        let mut offset = self.pos + 1;
        while matches!(self.peek_at(offset), Some(b' ' | b'\t')) {
            offset += 1;
        }
        matches!(self.peek_at(offset), Some(b'0'..=b'9'))
    }

    fn ident(&mut self) -> Tok {
        let start = self.pos;
        while matches!(
            self.peek_at(self.pos),
            Some(b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_')
        ) {
            self.pos += 1;
        }
        Tok::Ident(self.text[start..self.pos].to_string())
    }

    fn digits(&mut self, radix: u32) {
        while self
            .peek_at(self.pos)
            .is_some_and(|byte| char::from(byte).is_digit(radix))
        {
            self.pos += 1;
        }
    }

    fn number(&mut self) -> Result<Tok, Error> {
        let start = self.pos;
        let mut negative = false;
        if let Some(sign @ (b'-' | b'+')) = self.peek_at(self.pos) {
            negative = sign == b'-';
            self.pos += 1;
            while matches!(self.peek_at(self.pos), Some(b' ' | b'\t')) {
                self.pos += 1;
            }
        }
        let digits_start = self.pos;

        let radix = match (self.peek_at(self.pos), self.peek_at(self.pos + 1)) {
            (Some(b'0'), Some(b'x')) => 16,
            (Some(b'0'), Some(b'o')) => 8,
            _ => 10,
        };
        if radix != 10 {
            self.pos += 2;
            let body_start = self.pos;
            self.digits(radix);
            let body = &self.text[body_start..self.pos];
            let magnitude = i64::from_str_radix(body, radix)
                .map_err(|_| self.error(start, "integer literal out of range"))?;
            return Ok(Tok::Int(if negative { -magnitude } else { magnitude }));
        }

        self.digits(10);
        let mut is_float = false;
        if self.peek_at(self.pos) == Some(b'.')
            && self.peek_at(self.pos + 1).is_some_and(|byte| byte.is_ascii_digit())
        {
            is_float = true;
            self.pos += 1;
            self.digits(10);
        }
        if matches!(self.peek_at(self.pos), Some(b'e' | b'E')) {
            let mut offset = self.pos + 1;
            if matches!(self.peek_at(offset), Some(b'-' | b'+')) {
                offset += 1;
            }
            if self.peek_at(offset).is_some_and(|byte| byte.is_ascii_digit()) {
                is_float = true;
                self.pos = offset;
                self.digits(10);
            }
        }

        let literal = format!(
            "{}{}",
            if negative { "-" } else { "" },
            &self.text[digits_start..self.pos]
        );
        if is_float {
            literal
                .parse::<f64>()
                .map(Tok::Float)
                .map_err(|_| self.error(start, format!("invalid float literal `{literal}`")))
        } else {
            literal
                .parse::<i64>()
                .map(Tok::Int)
                .map_err(|_| self.error(start, format!("integer literal `{literal}` out of range")))
        }
    }

    fn string(&mut self) -> Result<Tok, Error> {
        let open = self.pos;
        self.pos += 1;
        let mut out = String::new();
        let mut chars = self.text[self.pos..].char_indices();
        while let Some((offset, ch)) = chars.next() {
            match ch {
                '"' => {
                    self.pos += offset + 1;
                    return Ok(Tok::Str(out));
                }
                '\\' => match chars.next() {
                    Some((_, 'n')) => out.push('\n'),
                    Some((_, 't')) => out.push('\t'),
                    Some((_, '"')) => out.push('"'),
                    Some((_, '\\')) => out.push('\\'),
                    Some((_, other)) => {
                        return Err(self.error(open, format!("unknown escape `\\{other}` in string")));
                    }
                    None => break,
                },
                '\n' => break,
                other => out.push(other),
            }
        }
        Err(self.error(open, "unterminated string literal"))
    }
}

struct Statement<'a> {
    text: &'a str,
    tokens: &'a [Token],
}

fn split_statements<'a>(text: &'a str, tokens: &'a [Token]) -> Vec<Statement<'a>> {
    tokens
        .split(|token| token.tok == Tok::Semi)
        .filter(|group| !group.is_empty())
        .map(|group| {
            let start = group[0].start;
            let end = group[group.len() - 1].end;
            Statement {
                text: &text[start..end],
                tokens: group,
            }
        })
        .collect()
}

fn attach_snippet(err: Error, statement: &Statement<'_>) -> Error {
    if err.fragment().is_some() {
        return err;
    }
    err.with_fragment(truncate_snippet(statement.text, SNIPPET_MAX))
}

struct Header<'a> {
    name: String,
    name_token: &'a Token,
    eq_token: &'a Token,
    is_enum: bool,
    declared: Option<VarType>,
    value: &'a [Token],
}

fn split_header<'a>(
    text: &str,
    statement: &Statement<'a>,
    types: Option<&VarTypes>,
) -> Result<Header<'a>, Error> {
    let mut tokens = statement.tokens;
    let mut keyword_enum = false;
    let mut declared = None;

    if tokens.len() > 1 && tokens[0].is_ident("enum") && matches!(tokens[1].tok, Tok::Ident(_)) {
        keyword_enum = true;
        tokens = &tokens[1..];
    } else if let Some(colon) = declaration_colon(tokens) {
        if colon == 0 {
            return Err(error_at(&tokens[0], "expected a type before `:`"));
        }
        let type_text = &text[tokens[0].start..tokens[colon - 1].end];
        let parsed = type_text.parse::<VarType>().map_err(|err| {
            error_at(
                &tokens[0],
                format!(
                    "invalid declared type `{type_text}`: {}",
                    err.message().unwrap_or("unrecognized type")
                ),
            )
        })?;
        declared = Some(parsed);
        tokens = &tokens[colon + 1..];
    }

    let (name_token, name) = match tokens.first() {
        Some(token @ Token { tok: Tok::Ident(name), .. }) => (token, name.clone()),
        Some(token) => {
            return Err(error_at(
                token,
                format!("expected a variable name, found {}", token.tok.describe()),
            ));
        }
        None => return Err(error_at(&statement.tokens[0], "expected a variable name")),
    };
    let eq_token = match tokens.get(1) {
        Some(token) if token.tok == Tok::Eq => token,
        Some(token) => {
            return Err(error_at(
                token,
                format!("expected `=` after `{name}`, found {}", token.tok.describe()),
            ));
        }
        None => {
            let message = if keyword_enum {
                format!("enum `{name}` has no cases")
            } else {
                format!("`{name}` has no value")
            };
            return Err(error_at(name_token, message));
        }
    };

    let typed_enum = types.and_then(|types| types.get(&name)) == Some(&VarType::EnumDecl)
        || declared == Some(VarType::EnumDecl);
    Ok(Header {
        name,
        name_token,
        eq_token,
        is_enum: keyword_enum || typed_enum,
        declared,
        value: &tokens[2..],
    })
}

/// Position of a `:` separating a declared type from the name, if any.
fn declaration_colon(tokens: &[Token]) -> Option<usize> {
    let mut depth = 0usize;
    for (index, token) in tokens.iter().enumerate() {
        match token.tok {
            Tok::LBracket | Tok::LParen | Tok::LBrace => depth += 1,
            Tok::RBracket | Tok::RParen | Tok::RBrace => depth = depth.saturating_sub(1),
            Tok::Colon if depth == 0 => return Some(index),
            Tok::Eq if depth == 0 => return None,
            _ => {}
        }
    }
    None
}

fn declare_enum(header: &Header<'_>, enums: &mut EnumTable) -> Result<(), Error> {
    let value = header.value;
    let open = value
        .first()
        .filter(|token| token.tok == Tok::LBrace)
        .ok_or_else(|| {
            error_at(
                value.first().unwrap_or(header.eq_token),
                format!("enum `{}` must be declared as `{{case, ...}}`", header.name),
            )
        })?;

    let mut cases = Vec::new();
    let mut index = 1;
    loop {
        match value.get(index) {
            Some(Token { tok: Tok::RBrace, .. }) if cases.is_empty() => break,
            Some(Token { tok: Tok::Ident(case), .. }) => cases.push(case.clone()),
            Some(token) => {
                return Err(error_at(
                    token,
                    format!("expected an enum case, found {}", token.tok.describe()),
                ));
            }
            None => return Err(error_at(open, "unterminated enum declaration")),
        }
        index += 1;
        match value.get(index) {
            Some(Token { tok: Tok::Comma, .. }) => index += 1,
            Some(Token { tok: Tok::RBrace, .. }) => break,
            Some(token) => {
                return Err(error_at(
                    token,
                    format!("expected `,` or `}}`, found {}", token.tok.describe()),
                ));
            }
            None => return Err(error_at(open, "unterminated enum declaration")),
        }
    }
    if let Some(extra) = value.get(index + 1) {
        return Err(error_at(
            extra,
            format!("unexpected {} after enum declaration", extra.tok.describe()),
        ));
    }

    enums.declare(header.name.clone(), cases).map_err(|err| {
        error_at(header.name_token, err.message().unwrap_or("invalid enum declaration"))
    })?;
    Ok(())
}

fn parse_complete(
    tokens: &[Token],
    anchor: &Token,
    enums: &EnumTable,
    hint: Option<&VarType>,
) -> Result<Value, Error> {
    let mut parser = Parser {
        tokens,
        pos: 0,
        enums,
        anchor,
    };
    let value = parser.value(hint)?;
    if let Some(extra) = parser.peek() {
        return Err(error_at(
            extra,
            format!("unexpected {} after value", extra.tok.describe()),
        ));
    }
    Ok(value)
}

/// A literal before enum resolution: bare identifiers stay unresolved until
/// the expected type is known.
enum Atom {
    Value(Value),
    Ident(String),
}

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
    enums: &'t EnumTable,
    /// Token used for positions when the input runs out.
    anchor: &'t Token,
}

impl<'t> Parser<'t> {
    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn peek_tok(&self) -> Option<&'t Tok> {
        self.peek().map(|token| &token.tok)
    }

    fn peek_second(&self) -> Option<&'t Tok> {
        self.tokens.get(self.pos + 1).map(|token| &token.tok)
    }

    fn last(&self) -> &'t Token {
        self.tokens.last().unwrap_or(self.anchor)
    }

    fn next(&mut self, expected: &str) -> Result<&'t Token, Error> {
        match self.tokens.get(self.pos) {
            Some(token) => {
                self.pos += 1;
                Ok(token)
            }
            None => Err(error_at(
                self.last(),
                format!("expected {expected}, found end of statement"),
            )),
        }
    }

    fn expect(&mut self, tok: Tok) -> Result<&'t Token, Error> {
        let describe = tok.describe();
        let token = self.next(&describe)?;
        if token.tok != tok {
            return Err(error_at(
                token,
                format!("expected {describe}, found {}", token.tok.describe()),
            ));
        }
        Ok(token)
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek_tok() == Some(tok) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn value(&mut self, hint: Option<&VarType>) -> Result<Value, Error> {
        let Some(token) = self.peek() else {
            return Err(error_at(self.last(), "expected a value"));
        };
        match &token.tok {
            Tok::LBrace => {
                let elem = set_elem_hint(hint, token)?;
                self.set_literal(elem)
            }
            Tok::LBracket => {
                let elem = array_elem_hint(hint, 1, token)?;
                self.array_literal(elem)
            }
            Tok::Ident(name) if self.peek_second() == Some(&Tok::LParen) => {
                let dims = array_call_dims(name)
                    .ok_or_else(|| error_at(token, format!("unsupported call `{name}(...)`")))?;
                let elem = array_elem_hint(hint, dims, token)?;
                self.array_call(dims, elem)
            }
            _ => self.scalar_or_range(hint),
        }
    }

    fn atom(&mut self) -> Result<(Atom, &'t Token), Error> {
        let token = self.next("a value")?;
        let atom = match &token.tok {
            Tok::Int(numerator) if self.peek_tok() == Some(&Tok::Slash) => {
                self.pos += 1;
                let denominator = self.next("a denominator")?;
                match denominator.tok {
                    Tok::Int(0) => return Err(error_at(denominator, "rational with zero denominator")),
                    Tok::Int(value) => Atom::Value(Value::Float(*numerator as f64 / value as f64)),
                    ref other => {
                        return Err(error_at(
                            denominator,
                            format!("expected an integer denominator, found {}", other.describe()),
                        ));
                    }
                }
            }
            Tok::Int(number) => Atom::Value(Value::Int(*number)),
            Tok::Float(number) => Atom::Value(Value::Float(*number)),
            Tok::Str(text) => Atom::Value(Value::Str(text.clone())),
            Tok::Ident(name) if name == "true" => Atom::Value(Value::Bool(true)),
            Tok::Ident(name) if name == "false" => Atom::Value(Value::Bool(false)),
            Tok::Ident(name) => Atom::Ident(name.clone()),
            other => {
                return Err(error_at(
                    token,
                    format!("expected a value, found {}", other.describe()),
                ));
            }
        };
        Ok((atom, token))
    }

    fn scalar_or_range(&mut self, hint: Option<&VarType>) -> Result<Value, Error> {
        let (lo, lo_token) = self.atom()?;
        if !self.eat(&Tok::DotDot) {
            return self.resolve(lo, lo_token, hint);
        }
        let (hi, _) = self.atom()?;
        let elem = set_elem_hint(hint, lo_token)?;
        self.range(lo, hi, lo_token, elem).map(Value::Set)
    }

    fn range(
        &self,
        lo: Atom,
        hi: Atom,
        token: &Token,
        elem: Option<&VarType>,
    ) -> Result<SetValue, Error> {
        match (lo, hi) {
            (Atom::Value(Value::Int(lo)), Atom::Value(Value::Int(hi))) => {
                match elem {
                    None | Some(VarType::Int) => {}
                    Some(VarType::Float) => {
                        return Err(error_at(token, "float ranges are not supported"));
                    }
                    Some(other) => {
                        return Err(error_at(token, format!("expected {other}, found int range")));
                    }
                }
                let span = i128::from(hi) - i128::from(lo) + 1;
                if span > i128::from(MAX_RANGE_LEN) {
                    return Err(error_at(
                        token,
                        format!("range {lo}..{hi} exceeds {MAX_RANGE_LEN} members"),
                    ));
                }
                Ok(SetValue::range(lo, hi))
            }
            (Atom::Ident(lo), Atom::Ident(hi)) => {
                if let Some(other @ (VarType::Bool | VarType::Int | VarType::Float | VarType::Str)) =
                    elem
                {
                    return Err(error_at(token, format!("expected {other}, found enum range")));
                }
                let lo_case = self.enum_case(&lo, token, elem)?;
                let hi_case = self.enum_case(&hi, token, elem)?;
                if lo_case.decl() != hi_case.decl() {
                    return Err(error_at(
                        token,
                        format!("`{lo}..{hi}` spans cases of different enums"),
                    ));
                }
                let Some(decl) = self.enums.get(lo_case.decl()) else {
                    return Err(error_at(token, format!("`{lo}` has no enum declaration")));
                };
                let members = decl.cases()[lo_case.index()..]
                    .iter()
                    .take((hi_case.index() + 1).saturating_sub(lo_case.index()))
                    .filter_map(|case| self.enums.case(lo_case.decl(), case))
                    .map(Value::Enum);
                SetValue::new(members).map_err(|err| {
                    error_at(token, err.message().unwrap_or("invalid enum range"))
                })
            }
            (Atom::Value(Value::Float(_)), _) | (_, Atom::Value(Value::Float(_))) => {
                Err(error_at(token, "float ranges are not supported"))
            }
            _ => Err(error_at(token, "range bounds must both be integers or enum cases")),
        }
    }

    fn enum_case(
        &self,
        name: &str,
        token: &Token,
        elem: Option<&VarType>,
    ) -> Result<EnumCase, Error> {
        match elem {
            Some(VarType::Enum(enum_name)) => self.typed_case(name, enum_name, token),
            _ => self
                .enums
                .resolve_case(name)
                .ok_or_else(|| error_at(token, format!("`{name}` is not a declared enum case"))),
        }
    }

    fn typed_case(&self, name: &str, enum_name: &str, token: &Token) -> Result<EnumCase, Error> {
        let decl = self
            .enums
            .lookup(enum_name)
            .ok_or_else(|| error_at(token, format!("enum `{enum_name}` is not declared")))?;
        self.enums
            .case(decl, name)
            .ok_or_else(|| error_at(token, format!("`{name}` is not a case of enum `{enum_name}`")))
    }

    /// Applies the expected type to a literal.
    fn resolve(&self, atom: Atom, token: &Token, hint: Option<&VarType>) -> Result<Value, Error> {
        match (atom, hint) {
            (Atom::Ident(name), Some(VarType::Enum(enum_name))) => {
                self.typed_case(&name, enum_name, token).map(Value::Enum)
            }
            (Atom::Ident(name), Some(VarType::Str)) => Ok(Value::Str(name)),
            (Atom::Ident(name), None) => Ok(self
                .enums
                .resolve_case(&name)
                .map_or(Value::Str(name), Value::Enum)),
            (Atom::Ident(name), Some(other)) => Err(error_at(
                token,
                format!("expected {other}, found identifier `{name}`"),
            )),
            (Atom::Value(value), None) => Ok(value),
            (Atom::Value(value), Some(expected)) => match (value, expected) {
                (Value::Int(number), VarType::Float) => Ok(Value::Float(number as f64)),
                (value @ Value::Int(_), VarType::Int)
                | (value @ Value::Float(_), VarType::Float)
                | (value @ Value::Bool(_), VarType::Bool)
                | (value @ Value::Str(_), VarType::Str) => Ok(value),
                (value, expected) => Err(error_at(
                    token,
                    format!("expected {expected}, found {}", value.kind_name()),
                )),
            },
        }
    }

    fn set_literal(&mut self, elem: Option<&VarType>) -> Result<Value, Error> {
        let open = self.expect(Tok::LBrace)?;
        let mut members = Vec::new();
        if !self.eat(&Tok::RBrace) {
            loop {
                let (atom, token) = self.atom()?;
                members.push(self.resolve(atom, token, elem)?);
                if self.eat(&Tok::RBrace) {
                    break;
                }
                self.expect(Tok::Comma)?;
            }
        }
        SetValue::new(members)
            .map(Value::Set)
            .map_err(|err| error_at(open, err.message().unwrap_or("invalid set")))
    }

    /// Comma-separated array elements up to the closing `]`.
    fn elements(&mut self, elem: Option<&VarType>) -> Result<Vec<Value>, Error> {
        self.expect(Tok::LBracket)?;
        let mut items = Vec::new();
        if self.eat(&Tok::RBracket) {
            return Ok(items);
        }
        loop {
            let token = self.peek().unwrap_or(self.anchor);
            let item = self.value(elem)?;
            if matches!(item, Value::Array(_)) {
                return Err(error_at(token, "array elements must be scalars or sets"));
            }
            items.push(item);
            if self.eat(&Tok::RBracket) {
                return Ok(items);
            }
            self.expect(Tok::Comma)?;
        }
    }

    fn array_literal(&mut self, elem: Option<&VarType>) -> Result<Value, Error> {
        Ok(Value::Array(ArrayValue::Seq(self.elements(elem)?)))
    }

    fn array_call(&mut self, dims: usize, elem: Option<&VarType>) -> Result<Value, Error> {
        let call = self.next("an array call")?;
        self.expect(Tok::LParen)?;
        let mut index_sets = Vec::with_capacity(dims);
        for _ in 0..dims {
            index_sets.push(self.index_set()?);
            self.expect(Tok::Comma)?;
        }
        let items = self.elements(elem)?;
        self.expect(Tok::RParen)?;

        let expected = index_sets
            .iter()
            .map(|(lo, hi)| (i128::from(*hi) - i128::from(*lo) + 1).max(0) as u128)
            .product::<u128>();
        if expected != items.len() as u128 {
            return Err(error_at(
                call,
                format!(
                    "index sets describe {expected} elements but {} were given",
                    items.len()
                ),
            ));
        }
        if items.is_empty() {
            return Ok(Value::Array(ArrayValue::Seq(Vec::new())));
        }
        let mut items = items.into_iter();
        Ok(build_indexed(&index_sets, &mut items))
    }

    fn index_set(&mut self) -> Result<(i64, i64), Error> {
        let token = self.next("an index set")?;
        match &token.tok {
            Tok::LBrace => {
                self.expect(Tok::RBrace)?;
                Ok((1, 0))
            }
            Tok::Int(lo) => {
                self.expect(Tok::DotDot)?;
                let hi_token = self.next("an upper bound")?;
                let Tok::Int(hi) = hi_token.tok else {
                    return Err(error_at(
                        hi_token,
                        format!("expected an integer bound, found {}", hi_token.tok.describe()),
                    ));
                };
                if i128::from(hi) - i128::from(*lo) + 1 > i128::from(MAX_RANGE_LEN) {
                    return Err(error_at(token, format!("index set {lo}..{hi} is too large")));
                }
                Ok((*lo, hi))
            }
            Tok::Ident(name) => {
                let decl = self
                    .enums
                    .lookup(name)
                    .and_then(|id| self.enums.get(id))
                    .ok_or_else(|| error_at(token, format!("enum `{name}` is not declared")))?;
                Ok((1, decl.cases().len() as i64))
            }
            other => Err(error_at(
                token,
                format!("expected an index set, found {}", other.describe()),
            )),
        }
    }
}

fn build_indexed(index_sets: &[(i64, i64)], items: &mut impl Iterator<Item = Value>) -> Value {
    let Some(((lo, hi), rest)) = index_sets.split_first() else {
        return items.next().unwrap_or(Value::Bool(false));
    };
    let entries = (*lo..=*hi)
        .map(|index| (index, build_indexed(rest, items)))
        .collect();
    Value::Array(ArrayValue::Indexed(entries))
}

fn array_call_dims(name: &str) -> Option<usize> {
    let dims = name.strip_prefix("array")?.strip_suffix('d')?.parse::<usize>().ok()?;
    (1..=MAX_ARRAY_DIMS).contains(&dims).then_some(dims)
}

fn set_elem_hint<'h>(hint: Option<&'h VarType>, token: &Token) -> Result<Option<&'h VarType>, Error> {
    match hint {
        None => Ok(None),
        Some(VarType::Set(elem)) => Ok(Some(&**elem)),
        Some(other) => Err(error_at(token, format!("expected {other}, found set"))),
    }
}

fn array_elem_hint<'h>(
    hint: Option<&'h VarType>,
    dims: usize,
    token: &Token,
) -> Result<Option<&'h VarType>, Error> {
    match hint {
        None => Ok(None),
        Some(VarType::Array { dims: expected, elem }) if *expected == dims => Ok(Some(&**elem)),
        Some(VarType::Array { dims: expected, .. }) => Err(error_at(
            token,
            format!("expected a {expected}-dimensional array, found {dims} dimension(s)"),
        )),
        Some(other) => Err(error_at(token, format!("expected {other}, found array"))),
    }
}

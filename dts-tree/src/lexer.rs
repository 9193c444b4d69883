//! Tokenizer for devicetree source.
//!
//! The lexer reads one file at a time and keeps a stack of the files that
//! `/include/`d it, so that the end of an included file resumes lexing in the
//! file that included it. Token classes are recognized with `nom` parsers over
//! [`LocatedSpan`]s, which also count the newlines each token spans.
//!
//! Which token classes are tried depends on the lexer [`State`]: property and
//! node names, numbers and bytes all overlap, so the parser's position in the
//! grammar decides how e.g. `12` is read.

use std::{
    fmt, fs,
    io::{self, Read},
    mem,
    path::{Path, PathBuf},
};

use log::{debug, trace};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_until, take_while, take_while1, take_while_m_n},
    character::complete::{char, digit1, hex_digit1, satisfy, u32 as decimal_u32},
    combinator::{eof, map, opt, recognize, value},
    error::{Error as NomError, ErrorKind},
    multi::{many0_count, many_m_n},
    sequence::{delimited, pair, preceded, terminated, tuple},
    Slice,
};
use nom_locate::LocatedSpan;

use crate::error::{Error, Result};

pub(crate) type Span<'a> = LocatedSpan<&'a [u8]>;

type IResult<'a, O> = nom::IResult<Span<'a>, O>;

/// Punctuation and operators, in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Punct {
    EqEq,
    NotEq,
    Not,
    Assign,
    Comma,
    Semi,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Tilde,
    Question,
    Colon,
    Caret,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Shl,
    Le,
    Lt,
    Shr,
    Ge,
    Gt,
    OrOr,
    Or,
    AndAnd,
    And,
}

impl Punct {
    const ALL: [Punct; 31] = [
        Punct::EqEq,
        Punct::NotEq,
        Punct::Not,
        Punct::Assign,
        Punct::Comma,
        Punct::Semi,
        Punct::Plus,
        Punct::Minus,
        Punct::Star,
        Punct::Slash,
        Punct::Percent,
        Punct::Tilde,
        Punct::Question,
        Punct::Colon,
        Punct::Caret,
        Punct::LParen,
        Punct::RParen,
        Punct::LBrace,
        Punct::RBrace,
        Punct::LBracket,
        Punct::RBracket,
        Punct::Shl,
        Punct::Le,
        Punct::Lt,
        Punct::Shr,
        Punct::Ge,
        Punct::Gt,
        Punct::OrOr,
        Punct::Or,
        Punct::AndAnd,
        Punct::And,
    ];

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Punct::EqEq => "==",
            Punct::NotEq => "!=",
            Punct::Not => "!",
            Punct::Assign => "=",
            Punct::Comma => ",",
            Punct::Semi => ";",
            Punct::Plus => "+",
            Punct::Minus => "-",
            Punct::Star => "*",
            Punct::Slash => "/",
            Punct::Percent => "%",
            Punct::Tilde => "~",
            Punct::Question => "?",
            Punct::Colon => ":",
            Punct::Caret => "^",
            Punct::LParen => "(",
            Punct::RParen => ")",
            Punct::LBrace => "{",
            Punct::RBrace => "}",
            Punct::LBracket => "[",
            Punct::RBracket => "]",
            Punct::Shl => "<<",
            Punct::Le => "<=",
            Punct::Lt => "<",
            Punct::Shr => ">>",
            Punct::Ge => ">=",
            Punct::Gt => ">",
            Punct::OrOr => "||",
            Punct::Or => "|",
            Punct::AndAnd => "&&",
            Punct::And => "&",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    /// A quoted string, with escapes already processed.
    Str(Vec<u8>),
    DtsV1,
    Plugin,
    MemReserve,
    Bits,
    DeleteProperty,
    DeleteNode,
    OmitIfNoRef,
    /// `label:`, without the colon.
    Label(String),
    /// A character literal, decoded to its single byte.
    Char(u8),
    /// `&label` or `&{/path}`, without the ampersand.
    Ref(String),
    IncBin,
    Num(i128),
    PropNodeName(String),
    Byte(u8),
    Punct(Punct),
    /// Anything the lexer could not make sense of. The parser reports it.
    Bad,
    Eof,
}

impl Token {
    pub(crate) fn is_punct(&self, punct: Punct) -> bool {
        *self == Token::Punct(punct)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Str(s) => f.write_str(&String::from_utf8_lossy(s)),
            Token::DtsV1 => f.write_str("/dts-v1/"),
            Token::Plugin => f.write_str("/plugin/"),
            Token::MemReserve => f.write_str("/memreserve/"),
            Token::Bits => f.write_str("/bits/"),
            Token::DeleteProperty => f.write_str("/delete-property/"),
            Token::DeleteNode => f.write_str("/delete-node/"),
            Token::OmitIfNoRef => f.write_str("/omit-if-no-ref/"),
            Token::Label(s) | Token::Ref(s) | Token::PropNodeName(s) => f.write_str(s),
            Token::Char(c) | Token::Byte(c) => write!(f, "{c}"),
            Token::IncBin => f.write_str("/incbin/"),
            Token::Num(n) => write!(f, "{n}"),
            Token::Punct(p) => f.write_str(p.as_str()),
            Token::Bad => f.write_str("<unknown token>"),
            Token::Eof => f.write_str("<EOF>"),
        }
    }
}

/// Which context-dependent token class the lexer tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum State {
    Default,
    ExpectPropNodeName,
    ExpectByte,
}

/// What a single recognizer pass produced, before any file handling.
#[derive(Debug, Clone)]
enum Lexeme {
    Include(Vec<u8>),
    Line(u32, Vec<u8>),
    Skip,
    Eof,
    Str(Vec<u8>),
    Char(Vec<u8>),
    Num(Vec<u8>),
    Token(Token),
}

struct SourceFile {
    path: PathBuf,
    /// Name used in error messages. `#line` can change it.
    name: String,
    line: u32,
    contents: Vec<u8>,
    pos: usize,
}

impl SourceFile {
    fn new(path: PathBuf, contents: Vec<u8>) -> Self {
        let name = if path == Path::new("-") {
            "<stdin>".to_string()
        } else {
            path.display().to_string()
        };

        Self {
            path,
            name,
            line: 1,
            contents,
            pos: 0,
        }
    }
}

pub(crate) struct Lexer {
    file: SourceFile,
    stack: Vec<SourceFile>,
    include_path: Vec<PathBuf>,
    state: State,
    tok_start: usize,
    tok_line: u32,
}

impl Lexer {
    pub(crate) fn new(path: PathBuf, contents: Vec<u8>, include_path: Vec<PathBuf>) -> Self {
        Self {
            file: SourceFile::new(path, contents),
            stack: Vec::new(),
            include_path,
            state: State::Default,
            tok_start: 0,
            tok_line: 1,
        }
    }

    /// Lexes the next token, following `/include/`s and skipping whitespace
    /// and comments.
    pub(crate) fn next_token(&mut self) -> Result<Token> {
        loop {
            let file = &self.file;
            let input = Span::new(&file.contents[file.pos..]);
            let at_line_start = file.pos == 0 || file.contents[file.pos - 1] == b'\n';

            self.tok_start = file.pos;
            self.tok_line = file.line;

            let (consumed, newlines, lexeme) = match lexeme(input, at_line_start, self.state) {
                Ok((rest, lexeme)) => (rest.location_offset(), rest.location_line() - 1, lexeme),
                Err(_) => return Ok(Token::Bad),
            };

            self.file.pos += consumed;
            self.file.line += newlines;

            let token = match lexeme {
                Lexeme::Skip => continue,
                Lexeme::Include(name) => {
                    self.enter_file(&name)?;
                    continue;
                }
                Lexeme::Line(line, name) => {
                    // The newline ending the directive brings us to `line`.
                    self.file.line = line.saturating_sub(1);
                    self.file.name = String::from_utf8_lossy(&name).into_owned();
                    continue;
                }
                Lexeme::Eof => match self.stack.pop() {
                    Some(parent) => {
                        debug!("leaving {}", self.file.name);
                        self.file = parent;
                        continue;
                    }
                    None => Token::Eof,
                },
                Lexeme::Str(raw) => Token::Str(self.unescape(&raw)?),
                Lexeme::Char(raw) => {
                    let value = self.unescape(&raw)?;
                    match value[..] {
                        [c] => Token::Char(c),
                        _ => return Err(self.error("character literals must be length 1")),
                    }
                }
                Lexeme::Num(digits) => Token::Num(self.number(&digits)?),
                Lexeme::Token(token) => token,
            };

            self.state = match token {
                Token::DeleteProperty
                | Token::DeleteNode
                | Token::OmitIfNoRef
                | Token::Punct(Punct::LBrace | Punct::Semi) => State::ExpectPropNodeName,
                Token::Punct(Punct::LBracket) => State::ExpectByte,
                Token::MemReserve
                | Token::Bits
                | Token::PropNodeName(_)
                | Token::Punct(Punct::RBracket) => State::Default,
                _ => self.state,
            };

            trace!("{}:{}: {token:?}", self.file.name, self.tok_line);
            return Ok(token);
        }
    }

    /// Builds a parse error pointing at the most recently lexed token.
    pub(crate) fn error(&self, msg: impl fmt::Display) -> Error {
        let start = self.tok_start.min(self.file.contents.len());
        let column = Span::new(&self.file.contents[..]).slice(start..).get_column();

        Error::msg(format!(
            "{}:{} (column {column}): parse error: {msg}",
            self.file.name, self.tok_line
        ))
    }

    /// Reads `name`, looking in the directory of the current file first and
    /// then in each include directory. `-` reads standard input.
    pub(crate) fn open(&self, name: &str) -> Result<(PathBuf, Vec<u8>)> {
        if name == "-" {
            let mut contents = Vec::new();
            io::stdin()
                .lock()
                .read_to_end(&mut contents)
                .map_err(|e| self.error(format!("could not read '{name}': {e}")))?;
            return Ok((PathBuf::from("-"), contents));
        }

        let dir = self.file.path.parent().unwrap_or_else(|| Path::new(""));
        let candidates = std::iter::once(dir.join(name))
            .chain(self.include_path.iter().map(|dir| dir.join(name)));

        for candidate in candidates {
            match fs::read(&candidate) {
                Ok(contents) => return Ok((candidate, contents)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(self.error(format!("could not read '{name}': {e}"))),
            }
        }

        Err(self.error(format!("'{name}' could not be found")))
    }

    fn enter_file(&mut self, raw_name: &[u8]) -> Result<()> {
        let name = String::from_utf8(self.unescape(raw_name)?)
            .map_err(|_| self.error("filename is not valid UTF-8"))?;
        let (path, contents) = self.open(&name)?;

        let chain: Vec<&SourceFile> = self.stack.iter().chain([&self.file]).collect();
        if let Some(first) = chain.iter().position(|file| file.path == path) {
            let mut trail: Vec<String> = chain[first..]
                .iter()
                .map(|file| format!("{}:{}", file.name, file.line))
                .collect();
            trail.push(path.display().to_string());

            return Err(self.error(format!("recursive /include/:\n{}", trail.join(" ->\n"))));
        }

        debug!("including {}", path.display());

        let parent = mem::replace(&mut self.file, SourceFile::new(path, contents));
        self.stack.push(parent);
        Ok(())
    }

    /// Processes backslash escapes. Works on bytes since octal and hex escapes
    /// can produce invalid UTF-8.
    fn unescape(&self, raw: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(raw.len());
        let mut i = 0;

        while i < raw.len() {
            let c = raw[i];
            if c != b'\\' || i + 1 == raw.len() || raw[i + 1] == b'\n' {
                out.push(c);
                i += 1;
                continue;
            }

            let esc = raw[i + 1];
            i += 2;

            match esc {
                b'a' => out.push(0x07),
                b'b' => out.push(0x08),
                b't' => out.push(b'\t'),
                b'n' => out.push(b'\n'),
                b'v' => out.push(0x0b),
                b'f' => out.push(0x0c),
                b'r' => out.push(b'\r'),
                b'0'..=b'7' => {
                    let digits = 1 + raw[i..]
                        .iter()
                        .take(2)
                        .take_while(|c| (b'0'..=b'7').contains(c))
                        .count();
                    let value = raw[i - 1..i - 1 + digits]
                        .iter()
                        .fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));

                    let byte = u8::try_from(value)
                        .map_err(|_| self.error("octal escape out of range (> 255)"))?;
                    out.push(byte);
                    i += digits - 1;
                }
                b'x' if raw.get(i).is_some_and(u8::is_ascii_hexdigit) => {
                    let digits = raw[i..]
                        .iter()
                        .take(2)
                        .take_while(|c| c.is_ascii_hexdigit())
                        .count();
                    out.push(hex_value(&raw[i..i + digits]));
                    i += digits;
                }
                other => out.push(other),
            }
        }

        Ok(out)
    }

    fn number(&self, digits: &[u8]) -> Result<i128> {
        let text = String::from_utf8_lossy(digits);

        let (radix, body) = if let Some(hex) = text.strip_prefix("0x").or(text.strip_prefix("0X")) {
            (16, hex)
        } else if text.len() > 1 && text.starts_with('0') {
            (8, &text[1..])
        } else {
            (10, &text[..])
        };

        i128::from_str_radix(body, radix).map_err(|_| self.error(format!("invalid number '{text}'")))
    }
}

/// Recognizes a single lexeme at the start of `input`.
fn lexeme(input: Span<'_>, at_line_start: bool, state: State) -> IResult<'_, Lexeme> {
    if at_line_start {
        if let Ok(res) = line_marker(input) {
            return Ok(res);
        }
    }

    let common = alt((
        map(include_directive, |name| Lexeme::Include(name.to_vec())),
        map(quoted(b'"'), |s| Lexeme::Str(s.to_vec())),
        map(keyword, Lexeme::Token),
        map(label, |l| Lexeme::Token(Token::Label(text(l)))),
        map(quoted(b'\''), |s| Lexeme::Char(s.to_vec())),
        map(reference, |r| Lexeme::Token(Token::Ref(text(r)))),
        value(Lexeme::Token(Token::IncBin), tag("/incbin/")),
        value(Lexeme::Skip, skip),
        value(Lexeme::Eof, eof),
    ))(input);

    match common {
        Err(nom::Err::Error(_)) => {}
        res => return res,
    }

    let contextual = match state {
        State::Default => map(number, |n| Lexeme::Num(n.to_vec()))(input),
        State::ExpectPropNodeName => map(prop_node_name, |n| {
            Lexeme::Token(Token::PropNodeName(text(n)))
        })(input),
        State::ExpectByte => map(hex_byte, |b| Lexeme::Token(Token::Byte(b)))(input),
    };

    contextual.or_else(|_| map(punct, |p| Lexeme::Token(Token::Punct(p)))(input))
}

/// Recognize an `/include/ "file"` directive, returning the raw file name.
fn include_directive(input: Span<'_>) -> IResult<'_, Span<'_>> {
    preceded(pair(tag("/include/"), take_while(is_space)), quoted(b'"'))(input)
}

/// Recognize a `#line N "file"` directive or a GCC linemarker.
fn line_marker(input: Span<'_>) -> IResult<'_, Lexeme> {
    map(
        tuple((
            char('#'),
            opt(tag("line")),
            blank,
            decimal_u32,
            blank,
            quoted(b'"'),
            many_m_n(0, 4, pair(blank, digit1)),
        )),
        |(_, _, _, line, _, name, _)| Lexeme::Line(line, name.to_vec()),
    )(input)
}

/// Recognize a literal delimited by `delim`, returning its body with escapes
/// left in place.
fn quoted<'a>(delim: u8) -> impl FnMut(Span<'a>) -> IResult<'a, Span<'a>> {
    delimited(
        char(char::from(delim)),
        recognize(many0_count(alt((
            take_while1(move |c: u8| c != b'\\' && c != delim),
            recognize(pair(char('\\'), satisfy(|c| c != '\n'))),
        )))),
        char(char::from(delim)),
    )
}

fn keyword(input: Span<'_>) -> IResult<'_, Token> {
    alt((
        value(Token::DtsV1, tag("/dts-v1/")),
        value(Token::Plugin, tag("/plugin/")),
        value(Token::MemReserve, tag("/memreserve/")),
        value(Token::Bits, tag("/bits/")),
        value(Token::DeleteProperty, tag("/delete-property/")),
        value(Token::DeleteNode, tag("/delete-node/")),
        value(Token::OmitIfNoRef, tag("/omit-if-no-ref/")),
    ))(input)
}

/// Recognize a C identifier.
fn identifier(input: Span<'_>) -> IResult<'_, Span<'_>> {
    recognize(pair(
        satisfy(|c| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: u8| c.is_ascii_alphanumeric() || c == b'_'),
    ))(input)
}

fn label(input: Span<'_>) -> IResult<'_, Span<'_>> {
    terminated(identifier, char(':'))(input)
}

/// Recognize `&label` or `&{/path}`. The braces are kept for paths.
fn reference(input: Span<'_>) -> IResult<'_, Span<'_>> {
    preceded(
        char('&'),
        alt((
            identifier,
            recognize(delimited(char('{'), take_while(is_path_char), char('}'))),
        )),
    )(input)
}

/// Recognize whitespace, a C comment or a C++ comment.
fn skip(input: Span<'_>) -> IResult<'_, Span<'_>> {
    alt((
        take_while1(is_space),
        recognize(tuple((tag("/*"), take_until("*/"), tag("*/")))),
        recognize(pair(tag("//"), take_while(|c: u8| c != b'\n'))),
    ))(input)
}

/// Recognize an integer literal, returning it without its C suffix.
fn number(input: Span<'_>) -> IResult<'_, Span<'_>> {
    terminated(
        alt((
            recognize(pair(alt((tag("0x"), tag("0X"))), hex_digit1)),
            digit1,
        )),
        opt(alt((tag("ULL"), tag("UL"), tag("LL"), tag("U"), tag("L")))),
    )(input)
}

/// Recognize a property or node name. A leading backslash is dropped.
fn prop_node_name(input: Span<'_>) -> IResult<'_, Span<'_>> {
    preceded(opt(char('\\')), take_while1(is_prop_node_name_char))(input)
}

fn hex_byte(input: Span<'_>) -> IResult<'_, u8> {
    map(take_while_m_n(2, 2, |c: u8| c.is_ascii_hexdigit()), |s: Span<'_>| {
        hex_value(s.fragment())
    })(input)
}

fn punct(input: Span<'_>) -> IResult<'_, Punct> {
    for p in Punct::ALL {
        if let Ok((rest, _)) = tag::<_, _, NomError<Span<'_>>>(p.as_str())(input) {
            return Ok((rest, p));
        }
    }

    Err(nom::Err::Error(NomError::new(input, ErrorKind::Tag)))
}

fn blank(input: Span<'_>) -> IResult<'_, Span<'_>> {
    take_while1(|c: u8| c == b' ' || c == b'\t')(input)
}

fn is_space(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c)
}

fn is_path_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || b",._+*#?@/-".contains(&c)
}

fn is_prop_node_name_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || b",._+*#?@-".contains(&c)
}

fn hex_value(digits: &[u8]) -> u8 {
    digits.iter().fold(0, |acc, &d| {
        let nibble = match d {
            b'0'..=b'9' => d - b'0',
            b'a'..=b'f' => d - b'a' + 10,
            b'A'..=b'F' => d - b'A' + 10,
            _ => 0,
        };
        (acc << 4) | nibble
    })
}

fn text(span: Span<'_>) -> String {
    String::from_utf8_lossy(span.fragment()).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lexer(source: &str) -> Lexer {
        Lexer::new(
            PathBuf::from("test.dts"),
            source.as_bytes().to_vec(),
            Vec::new(),
        )
    }

    fn tokens(source: &str) -> Vec<Token> {
        let mut lexer = lexer(source);
        let mut tokens = Vec::new();
        loop {
            match lexer.next_token().unwrap() {
                Token::Eof => return tokens,
                tok => tokens.push(tok),
            }
        }
    }

    #[test]
    fn numbers() {
        for (input, expected) in [
            ("0", 0),
            ("25", 25),
            ("0x1f", 0x1f),
            ("0X1F", 0x1f),
            ("017", 0o17),
            ("10U", 10),
            ("10UL", 10),
            ("0x10ULL", 0x10),
            ("7LL", 7),
            ("0xffffffffffffffff", 0xffff_ffff_ffff_ffff),
        ] {
            assert_eq!(vec![Token::Num(expected)], tokens(dbg!(input)));
        }
    }

    #[test]
    fn strings() {
        for (input, expected) in [
            (r#""word""#, &b"word"[..]),
            (r#""more words""#, b"more words"),
            ("\"words with\nnewline\"", b"words with\nnewline"),
            (r#""nested \"quotes\"""#, br#"nested "quotes""#),
            (r#""escaped \\ delimiters""#, br"escaped \ delimiters"),
            (r#""\a\b\t\n\v\f\r""#, b"\x07\x08\t\n\x0b\x0c\r"),
            (r#""\101\0\377""#, b"A\0\xff"),
            (r#""\x41\x4g\xz""#, b"A\x04gxz"),
            (r#""\q""#, b"q"),
        ] {
            assert_eq!(vec![Token::Str(expected.to_vec())], tokens(dbg!(input)));
        }
    }

    #[test]
    fn bad_escapes() {
        let err = lexer(r#""\400""#).next_token().unwrap_err();
        assert_eq!(
            "test.dts:1 (column 1): parse error: octal escape out of range (> 255)",
            err.to_string()
        );

        let err = lexer("'ab'").next_token().unwrap_err();
        assert_eq!(
            "test.dts:1 (column 1): parse error: character literals must be length 1",
            err.to_string()
        );
    }

    #[test]
    fn character_literals() {
        for (input, expected) in [("'a'", b'a'), (r"'\n'", b'\n'), (r"'\x7f'", 0x7f), (r"'\''", b'\'')] {
            assert_eq!(vec![Token::Char(expected)], tokens(dbg!(input)));
        }
    }

    #[test]
    fn operators() {
        for p in Punct::ALL {
            assert_eq!(vec![Token::Punct(p)], tokens(dbg!(p.as_str())));
        }

        assert_eq!(
            vec![
                Token::Punct(Punct::Shl),
                Token::Punct(Punct::Lt),
                Token::Punct(Punct::AndAnd),
                Token::Punct(Punct::And),
            ],
            tokens("<<<&&&")
        );
    }

    #[test]
    fn directives() {
        for (input, expected) in [
            ("/dts-v1/", Token::DtsV1),
            ("/plugin/", Token::Plugin),
            ("/bits/", Token::Bits),
            ("/delete-node/", Token::DeleteNode),
            ("/delete-property/", Token::DeleteProperty),
            ("/omit-if-no-ref/", Token::OmitIfNoRef),
            ("/memreserve/", Token::MemReserve),
            ("/incbin/", Token::IncBin),
        ] {
            assert_eq!(vec![expected], tokens(dbg!(input)));
        }
    }

    #[test]
    fn labels_and_references() {
        assert_eq!(
            vec![
                Token::Label("L2_0".into()),
                Token::Ref("intc".into()),
                Token::Ref("{/cpus/cpu@0}".into()),
                Token::Ref("{}".into()),
            ],
            tokens("L2_0: &intc &{/cpus/cpu@0} &{}")
        );
    }

    #[test]
    fn comments_and_whitespace() {
        assert_eq!(
            vec![Token::Num(1), Token::Num(2), Token::Num(3)],
            tokens("1 /* block\n comment */ 2 // line comment\n\t3 // trailing")
        );
    }

    #[test]
    fn property_and_node_names() {
        assert_eq!(
            vec![
                Token::Punct(Punct::LBrace),
                Token::PropNodeName("#address-cells".into()),
                Token::Punct(Punct::Assign),
                Token::Punct(Punct::Lt),
                Token::Num(2),
                Token::Punct(Punct::Gt),
                Token::Punct(Punct::Semi),
                Token::PropNodeName("cpu@0".into()),
                Token::Punct(Punct::LBrace),
                Token::PropNodeName("12".into()),
                Token::Punct(Punct::Semi),
                Token::PropNodeName("weird-name".into()),
            ],
            tokens("{ #address-cells = <2>; cpu@0 { 12; \\weird-name")
        );
    }

    #[test]
    fn bytes() {
        assert_eq!(
            vec![
                Token::Punct(Punct::LBracket),
                Token::Byte(0x0a),
                Token::Byte(0xbc),
                Token::Label("mid".into()),
                Token::Byte(0xde),
                Token::Byte(0xf0),
                Token::Punct(Punct::RBracket),
                Token::Num(12),
            ],
            tokens("[0a BC mid: def0] 12")
        );
    }

    #[test]
    fn bad_token() {
        let mut lexer = lexer("\n  $");
        assert_eq!(Token::Bad, lexer.next_token().unwrap());
        assert_eq!(
            "test.dts:2 (column 3): parse error: oops",
            lexer.error("oops").to_string()
        );
    }

    #[test]
    fn line_directives() {
        let mut lexer = lexer("#line 100 \"board.dts\"\n1\n# 7 \"other.dtsi\" 1 3\n2");

        assert_eq!(Token::Num(1), lexer.next_token().unwrap());
        assert!(lexer.error("x").to_string().starts_with("board.dts:100 "));

        assert_eq!(Token::Num(2), lexer.next_token().unwrap());
        assert!(lexer.error("x").to_string().starts_with("other.dtsi:7 "));
    }

    #[test]
    fn state_transitions() {
        let mut lexer = lexer("{ 12 } [ 12 ] 12");

        assert_eq!(State::Default, lexer.state);
        lexer.next_token().unwrap();
        assert_eq!(State::ExpectPropNodeName, lexer.state);
        assert_eq!(Token::PropNodeName("12".into()), lexer.next_token().unwrap());
        assert_eq!(State::Default, lexer.state);
        assert_eq!(Token::Punct(Punct::RBrace), lexer.next_token().unwrap());
        assert_eq!(Token::Punct(Punct::LBracket), lexer.next_token().unwrap());
        assert_eq!(State::ExpectByte, lexer.state);
        assert_eq!(Token::Byte(0x12), lexer.next_token().unwrap());
        assert_eq!(Token::Punct(Punct::RBracket), lexer.next_token().unwrap());
        assert_eq!(State::Default, lexer.state);
        assert_eq!(Token::Num(12), lexer.next_token().unwrap());
    }
}

//! The scripting language's AST and tokenizer/parser (component C1).
//!
//! The language is line-oriented: each command is a name followed by
//! arguments, an optional `{ ... }` block, and optional trailing flags. The
//! parser builds a tree once; nothing downstream mutates it.

use crate::error::{Error, Result};

/// One node of the parsed script tree.
#[derive(Debug, Clone)]
pub enum Node {
    /// The file root; children are the top-level commands in source order.
    Root(Vec<Node>),
    /// `vtest "description"`.
    Vtest { description: String, line: usize },
    /// A comment line, kept only so `--dump-ast` can show source fidelity.
    Comment { text: String, line: usize },
    /// `NAME ARG ARG ... [{ BODY }] [ARG ARG ...]`.
    Command {
        name: String,
        args: Vec<String>,
        body: Vec<Node>,
        line: usize,
    },
}

impl Node {
    /// The source line this node started on.
    pub fn line(&self) -> usize {
        match self {
            Node::Root(_) => 0,
            Node::Vtest { line, .. } => *line,
            Node::Comment { line, .. } => *line,
            Node::Command { line, .. } => *line,
        }
    }
}

/// The closed set of names that make `{` after a command introduce a block
/// rather than a literal string. Enumerated once, per the grammar's
/// disambiguation rule, rather than consulted from the live command
/// registry mid-parse.
pub const BLOCK_COMMAND_NAMES: &[&str] = &[
    "vtest", "feature", "filewrite", "process", "client", "server", "barrier", "shell", "delay",
    "stream", "txreq", "rxreq", "txresp", "rxresp", "rxresphdrs", "rxrespbody", "expect", "send",
    "sendhex", "recv", "timeout", "gunzip", "write_body", "txdata", "rxdata", "rxhdrs", "txprio",
    "rxprio", "txrst", "rxrst", "txping", "rxping", "txgoaway", "rxgoaway", "txwinup", "rxwinup",
    "txsettings", "rxsettings", "txpri", "rxpri",
];

fn is_block_command(name: &str) -> bool {
    BLOCK_COMMAND_NAMES.contains(&name)
}

/// Parse a whole `.vtc` script into a `Root` node.
pub fn parse(src: &str) -> Result<Node> {
    let mut lexer = Lexer::new(src);
    let mut children = Vec::new();
    while let Some(node) = parse_node(&mut lexer)? {
        children.push(node);
    }
    Ok(Node::Root(children))
}

fn parse_node(lexer: &mut Lexer) -> Result<Option<Node>> {
    lexer.skip_blank_lines();
    if lexer.at_eof() {
        return Ok(None);
    }
    let line = lexer.line();
    if lexer.peek_is_comment() {
        let text = lexer.take_comment();
        return Ok(Some(Node::Comment { text, line }));
    }

    let name = lexer
        .next_token()?
        .ok_or_else(|| Error::parse("expected a command name").with_line(line))?;

    if name == "vtest" {
        let description = lexer
            .next_token()?
            .ok_or_else(|| Error::parse("vtest requires a description").with_line(line))?;
        lexer.finish_line()?;
        return Ok(Some(Node::Vtest { description, line }));
    }

    let mut args = Vec::new();
    let mut body = Vec::new();
    loop {
        match lexer.next_arg_or_brace()? {
            ArgOrBrace::Arg(tok) => args.push(tok),
            ArgOrBrace::Brace => {
                if is_block_command(lexer.peek_word().unwrap_or_default().as_str()) {
                    body = parse_block(lexer)?;
                } else {
                    args.push(lexer.take_brace_string()?);
                }
            }
            ArgOrBrace::EndOfLine => break,
        }
    }
    lexer.finish_line()?;

    Ok(Some(Node::Command {
        name,
        args,
        body,
        line,
    }))
}

fn parse_block(lexer: &mut Lexer) -> Result<Vec<Node>> {
    let mut children = Vec::new();
    loop {
        lexer.skip_blank_lines();
        if lexer.peek_close_brace() {
            lexer.consume_close_brace();
            return Ok(children);
        }
        if lexer.at_eof() {
            return Err(Error::parse("unclosed '{' block").with_line(lexer.line()));
        }
        if let Some(node) = parse_node_in_block(lexer)? {
            children.push(node);
        }
    }
}

fn parse_node_in_block(lexer: &mut Lexer) -> Result<Option<Node>> {
    if lexer.peek_is_comment() {
        let line = lexer.line();
        let text = lexer.take_comment();
        return Ok(Some(Node::Comment { text, line }));
    }
    parse_node(lexer)
}

enum ArgOrBrace {
    Arg(String),
    Brace,
    EndOfLine,
}

/// Hand-rolled line-aware tokenizer; not a general lexer, just enough
/// structure to drive the recursive-descent parser above.
struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Lexer<'a> {
        Lexer {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            line: 1,
        }
    }

    fn line(&self) -> usize {
        self.line
    }

    fn at_eof(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
        }
        Some(b)
    }

    /// Skip spaces/tabs, blank lines, and `\`-continued line breaks. Does
    /// NOT skip comments (those are surfaced as `Comment` nodes).
    fn skip_blank_lines(&mut self) {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n') => {
                    self.advance();
                }
                Some(b'\\') if self.bytes.get(self.pos + 1) == Some(&b'\n') => {
                    self.advance();
                    self.advance();
                }
                _ => break,
            }
        }
    }

    fn skip_inline_space(&mut self) {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') => {
                    self.advance();
                }
                Some(b'\\') if self.bytes.get(self.pos + 1) == Some(&b'\n') => {
                    self.advance();
                    self.advance();
                }
                _ => break,
            }
        }
    }

    fn peek_is_comment(&self) -> bool {
        self.peek() == Some(b'#')
    }

    fn take_comment(&mut self) -> String {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b == b'\n' {
                break;
            }
            self.advance();
        }
        self.src[start..self.pos].to_string()
    }

    fn peek_close_brace(&mut self) -> bool {
        self.skip_blank_lines();
        self.peek() == Some(b'}')
    }

    fn consume_close_brace(&mut self) {
        self.advance();
    }

    /// Read the next whitespace-delimited token (identifier, quoted string,
    /// or macro reference), without brace-vs-string handling.
    fn next_token(&mut self) -> Result<Option<String>> {
        self.skip_inline_space();
        match self.peek() {
            None | Some(b'\n') | Some(b'#') => Ok(None),
            Some(b'"') => Ok(Some(self.take_quoted_string()?)),
            _ => Ok(Some(self.take_bare_token())),
        }
    }

    /// Read the next argument, or report that a `{` or end-of-line was seen.
    fn next_arg_or_brace(&mut self) -> Result<ArgOrBrace> {
        self.skip_inline_space();
        match self.peek() {
            None | Some(b'\n') | Some(b'#') | Some(b'}') => Ok(ArgOrBrace::EndOfLine),
            Some(b'{') => {
                self.advance();
                Ok(ArgOrBrace::Brace)
            }
            Some(b'"') => Ok(ArgOrBrace::Arg(self.take_quoted_string()?)),
            _ => Ok(ArgOrBrace::Arg(self.take_bare_token())),
        }
    }

    /// Peek the first word after an already-consumed `{`, without advancing.
    fn peek_word(&self) -> Option<String> {
        let mut i = self.pos;
        while matches!(self.bytes.get(i), Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n')) {
            i += 1;
        }
        let start = i;
        while let Some(&b) = self.bytes.get(i) {
            if b.is_ascii_alphanumeric() || b == b'_' {
                i += 1;
            } else {
                break;
            }
        }
        if i == start {
            None
        } else {
            Some(self.src[start..i].to_string())
        }
    }

    fn take_bare_token(&mut self) -> String {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b == b'$' && self.bytes.get(self.pos + 1) == Some(&b'{') {
                // `${name}` is consumed whole so its `{` doesn't get mistaken
                // for the start of a command block mid-token.
                self.advance();
                self.advance();
                while let Some(b2) = self.peek() {
                    self.advance();
                    if b2 == b'}' {
                        break;
                    }
                }
                continue;
            }
            if b == b' ' || b == b'\t' || b == b'\n' || b == b'\r' || b == b'{' || b == b'}' {
                break;
            }
            self.advance();
        }
        self.src[start..self.pos].to_string()
    }

    fn take_quoted_string(&mut self) -> Result<String> {
        let line = self.line;
        self.advance(); // opening quote
        let mut out = String::new();
        loop {
            match self.advance() {
                None => return Err(Error::parse("unterminated string").with_line(line)),
                Some(b'"') => return Ok(out),
                Some(b'\\') => out.push(self.take_escape(line)?),
                Some(b) => out.push(b as char),
            }
        }
    }

    /// Read the literal content up to the matching `}` (braces may not
    /// nest inside a brace-string per the grammar), applying the same
    /// escape processing as quoted strings.
    fn take_brace_string(&mut self) -> Result<String> {
        let line = self.line;
        let mut out = String::new();
        loop {
            match self.advance() {
                None => return Err(Error::parse("unclosed '{' string").with_line(line)),
                Some(b'}') => return Ok(out),
                Some(b'\\') => out.push(self.take_escape(line)?),
                Some(b) => out.push(b as char),
            }
        }
    }

    fn take_escape(&mut self, line: usize) -> Result<char> {
        match self.advance() {
            None => Err(Error::parse("unterminated escape").with_line(line)),
            Some(b'n') => Ok('\n'),
            Some(b'r') => Ok('\r'),
            Some(b't') => Ok('\t'),
            Some(b'\\') => Ok('\\'),
            Some(b'"') => Ok('"'),
            Some(b'x') => {
                let hi = self.advance().ok_or_else(|| {
                    Error::parse("truncated \\xNN escape").with_line(line)
                })?;
                let lo = self.advance().ok_or_else(|| {
                    Error::parse("truncated \\xNN escape").with_line(line)
                })?;
                let hex = [hi, lo];
                let hex = std::str::from_utf8(&hex)
                    .map_err(|_| Error::parse("invalid \\xNN escape").with_line(line))?;
                let byte = u8::from_str_radix(hex, 16)
                    .map_err(|_| Error::parse("invalid \\xNN escape").with_line(line))?;
                Ok(byte as char)
            }
            Some(other) => Ok(other as char),
        }
    }

    /// Consume the rest of the current physical line (a trailing comment,
    /// if any, followed by the newline) after a command or vtest.
    fn finish_line(&mut self) -> Result<()> {
        self.skip_inline_space();
        match self.peek() {
            Some(b'#') => {
                self.take_comment();
            }
            Some(b'\n') | None => {}
            // A `}` closing an enclosing block can follow a command with no
            // newline in between (single-line nested blocks); leave it for
            // the enclosing `parse_block` to consume.
            Some(b'}') => {}
            Some(other) => {
                return Err(Error::parse(format!(
                    "unexpected trailing character {:?}",
                    other as char
                ))
                .with_line(self.line));
            }
        }
        if self.peek() == Some(b'\n') {
            self.advance();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commands(root: &Node) -> Vec<&Node> {
        match root {
            Node::Root(children) => children.iter().collect(),
            _ => panic!("expected root"),
        }
    }

    #[test]
    fn parses_simple_command() {
        let ast = parse("barrier b1 cond 2\n").unwrap();
        let children = commands(&ast);
        assert_eq!(children.len(), 1);
        match children[0] {
            Node::Command { name, args, .. } => {
                assert_eq!(name, "barrier");
                assert_eq!(args, &["b1", "cond", "2"]);
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn parses_vtest_description() {
        let ast = parse("vtest \"basic GET\"\n").unwrap();
        match &commands(&ast)[0] {
            Node::Vtest { description, .. } => assert_eq!(description, "basic GET"),
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn parses_quoted_string_with_escapes() {
        let ast = parse("txreq -hdr \"X-Foo: bar\\r\\n\"\n").unwrap();
        match &commands(&ast)[0] {
            Node::Command { args, .. } => {
                assert_eq!(args[1], "X-Foo: bar\r\n");
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn distinguishes_block_from_brace_string() {
        let ast = parse("client c1 {\n    txreq -url /\n} -run\n").unwrap();
        match &commands(&ast)[0] {
            Node::Command { name, args, body, .. } => {
                assert_eq!(name, "client");
                assert_eq!(args, &["c1", "-run"]);
                assert_eq!(body.len(), 1);
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn brace_with_unknown_leading_word_is_a_literal_string() {
        let ast = parse("expect resp.body == {not a command}\n").unwrap();
        match &commands(&ast)[0] {
            Node::Command { args, .. } => {
                assert_eq!(args, &["resp.body", "==", "not a command"]);
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn comment_lines_are_preserved() {
        let ast = parse("# a comment\nbarrier b1 cond 1\n").unwrap();
        let children = commands(&ast);
        assert_eq!(children.len(), 2);
        assert!(matches!(children[0], Node::Comment { .. }));
    }

    #[test]
    fn line_continuation_joins_lines() {
        let ast = parse("barrier b1 \\\ncond 2\n").unwrap();
        match &commands(&ast)[0] {
            Node::Command { args, .. } => assert_eq!(args, &["b1", "cond", "2"]),
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn single_line_nested_block_with_no_space_before_close_brace_terminates() {
        let ast = parse("stream 1 {txreq -url /}\n").unwrap();
        match &commands(&ast)[0] {
            Node::Command { name, args, body, .. } => {
                assert_eq!(name, "stream");
                assert_eq!(args, &["1"]);
                assert_eq!(body.len(), 1);
                match &body[0] {
                    Node::Command { name, args, .. } => {
                        assert_eq!(name, "txreq");
                        assert_eq!(args, &["-url", "/"]);
                    }
                    other => panic!("unexpected node {:?}", other),
                }
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn macro_reference_inside_a_bare_argument_is_not_split_by_its_brace() {
        let ast = parse("client c1 -connect ${s1_addr}:${s1_port} {\n    txreq\n}\n").unwrap();
        match &commands(&ast)[0] {
            Node::Command { args, body, .. } => {
                assert_eq!(args, &["c1", "-connect", "${s1_addr}:${s1_port}"]);
                assert_eq!(body.len(), 1);
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn unterminated_string_reports_error() {
        let err = parse("txreq -hdr \"unterminated\n").unwrap_err();
        assert!(format!("{}", err).contains("parse"));
    }

    #[test]
    fn missing_vtest_description_reports_error() {
        let err = parse("vtest\n").unwrap_err();
        assert!(format!("{}", err).contains("parse"));
    }

    #[test]
    fn nested_stream_block_parses() {
        let ast = parse("stream 1 {\n    txreq -method GET\n    rxresp\n} -run\n").unwrap();
        match &commands(&ast)[0] {
            Node::Command { name, body, .. } => {
                assert_eq!(name, "stream");
                assert_eq!(body.len(), 2);
            }
            other => panic!("unexpected node {:?}", other),
        }
    }
}

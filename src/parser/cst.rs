//! Concrete syntax tree.
//!
//! The tree only distinguishes simple statements from compound blocks; each
//! node keeps its original lines, so unchanged parts of a module are
//! re-emitted verbatim.

use super::lexer::{logical_lines, LogicalLine, TokenKind};
use super::ParseResult;
use std::fmt::Write;
use std::iter::Peekable;
use std::vec::IntoIter;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    Stmt(LogicalLine),
    Block(Block),
}

impl Node {
    pub fn first_line(&self) -> &LogicalLine {
        match self {
            Node::Stmt(line) => line,
            Node::Block(block) => block.decorators.first().unwrap_or(&block.header),
        }
    }

    pub fn write_to(&self, out: &mut String) {
        match self {
            Node::Stmt(line) => {
                out.push_str(&line.leading);
                out.push_str(&line.text);
            }
            Node::Block(block) => block.write_to(out),
        }
    }
}

/// A compound statement: decorators, header line and indented body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub decorators: Vec<LogicalLine>,
    pub header: LogicalLine,
    pub body: Vec<Node>,
}

impl Block {
    pub fn keyword(&self) -> Option<&str> {
        let first = self.header.tok(0)?;
        if first == "async" {
            self.header.tok(1)
        } else {
            Some(first)
        }
    }

    pub fn class_header(&self) -> Option<ClassHeader> {
        ClassHeader::parse(&self.header)
    }

    pub fn def_header(&self) -> Option<DefHeader> {
        DefHeader::parse(&self.header)
    }

    /// Indentation of the body, or one level below the header if empty.
    pub fn body_indent(&self) -> String {
        self.body
            .first()
            .map(|n| n.first_line().indent_str().to_string())
            .unwrap_or_else(|| format!("{}    ", self.header.indent_str()))
    }

    pub fn write_to(&self, out: &mut String) {
        for line in &self.decorators {
            out.push_str(&line.leading);
            out.push_str(&line.text);
        }
        out.push_str(&self.header.leading);
        out.push_str(&self.header.text);
        for node in &self.body {
            node.write_to(out);
        }
    }
}

/// `class Name(bases):`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassHeader {
    pub name: String,
    /// Source between the parentheses, empty when absent.
    pub bases: String,
}

impl ClassHeader {
    pub fn parse(line: &LogicalLine) -> Option<Self> {
        if line.tok(0)? != "class" || line.tokens.get(1)?.kind != TokenKind::Name {
            return None;
        }
        let name = line.tok(1)?.to_string();
        let bases = if line.is_op(2, "(") {
            let close = matching_close(line, 2)?;
            if close > 3 {
                line.span(3, close - 1).to_string()
            } else {
                String::new()
            }
        } else {
            String::new()
        };
        Some(ClassHeader { name, bases })
    }
}

/// One formal parameter of a function header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Param {
    /// Name without stars; `None` for bare `*` and `/` markers.
    pub name: Option<String>,
    /// `*` or `**` for variadic parameters.
    pub stars: &'static str,
    pub annotation: Option<String>,
    pub default: Option<String>,
}

impl Param {
    /// Renders the parameter with a replacement annotation.
    pub fn render(&self, annotation: Option<&str>) -> String {
        let mut out = String::from(self.stars);
        match &self.name {
            Some(name) => out.push_str(name),
            None if self.stars.is_empty() => out.push('/'),
            None => {}
        }
        if let Some(ann) = annotation.or(self.annotation.as_deref()) {
            let _ = write!(out, ": {}", ann);
        }
        if let Some(default) = &self.default {
            if annotation.is_some() || self.annotation.is_some() {
                let _ = write!(out, " = {}", default);
            } else {
                let _ = write!(out, "={}", default);
            }
        }
        out
    }
}

/// `def name(params) -> returns:`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DefHeader {
    pub is_async: bool,
    pub name: String,
    pub params: Vec<Param>,
    pub returns: Option<String>,
}

impl DefHeader {
    pub fn parse(line: &LogicalLine) -> Option<Self> {
        let is_async = line.tok(0)? == "async";
        let def_at = usize::from(is_async);
        if line.tok(def_at)? != "def" {
            return None;
        }
        let name = line.tok(def_at + 1)?.to_string();
        let open = def_at + 2;
        if !line.is_op(open, "(") {
            return None;
        }
        let close = matching_close(line, open)?;

        let mut params = Vec::new();
        let mut start = open + 1;
        let mut depth = 0i32;
        for idx in open + 1..=close {
            let text = line.tok(idx)?;
            let kind = line.tokens[idx].kind;
            if kind == TokenKind::Op && matches!(text, "(" | "[" | "{") {
                depth += 1;
            } else if kind == TokenKind::Op && matches!(text, ")" | "]" | "}") && idx != close {
                depth -= 1;
            } else if (idx == close || (text == "," && kind == TokenKind::Op)) && depth == 0 {
                if idx > start {
                    params.push(parse_param(line, start, idx - 1));
                }
                start = idx + 1;
            }
        }

        let returns = if line.is_op(close + 1, "->") && line.tokens.len() >= close + 4 {
            Some(line.span(close + 2, line.tokens.len() - 2).to_string())
        } else {
            None
        };
        Some(DefHeader {
            is_async,
            name,
            params,
            returns,
        })
    }

    /// Parameter names, stars stripped, markers skipped.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().filter_map(|p| p.name.as_deref())
    }
}

fn parse_param(line: &LogicalLine, first: usize, last: usize) -> Param {
    let mut idx = first;
    let stars = match line.tok(idx) {
        Some("*") => {
            idx += 1;
            "*"
        }
        Some("**") => {
            idx += 1;
            "**"
        }
        _ => "",
    };
    let name = match line.tokens.get(idx) {
        Some(t) if idx <= last && t.kind == TokenKind::Name => {
            Some(line.token_text(t).to_string())
        }
        _ => None,
    };

    let mut colon = None;
    let mut equals = None;
    let mut depth = 0i32;
    for i in idx..=last {
        match line.tok(i) {
            Some("(" | "[" | "{") => depth += 1,
            Some(")" | "]" | "}") => depth -= 1,
            Some(":") if depth == 0 && colon.is_none() && equals.is_none() => colon = Some(i),
            Some("=") if depth == 0 && equals.is_none() => equals = Some(i),
            _ => {}
        }
    }
    let annotation = colon.map(|c| line.span(c + 1, equals.map_or(last, |e| e - 1)).to_string());
    let default = equals.map(|e| line.span(e + 1, last).to_string());
    Param {
        name,
        stars,
        annotation,
        default,
    }
}

/// Index of the bracket closing the one at `open`.
fn matching_close(line: &LogicalLine, open: usize) -> Option<usize> {
    let mut depth = 0;
    for idx in open..line.tokens.len() {
        if line.tokens[idx].kind != TokenKind::Op {
            continue;
        }
        match line.tok(idx)? {
            "(" | "[" | "{" => depth += 1,
            ")" | "]" | "}" => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}

/// Left-hand side of a simple assignment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    Name(String),
    Attr { object: String, attr: String },
    Other(String),
}

/// `target = ... = value`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Assign {
    pub targets: Vec<Target>,
    pub value: String,
}

impl Assign {
    /// Recognizes plain (possibly chained) assignments at bracket depth 0.
    pub fn parse(line: &LogicalLine) -> Option<Self> {
        let mut depth = 0i32;
        let mut cuts = Vec::new();
        for (idx, token) in line.tokens.iter().enumerate() {
            if token.kind != TokenKind::Op {
                continue;
            }
            match line.token_text(token) {
                "(" | "[" | "{" => depth += 1,
                ")" | "]" | "}" => depth -= 1,
                "=" if depth == 0 => cuts.push(idx),
                ":" if depth == 0 => return None,
                _ => {}
            }
        }
        let (&last_cut, _) = cuts.split_last()?;
        if last_cut + 1 >= line.tokens.len() {
            return None;
        }

        let mut targets = Vec::with_capacity(cuts.len());
        let mut start = 0;
        for &cut in &cuts {
            if cut == start {
                return None;
            }
            targets.push(parse_target(line, start, cut - 1));
            start = cut + 1;
        }
        Some(Assign {
            targets,
            value: line.span(last_cut + 1, line.tokens.len() - 1).to_string(),
        })
    }
}

fn parse_target(line: &LogicalLine, first: usize, last: usize) -> Target {
    let kinds: Vec<TokenKind> = line.tokens[first..=last].iter().map(|t| t.kind).collect();
    match kinds.as_slice() {
        [TokenKind::Name] => Target::Name(line.span(first, last).to_string()),
        [TokenKind::Name, TokenKind::Op, TokenKind::Name] if line.is_op(first + 1, ".") => {
            Target::Attr {
                object: line.span(first, first).to_string(),
                attr: line.span(last, last).to_string(),
            }
        }
        _ => Target::Other(line.span(first, last).to_string()),
    }
}

/// A parsed module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceModule {
    pub body: Vec<Node>,
    /// Trivia after the last logical line.
    pub trailing: String,
}

impl SourceModule {
    pub fn parse(source: &str) -> ParseResult<Self> {
        let (lines, trailing) = logical_lines(source)?;
        let mut lines = lines.into_iter().peekable();
        let mut body = Vec::new();
        while lines.peek().is_some() {
            let indent = lines.peek().map_or(0, |l| l.indent);
            body.extend(parse_suite(&mut lines, indent));
        }
        Ok(SourceModule { body, trailing })
    }

    /// Reproduces the source.
    pub fn to_source(&self) -> String {
        let mut out = String::new();
        for node in &self.body {
            node.write_to(&mut out);
        }
        out.push_str(&self.trailing);
        out
    }

    /// Top-level blocks.
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.body.iter().filter_map(|n| match n {
            Node::Block(b) => Some(b),
            Node::Stmt(_) => None,
        })
    }
}

type Lines = Peekable<IntoIter<LogicalLine>>;

/// Parses consecutive lines indented at least `indent`.
fn parse_suite(lines: &mut Lines, indent: usize) -> Vec<Node> {
    let mut nodes = Vec::new();
    while let Some(line) = lines.next_if(|l| l.indent >= indent) {
        let mut decorators = Vec::new();
        let mut header = line;
        while header.is_decorator() {
            match lines.next_if(|l| l.indent == header.indent) {
                Some(next) => decorators.push(std::mem::replace(&mut header, next)),
                None => break,
            }
        }

        if !header.opens_block() {
            nodes.extend(decorators.into_iter().map(Node::Stmt));
            nodes.push(Node::Stmt(header));
            continue;
        }
        let body = match lines.peek() {
            Some(next) if next.indent > header.indent => {
                let body_indent = next.indent;
                parse_suite(lines, body_indent)
            }
            _ => Vec::new(),
        };
        nodes.push(Node::Block(Block {
            decorators,
            header,
            body,
        }));
    }
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: &str = "\
from . import _mx_sys

class _c_Space1(_mx_sys.BaseSpace):

    def __init__(self, parent):
        self._v_foo = {}
        self.Child = _c_Child(self)

    # cells
    @property
    def foo(self, t: int, *args, scale=2.0, **kw) -> float:
        if t in self._v_foo:
            return self._v_foo[t]
        return 1

x = 1
";

    #[test]
    fn test_round_trip() {
        let module = SourceModule::parse(SRC).unwrap();
        assert_eq!(module.to_source(), SRC);
    }

    #[test]
    fn test_tree_shape() {
        let module = SourceModule::parse(SRC).unwrap();
        assert_eq!(module.body.len(), 3);
        let class = module.blocks().next().unwrap();
        assert_eq!(
            class.class_header(),
            Some(ClassHeader {
                name: "_c_Space1".into(),
                bases: "_mx_sys.BaseSpace".into()
            })
        );
        assert_eq!(class.body.len(), 2);
        assert_eq!(class.body_indent(), "    ");
        let Node::Block(foo) = &class.body[1] else {
            panic!("expected block");
        };
        assert_eq!(foo.decorators.len(), 1);
        assert_eq!(foo.decorators[0].leading, "\n    # cells\n");
        assert_eq!(foo.body.len(), 2);
    }

    #[test]
    fn test_def_header() {
        let module = SourceModule::parse(SRC).unwrap();
        let class = module.blocks().next().unwrap();
        let Node::Block(foo) = &class.body[1] else {
            panic!("expected block");
        };
        let def = foo.def_header().unwrap();
        assert_eq!(def.name, "foo");
        assert_eq!(def.returns.as_deref(), Some("float"));
        let names: Vec<_> = def.param_names().collect();
        assert_eq!(names, vec!["self", "t", "args", "scale", "kw"]);
        assert_eq!(def.params[1].annotation.as_deref(), Some("int"));
        assert_eq!(def.params[3].default.as_deref(), Some("2.0"));
        assert_eq!(def.params[2].stars, "*");
        assert_eq!(def.params[1].render(Some("_mx_cy.longlong")), "t: _mx_cy.longlong");
        assert_eq!(def.params[3].render(None), "scale=2.0");
        assert_eq!(def.params[3].render(Some("_mx_cy.double")), "scale: _mx_cy.double = 2.0");
    }

    #[test]
    fn test_assign() {
        let (lines, _) = logical_lines(
            "self._v_foo = {}\na = b = f(x=1)\nx: int = 1\nreturn a == b\nd[k] = 1\n",
        )
        .unwrap();
        let a = Assign::parse(&lines[0]).unwrap();
        assert_eq!(
            a.targets,
            vec![Target::Attr {
                object: "self".into(),
                attr: "_v_foo".into()
            }]
        );
        assert_eq!(a.value, "{}");
        let b = Assign::parse(&lines[1]).unwrap();
        assert_eq!(b.targets.len(), 2);
        assert_eq!(b.value, "f(x=1)");
        assert_eq!(Assign::parse(&lines[2]), None);
        assert_eq!(Assign::parse(&lines[3]), None);
        assert_eq!(
            Assign::parse(&lines[4]).unwrap().targets,
            vec![Target::Other("d[k]".into())]
        );
    }
}

//! A deliberately small structural model of an HTML document. Pages are never
//! parsed into a tree; instead a [`Scanner`] walks the markup tag by tag and
//! [`Document`] uses it to locate elements by [`Selector`] and to splice text
//! into or around them. Everything outside the spliced range is passed through
//! byte for byte, which is what lets the renderer and the synchronizer rewrite
//! hand-edited pages without disturbing them.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

/// Elements which never have a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta",
    "param", "source", "track", "wbr",
];

/// Elements whose contents are raw text and must not be scanned for tags.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

/// Identifies an element by tag name, `id` attribute, and/or one `class`
/// token. Parsed from a CSS-like shorthand: `main#main-content`,
/// `nav.breadcrumb`, `.affiliate-section`, `title`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selector {
    pub tag: Option<String>,
    pub id: Option<String>,
    pub class: Option<String>,
}

impl Selector {
    /// A selector matching any element carrying `class`.
    pub fn class(class: &str) -> Selector {
        Selector {
            tag: None,
            id: None,
            class: Some(class.to_owned()),
        }
    }

    fn matches(&self, tag: &Tag) -> bool {
        if let Some(name) = &self.tag {
            if !name.eq_ignore_ascii_case(&tag.name) {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if tag.attr("id") != Some(id.as_str()) {
                return false;
            }
        }
        if let Some(class) = &self.class {
            if !tag.has_class(class) {
                return false;
            }
        }
        true
    }
}

impl FromStr for Selector {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        let split = s.find(|c| c == '#' || c == '.').unwrap_or_else(|| s.len());
        let (tag, rest) = s.split_at(split);
        let mut selector = Selector {
            tag: match tag.is_empty() {
                true => None,
                false => Some(tag.to_ascii_lowercase()),
            },
            id: None,
            class: None,
        };
        if let Some(id) = rest.strip_prefix('#') {
            selector.id = Some(id.to_owned());
        } else if let Some(class) = rest.strip_prefix('.') {
            selector.class = Some(class.to_owned());
        }

        let valid = |part: &Option<String>| match part {
            Some(p) => !p.is_empty() && !p.contains(|c: char| c.is_whitespace() || c == '#' || c == '.'),
            None => true,
        };
        if (selector.tag.is_none() && selector.id.is_none() && selector.class.is_none())
            || !valid(&selector.tag)
            || !valid(&selector.id)
            || !valid(&selector.class)
        {
            return Err(Error::InvalidSelector(s.to_owned()));
        }
        Ok(selector)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(tag) = &self.tag {
            write!(f, "{}", tag)?;
        }
        if let Some(id) = &self.id {
            write!(f, "#{}", id)?;
        }
        if let Some(class) = &self.class {
            write!(f, ".{}", class)?;
        }
        Ok(())
    }
}

impl<'de> serde::Deserialize<'de> for Selector {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Selector, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error as _;
        String::deserialize(deserializer)?
            .parse::<Selector>()
            .map_err(|e| D::Error::custom(format!("{}", e)))
    }
}

/// An attribute of a scanned tag. `value_span` is the byte range of the
/// value inside the source, excluding any quotes.
#[derive(Clone, Debug)]
pub struct Attr<'a> {
    pub name: String,
    pub value: Option<&'a str>,
    pub value_span: Option<Range<usize>>,
}

/// An opening tag produced by the [`Scanner`].
#[derive(Clone, Debug)]
pub struct Tag<'a> {
    /// Lower-cased tag name.
    pub name: String,
    /// Byte range of the whole tag, `<` through `>`.
    pub span: Range<usize>,
    pub attrs: Vec<Attr<'a>>,
    pub self_closing: bool,
}

impl<'a> Tag<'a> {
    pub fn attr(&self, name: &str) -> Option<&'a str> {
        self.attrs
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .and_then(|a| a.value)
    }

    pub fn has_class(&self, class: &str) -> bool {
        match self.attr("class") {
            Some(classes) => classes.split_whitespace().any(|c| c == class),
            None => false,
        }
    }

    fn is_void(&self) -> bool {
        self.self_closing || VOID_ELEMENTS.contains(&self.name.as_str())
    }
}

/// A single step of the scan. Text, comments, and doctypes are skipped.
#[derive(Clone, Debug)]
pub enum Token<'a> {
    Open(Tag<'a>),
    Close { name: String, span: Range<usize> },
}

/// Walks an HTML source and yields its opening and closing tags in order.
pub struct Scanner<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(src: &'a str) -> Scanner<'a> {
        Scanner { src, pos: 0 }
    }

    fn bytes(&self) -> &'a [u8] {
        self.src.as_bytes()
    }

    fn skip_past(&mut self, needle: &str) {
        self.pos = match self.src[self.pos..].find(needle) {
            Some(i) => self.pos + i + needle.len(),
            None => self.src.len(),
        };
    }

    fn skip_whitespace(&mut self) {
        let bytes = self.bytes();
        while self.pos < bytes.len() && bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn read_name(&mut self) -> &'a str {
        let bytes = self.bytes();
        let start = self.pos;
        while self.pos < bytes.len() {
            match bytes[self.pos] {
                b'>' | b'/' | b'=' => break,
                b if b.is_ascii_whitespace() => break,
                _ => self.pos += 1,
            }
        }
        &self.src[start..self.pos]
    }

    fn read_attr(&mut self) -> Attr<'a> {
        let name = self.read_name().to_ascii_lowercase();
        self.skip_whitespace();
        let bytes = self.bytes();
        if self.pos >= bytes.len() || bytes[self.pos] != b'=' {
            return Attr {
                name,
                value: None,
                value_span: None,
            };
        }
        self.pos += 1;
        self.skip_whitespace();

        let span = match bytes.get(self.pos) {
            Some(&quote) if quote == b'"' || quote == b'\'' => {
                let start = self.pos + 1;
                let end = match bytes[start..].iter().position(|&b| b == quote) {
                    Some(i) => start + i,
                    None => bytes.len(),
                };
                self.pos = (end + 1).min(bytes.len());
                start..end
            }
            _ => {
                let start = self.pos;
                while self.pos < bytes.len()
                    && bytes[self.pos] != b'>'
                    && !bytes[self.pos].is_ascii_whitespace()
                {
                    self.pos += 1;
                }
                start..self.pos
            }
        };
        Attr {
            name,
            value: Some(&self.src[span.clone()]),
            value_span: Some(span),
        }
    }

    fn read_open(&mut self, start: usize) -> Tag<'a> {
        self.pos = start + 1;
        let name = self.read_name().to_ascii_lowercase();
        let mut attrs = Vec::new();
        let mut self_closing = false;
        loop {
            self.skip_whitespace();
            let bytes = self.bytes();
            match bytes.get(self.pos).copied() {
                None => break,
                Some(b'>') => {
                    self.pos += 1;
                    break;
                }
                Some(b'/') => {
                    self.pos += 1;
                    if bytes.get(self.pos) == Some(&b'>') {
                        self_closing = true;
                    }
                }
                Some(_) => {
                    let before = self.pos;
                    attrs.push(self.read_attr());
                    // a lone `=` or similar junk; step over it
                    if self.pos == before {
                        self.pos += 1;
                    }
                }
            }
        }
        Tag {
            name,
            span: start..self.pos,
            attrs,
            self_closing,
        }
    }

    fn skip_raw_text(&mut self, name: &str) {
        let closing = format!("</{}", name);
        let rest = &self.src[self.pos..];
        // tag names are ASCII, so lower-casing keeps byte offsets intact
        self.pos = match rest.to_ascii_lowercase().find(&closing) {
            Some(i) => self.pos + i,
            None => self.src.len(),
        };
    }
}

impl<'a> Iterator for Scanner<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        loop {
            let start = self.pos + self.src[self.pos..].find('<')?;
            let rest = &self.src[start..];
            let next = rest.as_bytes().get(1).copied();
            if rest.starts_with("<!--") {
                self.pos = start + 4;
                self.skip_past("-->");
            } else if next == Some(b'!') || next == Some(b'?') {
                self.pos = start + 1;
                self.skip_past(">");
            } else if next == Some(b'/') {
                self.pos = start + 2;
                let name = self.read_name().to_ascii_lowercase();
                self.skip_past(">");
                return Some(Token::Close {
                    name,
                    span: start..self.pos,
                });
            } else if next.map_or(false, |b| b.is_ascii_alphabetic()) {
                let tag = self.read_open(start);
                if RAW_TEXT_ELEMENTS.contains(&tag.name.as_str()) && !tag.self_closing {
                    self.skip_raw_text(&tag.name);
                }
                return Some(Token::Open(tag));
            } else {
                self.pos = start + 1;
            }
        }
    }
}

/// A located element. `inner` is `None` for void or unclosed elements.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Element {
    pub open: Range<usize>,
    pub inner: Option<Range<usize>>,
}

/// An HTML document held as text, addressed through [`Selector`]s.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Document {
    source: String,
}

impl Document {
    pub fn new<S: Into<String>>(source: S) -> Document {
        Document {
            source: source.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn into_string(self) -> String {
        self.source
    }

    pub fn scan(&self) -> Scanner {
        Scanner::new(&self.source)
    }

    /// Finds the first element matching `selector` along with the range of
    /// its content, found by counting nested elements of the same name.
    pub fn find(&self, selector: &Selector) -> Option<Element> {
        let mut tokens = self.scan();
        let tag = tokens.find_map(|token| match token {
            Token::Open(tag) if selector.matches(&tag) => Some(tag),
            _ => None,
        })?;
        if tag.is_void() {
            return Some(Element {
                open: tag.span,
                inner: None,
            });
        }

        let mut depth = 1usize;
        for token in tokens {
            match token {
                Token::Open(t) if t.name == tag.name && !t.is_void() => depth += 1,
                Token::Close { name, span } if name == tag.name => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(Element {
                            inner: Some(tag.span.end..span.start),
                            open: tag.span,
                        });
                    }
                }
                _ => {}
            }
        }
        Some(Element {
            open: tag.span,
            inner: None,
        })
    }

    pub fn contains(&self, selector: &Selector) -> bool {
        self.find(selector).is_some()
    }

    /// Returns the content of the region named by `selector`.
    pub fn region(&self, selector: &Selector) -> Result<&str> {
        let inner = self.inner_range(selector)?;
        Ok(&self.source[inner])
    }

    fn inner_range(&self, selector: &Selector) -> Result<Range<usize>> {
        match self.find(selector) {
            None => Err(Error::RegionNotFound(selector.clone())),
            Some(Element { inner: None, .. }) => Err(Error::Unclosed(selector.clone())),
            Some(Element {
                inner: Some(inner), ..
            }) => Ok(inner),
        }
    }

    /// Replaces everything between the opening and closing tag of the region
    /// named by `selector`. Applying the same replacement twice is the same
    /// as applying it once.
    pub fn replace_region(&mut self, selector: &Selector, content: &str) -> Result<()> {
        let inner = self.inner_range(selector)?;
        self.source.replace_range(inner, content);
        Ok(())
    }

    /// Inserts `content` immediately before the opening tag of the first
    /// element matching `selector`.
    pub fn insert_before(&mut self, selector: &Selector, content: &str) -> Result<()> {
        match self.find(selector) {
            None => Err(Error::RegionNotFound(selector.clone())),
            Some(element) => {
                self.source.insert_str(element.open.start, content);
                Ok(())
            }
        }
    }

    /// Checks that every non-void element is closed, in order.
    pub fn check_balanced(&self) -> Result<()> {
        let mut stack: Vec<(String, usize)> = Vec::new();
        for token in self.scan() {
            match token {
                Token::Open(tag) if !tag.is_void() => stack.push((tag.name, tag.span.start)),
                Token::Open(_) => {}
                Token::Close { name, span } => match stack.pop() {
                    Some((open, _)) if open == name => {}
                    _ => {
                        return Err(Error::Unbalanced {
                            tag: name,
                            offset: span.start,
                        })
                    }
                },
            }
        }
        match stack.pop() {
            None => Ok(()),
            Some((tag, offset)) => Err(Error::Unbalanced { tag, offset }),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Errors from locating or editing regions of a [`Document`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Returned when no element matches the selector.
    RegionNotFound(Selector),

    /// Returned when the matching element has no closing tag.
    Unclosed(Selector),

    /// Returned by [`Document::check_balanced`] for a mismatched tag.
    Unbalanced { tag: String, offset: usize },

    /// Returned when a selector string cannot be parsed.
    InvalidSelector(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::RegionNotFound(selector) => {
                write!(f, "insertion point not found: `{}`", selector)
            }
            Error::Unclosed(selector) => {
                write!(f, "element `{}` has no closing tag", selector)
            }
            Error::Unbalanced { tag, offset } => {
                write!(f, "unbalanced `<{}>` at byte {}", tag, offset)
            }
            Error::InvalidSelector(s) => write!(f, "invalid selector `{}`", s),
        }
    }
}

impl std::error::Error for Error {}

//! Patches already generated pages in place: keeps the affiliate block
//! present on every mountain page and stamps a cache-busting version onto
//! stylesheet links. Both patches are idempotent, so the pass can be re-run
//! over the whole tree at any time.

use crate::document::{self, Document, Scanner, Selector, Token};
use std::fmt;
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Inserts `block` immediately before the first element matching `anchor`,
/// unless an element carrying the `marker` class is already present. Returns
/// the resulting document and whether anything was inserted.
pub fn ensure_present(
    doc: &str,
    marker: &str,
    block: &str,
    anchor: &Selector,
) -> Result<(String, bool)> {
    let marker = Selector::class(marker);
    if !Document::new(block).contains(&marker) {
        return Err(Error::BlockWithoutMarker(marker));
    }
    let mut doc = Document::new(doc);
    if doc.contains(&marker) {
        return Ok((doc.into_string(), false));
    }
    doc.insert_before(anchor, block)?;
    Ok((doc.into_string(), true))
}

/// Points every `<link rel="stylesheet">` whose path is `href` at
/// `href?v={token}`. Returns the resulting document and the number of links
/// rewritten; links already carrying `token` are left alone.
pub fn set_stylesheet_version(doc: &str, href: &str, token: &str) -> (String, usize) {
    let versioned = format!("{}?v={}", href, token);
    let mut edits: Vec<Range<usize>> = Vec::new();
    for item in Scanner::new(doc) {
        let tag = match item {
            Token::Open(tag) if tag.name == "link" => tag,
            _ => continue,
        };
        let is_stylesheet = tag
            .attr("rel")
            .map(|rel| {
                rel.split_whitespace()
                    .any(|r| r.eq_ignore_ascii_case("stylesheet"))
            })
            .unwrap_or(false);
        if !is_stylesheet {
            continue;
        }
        let attr = match tag.attrs.iter().find(|a| a.name == "href") {
            Some(attr) => attr,
            None => continue,
        };
        if let (Some(value), Some(span)) = (attr.value, &attr.value_span) {
            let path = value.split('?').next().unwrap_or(value);
            if path == href && value != versioned {
                edits.push(span.clone());
            }
        }
    }

    let mut out = doc.to_owned();
    for span in edits.iter().rev() {
        out.replace_range(span.clone(), &versioned);
    }
    (out, edits.len())
}

/// What patching one file changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Patched {
    pub inserted: bool,
    pub stylesheets: usize,
}

impl Patched {
    pub fn changed(&self) -> bool {
        self.inserted || self.stylesheets > 0
    }
}

impl fmt::Display for Patched {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if !self.changed() {
            return f.write_str("unchanged");
        }
        let mut parts = Vec::new();
        if self.inserted {
            parts.push("affiliate block inserted".to_owned());
        }
        if self.stylesheets > 0 {
            parts.push(format!("{} stylesheet link(s) versioned", self.stylesheets));
        }
        f.write_str(&parts.join(", "))
    }
}

#[derive(Debug)]
pub struct Outcome {
    pub path: PathBuf,
    pub result: Result<Patched>,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.result {
            Ok(patched) => write!(f, "{:<9} {}: {}", "ok", self.path.display(), patched),
            Err(err) => write!(f, "{:<9} {}: {}", "failed", self.path.display(), err),
        }
    }
}

/// Counts over a batch of [`Outcome`]s.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    pub changed: usize,
    pub unchanged: usize,
    pub failed: usize,
}

impl Tally {
    pub fn of(outcomes: &[Outcome]) -> Tally {
        let mut tally = Tally::default();
        for outcome in outcomes {
            match &outcome.result {
                Ok(patched) if patched.changed() => tally.changed += 1,
                Ok(_) => tally.unchanged += 1,
                Err(_) => tally.failed += 1,
            }
        }
        tally
    }

    pub fn succeeded(&self) -> bool {
        self.failed == 0
    }
}

impl fmt::Display for Tally {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} files: {} changed, {} unchanged, {} failed",
            self.changed + self.unchanged + self.failed,
            self.changed,
            self.unchanged,
            self.failed
        )
    }
}

/// Whether one mountain page carries the marker.
#[derive(Debug)]
pub struct Checked {
    pub path: PathBuf,
    pub result: Result<bool>,
}

impl Checked {
    /// True unless the page was read and carries the marker.
    pub fn is_missing(&self) -> bool {
        !matches!(self.result, Ok(true))
    }
}

impl fmt::Display for Checked {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.result {
            Ok(true) => write!(f, "{:<9} {}", "ok", self.path.display()),
            Ok(false) => write!(f, "{:<9} {}", "missing", self.path.display()),
            Err(err) => write!(f, "{:<9} {}: {}", "failed", self.path.display(), err),
        }
    }
}

/// Runs both patches over a generated tree. The affiliate block goes into
/// mountain pages (`mountains/{id}/index.html`); stylesheet versions go into
/// every `.html` file.
pub struct Patcher<'a> {
    pub output_directory: &'a Path,
    pub marker: &'a str,
    pub block: &'a str,
    pub anchor: &'a Selector,
    pub stylesheet: &'a str,
    pub token: &'a str,
}

impl Patcher<'_> {
    pub fn patch_tree(&self) -> Vec<Outcome> {
        let mut outcomes = Vec::new();
        for entry in html_files(self.output_directory) {
            let outcome = match entry {
                Ok(path) => Outcome {
                    result: self.patch_file(&path),
                    path,
                },
                Err(err) => Outcome {
                    path: err
                        .path()
                        .map(Path::to_owned)
                        .unwrap_or_else(|| self.output_directory.to_owned()),
                    result: Err(Error::WalkDir(err)),
                },
            };
            outcomes.push(outcome);
        }
        info!(
            files = outcomes.len(),
            token = self.token,
            "patched output tree"
        );
        outcomes
    }

    fn patch_file(&self, path: &Path) -> Result<Patched> {
        let original = std::fs::read_to_string(path).map_err(|e| Error::Io {
            path: path.to_owned(),
            err: e,
        })?;

        let (doc, inserted) = if self.is_mountain_page(path) {
            ensure_present(&original, self.marker, self.block, self.anchor)
                .map_err(|e| Error::Annotated(format!("patching `{}`", path.display()), Box::new(e)))?
        } else {
            (original, false)
        };
        let (doc, stylesheets) = set_stylesheet_version(&doc, self.stylesheet, self.token);

        let patched = Patched {
            inserted,
            stylesheets,
        };
        if patched.changed() {
            std::fs::write(path, doc).map_err(|e| Error::Io {
                path: path.to_owned(),
                err: e,
            })?;
            debug!(path = %path.display(), %patched, "file patched");
        }
        Ok(patched)
    }

    /// Reports, for each mountain page, whether it carries the marker.
    /// Nothing is written.
    pub fn check(&self) -> Vec<Checked> {
        let marker = Selector::class(self.marker);
        html_files(self.output_directory)
            .filter_map(|entry| match entry {
                Ok(path) if self.is_mountain_page(&path) => {
                    let result = std::fs::read_to_string(&path)
                        .map(|source| Document::new(source).contains(&marker))
                        .map_err(|e| Error::Io {
                            path: path.clone(),
                            err: e,
                        });
                    Some(Checked { path, result })
                }
                Ok(_) => None,
                Err(err) => Some(Checked {
                    path: err
                        .path()
                        .map(Path::to_owned)
                        .unwrap_or_else(|| self.output_directory.to_owned()),
                    result: Err(Error::WalkDir(err)),
                }),
            })
            .collect()
    }

    fn is_mountain_page(&self, path: &Path) -> bool {
        let relative = match path.strip_prefix(self.output_directory) {
            Ok(relative) => relative,
            Err(_) => return false,
        };
        let parts: Vec<_> = relative.iter().collect();
        matches!(parts.as_slice(), [dir, _, file] if *dir == "mountains" && *file == "index.html")
    }
}

fn html_files(root: &Path) -> impl Iterator<Item = std::result::Result<PathBuf, walkdir::Error>> {
    WalkDir::new(root)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()))
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => {
                let is_html = entry.file_type().is_file()
                    && entry.path().extension().map_or(false, |ext| ext == "html");
                if is_html {
                    Some(Ok(entry.into_path()))
                } else {
                    None
                }
            }
            Err(err) => Some(Err(err)),
        })
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// Returned when the block to insert does not itself carry the marker;
    /// inserting it would never be seen as done.
    BlockWithoutMarker(Selector),

    /// Returned when the anchor element is missing from a page.
    NotFound(document::Error),

    /// Returned for I/O errors reading or writing a page.
    Io { path: PathBuf, err: io::Error },

    /// Returned for errors walking the output tree.
    WalkDir(walkdir::Error),

    /// An error with an annotation.
    Annotated(String, Box<Error>),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::BlockWithoutMarker(marker) => {
                write!(f, "block to insert does not contain `{}`", marker)
            }
            Error::NotFound(err) => err.fmt(f),
            Error::Io { path, err } => write!(f, "{}: {}", path.display(), err),
            Error::WalkDir(err) => err.fmt(f),
            Error::Annotated(annotation, err) => write!(f, "{}: {}", annotation, err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::BlockWithoutMarker(_) => None,
            Error::NotFound(err) => Some(err),
            Error::Io { err, .. } => Some(err),
            Error::WalkDir(err) => Some(err),
            Error::Annotated(_, err) => Some(err),
        }
    }
}

impl From<document::Error> for Error {
    fn from(err: document::Error) -> Error {
        Error::NotFound(err)
    }
}

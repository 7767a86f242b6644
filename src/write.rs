use crate::document::{self, Document, Selector};
use crate::mountain::Mountain;
use crate::render::{self, group_by_prefecture, group_of, Group, Page, Renderer};
use chrono::NaiveDate;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Places rendered [`Page`]s into HTML files under the output directory. A
/// page that already exists is its own shell: only its regions are replaced
/// and every other byte of it is kept. Pages that do not exist yet start from
/// the theme's shell.
pub struct Writer<'a> {
    pub renderer: &'a Renderer<'a>,

    /// The root of the generated tree. Mountain pages go to
    /// `{output_directory}/mountains/{id}/index.html`, prefecture pages to
    /// `{output_directory}/regions/{slug}/index.html`.
    pub output_directory: &'a Path,

    shell: String,
    title: Selector,
    breadcrumb: Selector,
    main: Selector,
}

/// What writing a page did to the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Written {
    Created,
    Updated,
    Unchanged,
}

impl fmt::Display for Written {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.pad(match self {
            Written::Created => "created",
            Written::Updated => "updated",
            Written::Unchanged => "unchanged",
        })
    }
}

/// The result of writing one page, labeled by the page's path relative to
/// the output directory (or the record id when no path could be built).
#[derive(Debug)]
pub struct Outcome {
    pub item: String,
    pub result: Result<Written>,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.result {
            Ok(written) => write!(f, "{:<9} {}", written, self.item),
            Err(err) => write!(f, "{:<9} {}: {}", "failed", self.item, err),
        }
    }
}

/// Counts over a batch of [`Outcome`]s.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    pub written: usize,
    pub unchanged: usize,
    pub failed: usize,
}

impl Tally {
    pub fn of(outcomes: &[Outcome]) -> Tally {
        let mut tally = Tally::default();
        for outcome in outcomes {
            match &outcome.result {
                Ok(Written::Unchanged) => tally.unchanged += 1,
                Ok(_) => tally.written += 1,
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
            "{} pages: {} written, {} unchanged, {} failed",
            self.written + self.unchanged + self.failed,
            self.written,
            self.unchanged,
            self.failed
        )
    }
}

impl<'a> Writer<'a> {
    pub fn new(renderer: &'a Renderer<'a>, output_directory: &'a Path) -> Result<Writer<'a>> {
        Ok(Writer {
            renderer,
            output_directory,
            shell: renderer.render_shell()?,
            title: Selector {
                tag: Some("title".to_owned()),
                id: None,
                class: None,
            },
            breadcrumb: Selector {
                tag: Some("nav".to_owned()),
                id: None,
                class: Some("breadcrumb".to_owned()),
            },
            main: Selector {
                tag: Some("main".to_owned()),
                id: Some("main-content".to_owned()),
                class: None,
            },
        })
    }

    /// Renders and writes the page of a single record. `groups` are the
    /// prefecture groups whose pages exist; the page links to the record's
    /// group when it is among them.
    pub fn write_mountain(&self, mountain: &Mountain, groups: &[Group]) -> Result<Written> {
        let relative = mountain_page_path(&mountain.id)?;
        let page = self
            .renderer
            .mountain_page(mountain, group_of(groups, mountain))?;
        self.write_page(&relative, &page)
    }

    /// Writes every record's page, the home page, the flat listing, the
    /// sitemap, the prefecture index, and one page per prefecture. A failure
    /// on one page does not stop the others. `lastmod` is the date stamped
    /// into the sitemap.
    pub fn write_all(&self, mountains: &[Mountain], lastmod: Option<NaiveDate>) -> Vec<Outcome> {
        let grouped = group_by_prefecture(mountains, self.renderer.config.missing_prefecture);
        let groups: &[Group] = match &grouped {
            Ok(groups) => groups.as_slice(),
            Err(_) => &[],
        };

        let mut outcomes: Vec<Outcome> = mountains
            .iter()
            .map(|m| Outcome {
                item: match mountain_page_path(&m.id) {
                    Ok(path) => path.display().to_string(),
                    Err(_) => m.id.clone(),
                },
                result: self.write_mountain(m, groups),
            })
            .collect();

        outcomes.push(self.page_outcome(
            Path::new("index.html"),
            self.renderer.home_page(mountains, groups),
        ));
        outcomes.push(self.page_outcome(
            Path::new("mountains/index.html"),
            self.renderer.listing_page(mountains),
        ));

        let sitemap = Path::new("sitemap.xml");
        let pages: Vec<&Mountain> = mountains
            .iter()
            .filter(|m| mountain_page_path(&m.id).is_ok())
            .collect();
        outcomes.push(Outcome {
            item: sitemap.display().to_string(),
            result: self
                .renderer
                .render_sitemap(&pages, groups, lastmod)
                .map_err(Error::from)
                .and_then(|xml| self.write_file(sitemap, &xml)),
        });

        let regions = Path::new("regions/index.html");
        match grouped {
            Ok(groups) => {
                outcomes.push(self.page_outcome(regions, self.renderer.regions_page(&groups)));
                for group in &groups {
                    let relative = Path::new("regions").join(&group.slug).join("index.html");
                    outcomes.push(self.page_outcome(&relative, self.renderer.group_page(group)));
                }
            }
            Err(err) => outcomes.push(Outcome {
                item: regions.display().to_string(),
                result: Err(Error::Render(render::Error::Validation(err))),
            }),
        }
        outcomes
    }

    fn page_outcome(&self, relative: &Path, page: render::Result<Page>) -> Outcome {
        Outcome {
            item: relative.display().to_string(),
            result: page
                .map_err(Error::from)
                .and_then(|page| self.write_page(relative, &page)),
        }
    }

    /// Fills the regions of the page at `relative` with `page`. The `title`
    /// and breadcrumb regions are optional; `main#main-content` is required.
    pub fn write_page(&self, relative: &Path, page: &Page) -> Result<Written> {
        let path = self.output_directory.join(relative);
        let (existing, created) = match std::fs::read_to_string(&path) {
            Ok(source) => (source, false),
            Err(e) if e.kind() == io::ErrorKind::NotFound => (self.shell.clone(), true),
            Err(e) => return Err(Error::Io { path, err: e }),
        };

        let mut doc = Document::new(existing.as_str());
        let fill = |doc: &mut Document, selector: &Selector, content: &str| {
            doc.replace_region(selector, content)
                .map_err(|err| Error::Region {
                    path: path.clone(),
                    err,
                })
        };
        if doc.contains(&self.title) {
            fill(&mut doc, &self.title, &page.title)?;
        }
        if doc.contains(&self.breadcrumb) {
            fill(&mut doc, &self.breadcrumb, &page.breadcrumb)?;
        }
        fill(&mut doc, &self.main, &page.content)?;

        if !created && doc.as_str() == existing {
            debug!(path = %path.display(), "page unchanged");
            return Ok(Written::Unchanged);
        }
        self.store(&path, doc.as_str(), created)
    }

    /// Writes `contents` to the file at `relative` as they are, unless the
    /// file already holds exactly that.
    pub fn write_file(&self, relative: &Path, contents: &str) -> Result<Written> {
        let path = self.output_directory.join(relative);
        let created = match std::fs::read_to_string(&path) {
            Ok(existing) if existing == contents => {
                debug!(path = %path.display(), "file unchanged");
                return Ok(Written::Unchanged);
            }
            Ok(_) => false,
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => return Err(Error::Io { path, err: e }),
        };
        self.store(&path, contents, created)
    }

    fn store(&self, path: &Path, contents: &str, created: bool) -> Result<Written> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| Error::Io {
                path: dir.to_owned(),
                err: e,
            })?;
        }
        std::fs::write(path, contents).map_err(|e| Error::Io {
            path: path.to_owned(),
            err: e,
        })?;
        debug!(path = %path.display(), "page written");
        Ok(if created {
            Written::Created
        } else {
            Written::Updated
        })
    }
}

/// The page path of the record `id`, relative to the output directory. Ids
/// that would escape their own directory are rejected.
pub fn mountain_page_path(id: &str) -> Result<PathBuf> {
    if id.is_empty()
        || id == "."
        || id == ".."
        || id.contains(|c: char| c == '/' || c == '\\' || c == '\0')
    {
        return Err(Error::UnsafeId(id.to_owned()));
    }
    Ok(Path::new("mountains").join(id).join("index.html"))
}

/// The result of a fallible page-writing operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents an error in a page-writing operation.
#[derive(Debug)]
pub enum Error {
    /// An error rendering the page's fragments.
    Render(render::Error),

    /// A required region is missing from the page, or could not be replaced.
    Region { path: PathBuf, err: document::Error },

    /// The record id cannot be used as a directory name.
    UnsafeId(String),

    /// An error reading or writing the page file.
    Io { path: PathBuf, err: io::Error },
}

impl From<render::Error> for Error {
    fn from(err: render::Error) -> Error {
        Error::Render(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Render(err) => err.fmt(f),
            Error::Region { path, err } => write!(f, "{}: {}", path.display(), err),
            Error::UnsafeId(id) => write!(f, "record id `{}` is not a valid page name", id),
            Error::Io { path, err } => write!(f, "{}: {}", path.display(), err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Render(err) => Some(err),
            Error::Region { err, .. } => Some(err),
            Error::UnsafeId(_) => None,
            Error::Io { err, .. } => Some(err),
        }
    }
}

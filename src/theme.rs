//! The templates pages are rendered with. Every kind of template has a
//! built-in default; a project theme can replace any of them with its own
//! files (see [`crate::config::ThemeFiles`]). Templates use gtmpl's Go-style
//! syntax and never escape anything themselves: values are escaped when they
//! are converted (see [`crate::value`]).

use crate::config::ThemeFiles;
use gtmpl::{Context, Template, Value};
use std::fmt;
use std::fs::File;
use std::path::PathBuf;

/// The page shell. Its `title`, `nav.breadcrumb`, and `main#main-content`
/// elements are the regions the writer fills in.
pub const SHELL: &str = r##"<!DOCTYPE html>
<html lang="ja">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{{ .site_title }}</title>
    <link rel="icon" type="image/x-icon" href="{{ .home }}favicon.ico">
    <link rel="stylesheet" href="{{ .stylesheet }}">
</head>
<body>
    <a href="#main-content" class="skip-link">メインコンテンツへスキップ</a>
    <header role="banner">
        <nav class="navbar" role="navigation" aria-label="メインナビゲーション">
            <div class="container">
                <h1><a href="{{ .home }}">🏔️ {{ .site_title }}</a></h1>
                <ul class="nav-links">
                    <li><a href="{{ .home }}">ホーム</a></li>
                    <li><a href="{{ .mountains_url }}">山一覧</a></li>
                    <li><a href="{{ .regions_url }}">地域別</a></li>
                </ul>
            </div>
        </nav>
    </header>
    <nav class="breadcrumb" aria-label="パンくずリスト"></nav>
    <main id="main-content" role="main"></main>
    <footer role="contentinfo">
        <div class="container">
            <div class="footer-bottom">
                <p>&copy; {{ .site_title }}. All rights reserved.</p>
                <p>当サイトはアフィリエイトプログラムに参加しています。</p>
                <p>記載の価格・商品情報は掲載時点のものです。最新情報は各サイトでご確認ください。</p>
            </div>
        </div>
    </footer>
</body>
</html>
"##;

pub const MOUNTAIN: &str = r#"
<div class="container">
    <article class="mountain-detail">
        <div class="page-header">
            <h1>{{ .name }}</h1>
            <div class="mountain-meta">{{ .prefecture }} - 標高{{ .elevation }}m</div>
        </div>
        <section class="mountain-info">
            <h2>基本情報</h2>
            <dl>
                <dt>難易度</dt><dd>{{ .level }}</dd>
                <dt>所要時間</dt><dd>{{ .hiking_time }}</dd>
                <dt>距離</dt><dd>{{ .distance }}</dd>
                <dt>最寄り駅</dt><dd>{{ .station }}</dd>
                <dt>アクセス</dt><dd>{{ .access_time }}</dd>
            </dl>
        </section>{{ if .has_features }}
        <section class="mountain-features">
            <h2>特徴</h2>
            <ul>{{ range .features }}<li>{{ . }}</li>{{ end }}</ul>
        </section>{{ end }}{{ if .has_reference }}
        <section class="external-reference">
            <h2>{{ .reference.source_name }}より</h2>
            <p>{{ .reference.description }}</p>{{ if .reference.has_expert_comment }}
            <blockquote class="expert-comment">{{ .reference.expert_comment }}</blockquote>{{ end }}
            <p class="attribution"><a href="{{ .reference.url }}" target="_blank" rel="noopener">{{ .reference.attribution }}</a></p>
        </section>{{ end }}
        <div class="related-articles">
            <h2>関連リンク</h2>
            <ul>
                <li><a href="{{ .listing_url }}">山一覧へ戻る</a></li>{{ if .has_group }}
                <li><a href="{{ .group_url }}">{{ .prefecture }}の山</a></li>{{ end }}
            </ul>
        </div>
    </article>
</div>
"#;

pub const HOME: &str = r#"
<div class="container">
    <section class="hero">
        <h1>🏔️ {{ .site_title }}</h1>
        <p class="page-description">{{ .count }}の低山を紹介しています。</p>
        <a href="{{ .mountains_url }}" class="cta-button">山一覧を見る</a>
    </section>
    <section class="featured-mountains">
        <h2>気軽に登れる山</h2>
        <div class="mountain-grid">{{ range .cards }}
            <a href="{{ .url }}" class="mountain-card">
                <div class="mountain-card-content">
                    <h3>{{ .name }}</h3>
                    <div class="mountain-meta">{{ .prefecture }} - 標高{{ .elevation }}m</div>
                    <ul class="mountain-tags">{{ range .features }}<li>{{ . }}</li>{{ end }}</ul>
                </div>
            </a>{{ end }}
        </div>
    </section>{{ if .has_groups }}
    <section class="region-summary">
        <h2>地域から探す</h2>
        <ul class="region-links">{{ range .groups }}
            <li><a href="{{ .url }}">{{ .name }}</a> ({{ .count }}山)</li>{{ end }}
        </ul>
        <a href="{{ .regions_url }}">すべての地域を見る</a>
    </section>{{ end }}
</div>
"#;

pub const LISTING: &str = r#"
<div class="container">
    <div class="page-header">
        <h1>🏔️ 山一覧</h1>
        <p class="page-description">{{ .count }}の山を標高の低い順に紹介しています。</p>
    </div>
    <div class="mountain-grid">{{ range .cards }}
        <a href="{{ .url }}" class="mountain-card">
            <div class="mountain-card-content">
                <h3>{{ .name }}</h3>
                <div class="mountain-meta">{{ .prefecture }} - 標高{{ .elevation }}m</div>
                <ul class="mountain-tags">{{ range .features }}<li>{{ . }}</li>{{ end }}</ul>
            </div>
        </a>{{ end }}
    </div>
</div>
"#;

pub const REGIONS: &str = r#"
<div class="container">
    <div class="page-header">
        <h1>🗾 地域別</h1>
        <p class="page-description">{{ .count }}の都道府県から山を探せます。</p>
    </div>
    <div class="region-grid">{{ range .groups }}
        <a href="{{ .url }}" class="region-card">
            <h3>{{ .name }}</h3>
            <div class="region-count">{{ .count }}山</div>
            <ul class="region-mountains">{{ range .mountains }}<li>{{ . }}</li>{{ end }}</ul>
        </a>{{ end }}
    </div>
</div>
"#;

pub const GROUP: &str = r#"
<div class="container">
    <div class="page-header">
        <h1>{{ .name }}の山</h1>
        <p class="page-description">{{ .count }}山を標高の低い順に紹介しています。</p>
    </div>
    <div class="mountain-grid">{{ range .cards }}
        <a href="{{ .url }}" class="mountain-card">
            <div class="mountain-card-content">
                <h3>{{ .name }}</h3>
                <div class="mountain-meta">標高{{ .elevation }}m</div>
                <ul class="mountain-tags">{{ range .features }}<li>{{ . }}</li>{{ end }}</ul>
            </div>
        </a>{{ end }}
    </div>
</div>
"#;

pub const BREADCRUMB: &str = r#"<a href="{{ .home }}">ホーム</a>{{ range .trail }} &gt; <a href="{{ .url }}">{{ .name }}</a>{{ end }}"#;

pub const AFFILIATE: &str = r#"
<div class="{{ .marker }}">
    <h3>{{ .heading }}</h3>
    <p class="affiliate-disclaimer">{{ .disclaimer }}</p>
    <div class="affiliate-products">{{ range .products }}
        <div class="affiliate-product">
            <a href="{{ .url }}" target="_blank" rel="noopener nofollow sponsored">{{ .name }}</a>{{ if .has_price }}
            <span class="price">{{ .price }}</span>{{ end }}
        </div>{{ end }}
    </div>
</div>
"#;

/// The XML sitemap. Unlike the other kinds it is a whole file, not a
/// fragment placed into a shell.
pub const SITEMAP: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">{{ range .urls }}
  <url>
    <loc>{{ .loc }}</loc>{{ if .has_lastmod }}
    <lastmod>{{ .lastmod }}</lastmod>{{ end }}
    <changefreq>weekly</changefreq>
    <priority>{{ .priority }}</priority>
  </url>{{ end }}
</urlset>
"#;

/// One parsed template of every kind.
pub struct Theme {
    pub shell: Template,
    pub home: Template,
    pub mountain: Template,
    pub listing: Template,
    pub regions: Template,
    pub group: Template,
    pub breadcrumb: Template,
    pub affiliate: Template,
    pub sitemap: Template,
}

impl Theme {
    pub fn builtin() -> Result<Theme> {
        Theme::load(&ThemeFiles::default())
    }

    /// Parses each kind from its theme files, or from the built-in source
    /// when the theme lists none.
    pub fn load(files: &ThemeFiles) -> Result<Theme> {
        Ok(Theme {
            shell: parse_template(&files.shell, SHELL)?,
            home: parse_template(&files.home, HOME)?,
            mountain: parse_template(&files.mountain, MOUNTAIN)?,
            listing: parse_template(&files.listing, LISTING)?,
            regions: parse_template(&files.regions, REGIONS)?,
            group: parse_template(&files.group, GROUP)?,
            breadcrumb: parse_template(&files.breadcrumb, BREADCRUMB)?,
            affiliate: parse_template(&files.affiliate, AFFILIATE)?,
            sitemap: parse_template(&files.sitemap, SITEMAP)?,
        })
    }
}

// Loads the template files' contents, concatenated, and parses the result
// into a template. No files means the built-in source.
fn parse_template(template_files: &[PathBuf], builtin: &str) -> Result<Template> {
    let mut contents = String::new();
    if template_files.is_empty() {
        contents.push_str(builtin);
    }
    for template_file in template_files {
        use std::io::Read;
        File::open(template_file)
            .and_then(|mut f| f.read_to_string(&mut contents))
            .map_err(|e| Error::OpenTemplateFile {
                path: template_file.to_owned(),
                err: e,
            })?;
        contents.push(' ');
    }

    let mut template = Template::default();
    template.parse(&contents).map_err(Error::ParseTemplate)?;
    Ok(template)
}

/// Executes `template` against `value` and returns the output.
pub fn execute(template: &Template, value: Value) -> Result<String> {
    let context = Context::from(value).map_err(|e| Error::Execute(e.to_string()))?;
    let mut out: Vec<u8> = Vec::new();
    template
        .execute(&mut out, &context)
        .map_err(|e| Error::Execute(e.to_string()))?;
    String::from_utf8(out).map_err(|e| Error::Execute(e.to_string()))
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// Returned for I/O problems while opening template files.
    OpenTemplateFile { path: PathBuf, err: std::io::Error },

    /// Returned for errors parsing template files.
    ParseTemplate(String),

    /// Returned for errors executing a template.
    Execute(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::OpenTemplateFile { path, err } => {
                write!(f, "Opening template file '{}': {}", path.display(), err)
            }
            Error::ParseTemplate(err) => write!(f, "Parsing template: {}", err),
            Error::Execute(err) => write!(f, "Executing template: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::OpenTemplateFile { err, .. } => Some(err),
            _ => None,
        }
    }
}

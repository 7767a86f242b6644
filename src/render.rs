//! Renders records into HTML fragments: one page per mountain, the flat
//! listing, the by-prefecture index, and one page per prefecture. Fragments
//! are what goes inside a page's regions; placing them into page shells on
//! disk is [`crate::write`]'s job.

use crate::config::{Config, MissingPrefecture};
use crate::mountain::{Mountain, ValidationError};
use crate::theme::{self, Theme};
use crate::value::{self, href, object, text, text_or_placeholder};
use chrono::NaiveDate;
use gtmpl::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use url::Url;

/// The prefecture key records without one are filed under.
pub const UNCLASSIFIED: &str = "未分類";

/// How many of the lowest mountains the home page features.
pub const HOME_FEATURED: usize = 6;

/// Builds the site-relative URLs of generated pages. All of them live under
/// the path of the configured site root.
#[derive(Debug, Clone)]
pub struct Site {
    root: Url,
    root_path: String,
}

impl Site {
    pub fn new(config: &Config) -> Site {
        let mut root_path = config.site_root.path().to_owned();
        if !root_path.ends_with('/') {
            root_path.push('/');
        }
        Site {
            root: config.site_root.clone(),
            root_path,
        }
    }

    /// The public URL of the site path `path`, on the site root's host.
    pub fn absolute(&self, path: &str) -> String {
        let mut url = self.root.clone();
        url.set_path(path);
        url.set_query(None);
        url.set_fragment(None);
        url.to_string()
    }

    pub fn home(&self) -> String {
        self.root_path.clone()
    }

    pub fn listing(&self) -> String {
        format!("{}mountains/", self.root_path)
    }

    pub fn mountain(&self, id: &str) -> String {
        format!("{}mountains/{}/", self.root_path, id)
    }

    pub fn regions(&self) -> String {
        format!("{}regions/", self.root_path)
    }

    pub fn group(&self, slug: &str) -> String {
        format!("{}regions/{}/", self.root_path, slug)
    }
}

/// The records sharing one prefecture, lowest first.
#[derive(Debug, Clone)]
pub struct Group<'m> {
    pub key: String,
    pub slug: String,
    pub members: Vec<&'m Mountain>,
}

/// Groups `mountains` by prefecture, largest group first (ties by key).
/// Slugs are unique across the returned groups.
pub fn group_by_prefecture(
    mountains: &[Mountain],
    missing: MissingPrefecture,
) -> std::result::Result<Vec<Group>, ValidationError> {
    let mut by_key: BTreeMap<&str, Vec<&Mountain>> = BTreeMap::new();
    for mountain in mountains {
        let key = match prefecture_of(mountain) {
            Some(p) => p,
            None => match missing {
                MissingPrefecture::Unclassified => UNCLASSIFIED,
                MissingPrefecture::Error => {
                    return Err(ValidationError::MissingPrefecture(mountain.id.clone()))
                }
            },
        };
        by_key.entry(key).or_default().push(mountain);
    }

    let mut groups: Vec<Group> = by_key
        .into_iter()
        .map(|(key, mut members)| {
            members.sort_by_key(|m| m.elevation);
            Group {
                key: key.to_owned(),
                slug: String::new(),
                members,
            }
        })
        .collect();
    groups.sort_by(|a, b| {
        b.members
            .len()
            .cmp(&a.members.len())
            .then_with(|| a.key.cmp(&b.key))
    });

    let mut seen: HashSet<String> = HashSet::new();
    for group in &mut groups {
        let base = slug_of(&group.key);
        let mut slug = base.clone();
        let mut n = 2;
        while !seen.insert(slug.clone()) {
            slug = format!("{}-{}", base, n);
            n += 1;
        }
        group.slug = slug;
    }
    Ok(groups)
}

/// The group `mountain` was placed in, if any.
pub fn group_of<'g, 'm>(groups: &'g [Group<'m>], mountain: &Mountain) -> Option<&'g Group<'m>> {
    groups
        .iter()
        .find(|g| g.members.iter().any(|m| m.id == mountain.id))
}

fn prefecture_of(mountain: &Mountain) -> Option<&str> {
    mountain
        .prefecture
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
}

fn slug_of(key: &str) -> String {
    match slug::slugify(key) {
        s if s.is_empty() => "group".to_owned(),
        s => s,
    }
}

/// The contents of a page's regions.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Escaped text for the `<title>` element.
    pub title: String,
    pub breadcrumb: String,
    pub content: String,
}

pub struct Renderer<'a> {
    pub config: &'a Config,
    pub theme: &'a Theme,
    pub site: Site,
}

impl<'a> Renderer<'a> {
    pub fn new(config: &'a Config, theme: &'a Theme) -> Renderer<'a> {
        Renderer {
            config,
            theme,
            site: Site::new(config),
        }
    }

    /// Renders a fresh page shell, used for pages that do not exist yet.
    pub fn render_shell(&self) -> Result<String> {
        Ok(theme::execute(
            &self.theme.shell,
            object(vec![
                ("site_title", text(&self.config.title)),
                ("stylesheet", href(&self.config.stylesheet)),
                ("home", href(&self.site.home())),
                ("mountains_url", href(&self.site.listing())),
                ("regions_url", href(&self.site.regions())),
            ]),
        )?)
    }

    /// Renders the home page's content: the lowest few mountains and the
    /// prefecture groups.
    pub fn render_home(&self, mountains: &[Mountain], groups: &[Group]) -> Result<String> {
        let mut sorted: Vec<&Mountain> = mountains.iter().collect();
        sorted.sort_by_key(|m| m.elevation);
        sorted.truncate(HOME_FEATURED);
        let links: Vec<Value> = groups
            .iter()
            .map(|g| {
                object(vec![
                    ("name", text(&g.key)),
                    ("url", href(&self.site.group(&g.slug))),
                    ("count", Value::String(g.members.len().to_string())),
                ])
            })
            .collect();
        let value = object(vec![
            ("site_title", text(&self.config.title)),
            ("count", Value::String(mountains.len().to_string())),
            ("mountains_url", href(&self.site.listing())),
            ("regions_url", href(&self.site.regions())),
            ("cards", self.cards(&sorted)),
            ("has_groups", Value::Bool(!groups.is_empty())),
            ("groups", Value::Array(links)),
        ]);
        Ok(theme::execute(&self.theme.home, value)?)
    }

    /// Renders the main content of one mountain's page. The page links to
    /// `group`'s page when the mountain has one.
    pub fn render_mountain(&self, mountain: &Mountain, group: Option<&Group>) -> Result<String> {
        let prefecture = prefecture_of(mountain).unwrap_or(UNCLASSIFIED);
        let value = object(vec![
            ("name", text(&mountain.name)),
            ("prefecture", text(prefecture)),
            ("elevation", Value::String(mountain.elevation.to_string())),
            ("level", text(mountain.difficulty_level())),
            (
                "hiking_time",
                text_or_placeholder(mountain.difficulty.hiking_time.as_deref()),
            ),
            (
                "distance",
                text_or_placeholder(mountain.difficulty.distance.as_deref()),
            ),
            ("station", text(mountain.nearest_station())),
            ("access_time", text(mountain.access_time())),
            ("has_features", Value::Bool(!mountain.features.is_empty())),
            (
                "features",
                value::features(&mountain.features, self.config.features.page),
            ),
            (
                "has_reference",
                Value::Bool(mountain.external_reference.is_some()),
            ),
            (
                "reference",
                match &mountain.external_reference {
                    Some(r) => Value::from(r),
                    None => Value::Nil,
                },
            ),
            ("listing_url", href(&self.site.listing())),
            ("has_group", Value::Bool(group.is_some())),
            (
                "group_url",
                match group {
                    Some(g) => href(&self.site.group(&g.slug)),
                    None => Value::Nil,
                },
            ),
        ]);
        Ok(theme::execute(&self.theme.mountain, value)?)
    }

    /// Renders the flat listing of every record, lowest first.
    pub fn render_listing(&self, mountains: &[Mountain]) -> Result<String> {
        let mut sorted: Vec<&Mountain> = mountains.iter().collect();
        sorted.sort_by_key(|m| m.elevation);
        let value = object(vec![
            ("count", Value::String(sorted.len().to_string())),
            ("cards", self.cards(&sorted)),
        ]);
        Ok(theme::execute(&self.theme.listing, value)?)
    }

    /// Renders the index of prefectures, one card per group.
    pub fn render_region_listing(&self, mountains: &[Mountain]) -> Result<String> {
        let groups = group_by_prefecture(mountains, self.config.missing_prefecture)?;
        self.render_groups(&groups)
    }

    pub fn render_groups(&self, groups: &[Group]) -> Result<String> {
        let cards: Vec<Value> = groups
            .iter()
            .map(|g| {
                object(vec![
                    ("name", text(&g.key)),
                    ("url", href(&self.site.group(&g.slug))),
                    ("count", Value::String(g.members.len().to_string())),
                    (
                        "mountains",
                        Value::Array(g.members.iter().map(|m| text(&m.name)).collect()),
                    ),
                ])
            })
            .collect();
        let value = object(vec![
            ("count", Value::String(groups.len().to_string())),
            ("groups", Value::Array(cards)),
        ]);
        Ok(theme::execute(&self.theme.regions, value)?)
    }

    /// Renders one prefecture's page.
    pub fn render_group(&self, group: &Group) -> Result<String> {
        let value = object(vec![
            ("name", text(&group.key)),
            ("count", Value::String(group.members.len().to_string())),
            ("cards", self.cards(&group.members)),
        ]);
        Ok(theme::execute(&self.theme.group, value)?)
    }

    /// Renders a breadcrumb trail from the home page through `trail`, given
    /// as (name, url) pairs.
    pub fn render_breadcrumb(&self, trail: &[(&str, String)]) -> Result<String> {
        let links: Vec<Value> = trail
            .iter()
            .map(|(name, url)| object(vec![("name", text(name)), ("url", href(url))]))
            .collect();
        let value = object(vec![
            ("home", href(&self.site.home())),
            ("trail", Value::Array(links)),
        ]);
        Ok(theme::execute(&self.theme.breadcrumb, value)?)
    }

    /// Renders the affiliate block from the configured products. The block
    /// carries the configured marker class.
    pub fn render_affiliate(&self) -> Result<String> {
        let affiliate = &self.config.affiliate;
        let value = object(vec![
            ("marker", text(&affiliate.marker)),
            ("heading", text(&affiliate.heading)),
            ("disclaimer", text(&affiliate.disclaimer)),
            (
                "products",
                Value::Array(affiliate.products.iter().map(Value::from).collect()),
            ),
        ]);
        Ok(theme::execute(&self.theme.affiliate, value)?)
    }

    /// Renders the XML sitemap: the home page, the listings, every group
    /// page and every page in `mountains`. `lastmod` is stamped on each URL
    /// when known.
    pub fn render_sitemap(
        &self,
        mountains: &[&Mountain],
        groups: &[Group],
        lastmod: Option<NaiveDate>,
    ) -> Result<String> {
        let lastmod = lastmod.map(|d| d.format("%Y-%m-%d").to_string());
        let entry = |path: String, priority: &str| {
            object(vec![
                ("loc", text(&self.site.absolute(&path))),
                ("priority", Value::String(priority.to_owned())),
                ("has_lastmod", Value::Bool(lastmod.is_some())),
                (
                    "lastmod",
                    Value::String(lastmod.clone().unwrap_or_default()),
                ),
            ])
        };
        let mut urls = vec![
            entry(self.site.home(), "1.0"),
            entry(self.site.listing(), "0.8"),
            entry(self.site.regions(), "0.8"),
        ];
        urls.extend(groups.iter().map(|g| entry(self.site.group(&g.slug), "0.6")));
        urls.extend(mountains.iter().map(|m| entry(self.site.mountain(&m.id), "0.8")));
        Ok(theme::execute(
            &self.theme.sitemap,
            object(vec![("urls", Value::Array(urls))]),
        )?)
    }

    pub fn home_page(&self, mountains: &[Mountain], groups: &[Group]) -> Result<Page> {
        Ok(Page {
            title: value::escape(&self.config.title),
            breadcrumb: self.render_breadcrumb(&[])?,
            content: self.render_home(mountains, groups)?,
        })
    }

    pub fn mountain_page(&self, mountain: &Mountain, group: Option<&Group>) -> Result<Page> {
        Ok(Page {
            title: self.title(&mountain.name),
            breadcrumb: self.render_breadcrumb(&[
                ("山一覧", self.site.listing()),
                (&mountain.name, self.site.mountain(&mountain.id)),
            ])?,
            content: self.render_mountain(mountain, group)?,
        })
    }

    pub fn listing_page(&self, mountains: &[Mountain]) -> Result<Page> {
        Ok(Page {
            title: self.title("山一覧"),
            breadcrumb: self.render_breadcrumb(&[("山一覧", self.site.listing())])?,
            content: self.render_listing(mountains)?,
        })
    }

    pub fn regions_page(&self, groups: &[Group]) -> Result<Page> {
        Ok(Page {
            title: self.title("地域別"),
            breadcrumb: self.render_breadcrumb(&[("地域別", self.site.regions())])?,
            content: self.render_groups(groups)?,
        })
    }

    pub fn group_page(&self, group: &Group) -> Result<Page> {
        let name = format!("{}の山", group.key);
        Ok(Page {
            title: self.title(&name),
            breadcrumb: self.render_breadcrumb(&[
                ("地域別", self.site.regions()),
                (&name, self.site.group(&group.slug)),
            ])?,
            content: self.render_group(group)?,
        })
    }

    fn title(&self, name: &str) -> String {
        value::escape(&format!("{} | {}", name, self.config.title))
    }

    fn cards(&self, mountains: &[&Mountain]) -> Value {
        Value::Array(
            mountains
                .iter()
                .map(|m| {
                    object(vec![
                        ("name", text(&m.name)),
                        ("url", href(&self.site.mountain(&m.id))),
                        (
                            "prefecture",
                            text(prefecture_of(m).unwrap_or(UNCLASSIFIED)),
                        ),
                        ("elevation", Value::String(m.elevation.to_string())),
                        (
                            "features",
                            value::features(&m.features, self.config.features.card),
                        ),
                    ])
                })
                .collect(),
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// Returned when a template fails to execute.
    Template(theme::Error),

    /// Returned when a record cannot be placed on a page.
    Validation(ValidationError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Template(err) => err.fmt(f),
            Error::Validation(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Template(err) => Some(err),
            Error::Validation(err) => Some(err),
        }
    }
}

impl From<theme::Error> for Error {
    fn from(err: theme::Error) -> Error {
        Error::Template(err)
    }
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Error {
        Error::Validation(err)
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::config::{Affiliate, FeatureLimits, ThemeFiles};
    use crate::document::Document;
    use serde_json::json;
    use std::path::PathBuf;
    use url::Url;

    pub(crate) fn config() -> Config {
        Config {
            project_root: PathBuf::from("/tmp/teizan"),
            site_root: Url::parse("https://teizan.example.com/blog/").unwrap(),
            title: "低山旅行".to_owned(),
            store_path: PathBuf::from("/tmp/teizan/data/mountains.json"),
            output_directory: PathBuf::from("/tmp/teizan/static_site"),
            theme: ThemeFiles::default(),
            features: FeatureLimits::default(),
            missing_prefecture: MissingPrefecture::Unclassified,
            stylesheet: "/css/style.css".to_owned(),
            default_source: None,
            affiliate: Affiliate::default(),
        }
    }

    pub(crate) fn mountain(id: &str, name: &str, elevation: i64, prefecture: &str) -> Mountain {
        serde_json::from_value(json!({
            "id": id,
            "name": name,
            "elevation": elevation,
            "prefecture": prefecture,
            "features": ["ケーブルカーあり", "薬王院", "夜景", "紅葉", "温泉", "展望台"],
        }))
        .unwrap()
    }

    fn positions(haystack: &str, needles: &[&str]) -> Vec<usize> {
        needles
            .iter()
            .map(|n| haystack.find(n).unwrap_or_else(|| panic!("missing {}", n)))
            .collect()
    }

    #[test]
    fn test_listing_sorted_by_elevation() -> Result<()> {
        let config = config();
        let theme = Theme::builtin()?;
        let renderer = Renderer::new(&config, &theme);
        let fragment = renderer.render_listing(&[
            mountain("mt_takao", "高尾山", 599, "東京都"),
            mountain("mt_tsukuba", "筑波山", 334, "茨城県"),
            mountain("mt_mitake", "御岳山", 877, "東京都"),
        ])?;

        let at = positions(&fragment, &["標高334m", "標高599m", "標高877m"]);
        assert!(at[0] < at[1] && at[1] < at[2], "{:?}", at);
        assert!(fragment.contains(r#"href="/blog/mountains/mt_tsukuba/""#));
        Ok(())
    }

    #[test]
    fn test_escaping() -> Result<()> {
        let config = config();
        let theme = Theme::builtin()?;
        let renderer = Renderer::new(&config, &theme);
        let name = "O'Brien's <Peak>";
        let mountain = mountain("mt_obrien", name, 100, "<県>");

        for fragment in vec![
            renderer.render_mountain(&mountain, None)?,
            renderer.render_listing(&[mountain.clone()])?,
            renderer.render_region_listing(&[mountain.clone()])?,
        ] {
            assert!(!fragment.contains(name));
            assert!(!fragment.contains("<Peak>"));
            assert!(!fragment.contains("O'Brien"));
            assert!(!fragment.contains("<県>"));
            Document::new(fragment).check_balanced().unwrap();
        }
        Ok(())
    }

    #[test]
    fn test_feature_limits() -> Result<()> {
        let config = config();
        let theme = Theme::builtin()?;
        let renderer = Renderer::new(&config, &theme);
        let m = mountain("mt_takao", "高尾山", 599, "東京都");

        let page = renderer.render_mountain(&m, None)?;
        assert!(page.contains("温泉"));
        assert!(!page.contains("展望台"));

        let listing = renderer.render_listing(&[m])?;
        assert!(!listing.contains("紅葉"));
        assert!(listing.contains("夜景"));
        Ok(())
    }

    #[test]
    fn test_mountain_page_defaults_and_reference() -> Result<()> {
        let config = config();
        let theme = Theme::builtin()?;
        let renderer = Renderer::new(&config, &theme);
        let plain: Mountain = serde_json::from_value(json!({
            "id": "mt_x", "name": "X山", "elevation": 100,
        }))
        .unwrap();
        let page = renderer.render_mountain(&plain, None)?;
        assert!(page.contains("要確認"));
        assert!(page.contains("初級"));
        assert!(!page.contains("external-reference"));

        let referenced: Mountain = serde_json::from_value(json!({
            "id": "mt_y", "name": "Y山", "elevation": 200,
            "externalReference": {
                "sourceName": "BE-PAL",
                "description": "紹介",
                "url": "https://www.bepal.net/archives/536937",
                "attribution": "出典: BE-PAL「関東の低山」<2024>",
            },
        }))
        .unwrap();
        let page = renderer.render_mountain(&referenced, None)?;
        assert!(page.contains("出典: BE-PAL「関東の低山」&lt;2024&gt;"));
        assert!(!page.contains("expert-comment"));
        Ok(())
    }

    #[test]
    fn test_group_by_prefecture() {
        let mountains = vec![
            mountain("a", "A", 300, "東京都"),
            mountain("b", "B", 100, "埼玉県"),
            mountain("c", "C", 200, "東京都"),
            mountain("d", "D", 50, "千葉県"),
        ];
        let groups = group_by_prefecture(&mountains, MissingPrefecture::Unclassified).unwrap();
        let keys: Vec<&str> = groups.iter().map(|g| g.key.as_str()).collect();
        assert_eq!(vec!["東京都", "千葉県", "埼玉県"], keys);
        let ids: Vec<&str> = groups[0].members.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(vec!["c", "a"], ids);

        let slugs: HashSet<&str> = groups.iter().map(|g| g.slug.as_str()).collect();
        assert_eq!(groups.len(), slugs.len());
    }

    #[test]
    fn test_missing_prefecture() {
        let mut m = mountain("mt_x", "X山", 100, "");
        m.prefecture = None;
        let mountains = vec![m];

        let groups = group_by_prefecture(&mountains, MissingPrefecture::Unclassified).unwrap();
        assert_eq!(UNCLASSIFIED, groups[0].key);

        match group_by_prefecture(&mountains, MissingPrefecture::Error) {
            Err(ValidationError::MissingPrefecture(id)) => assert_eq!("mt_x", id),
            other => panic!("wanted missing prefecture; found {:?}", other),
        }
    }

    #[test]
    fn test_mountain_links_to_its_own_group() -> Result<()> {
        let config = config();
        let theme = Theme::builtin()?;
        let renderer = Renderer::new(&config, &theme);
        let mountains = vec![
            mountain("mt_a", "A山", 300, "Tokyo"),
            mountain("mt_b", "B山", 200, "tokyo"),
        ];
        let groups = group_by_prefecture(&mountains, config.missing_prefecture)?;
        let slugs: Vec<&str> = groups.iter().map(|g| g.slug.as_str()).collect();
        assert_eq!(vec!["tokyo", "tokyo-2"], slugs);

        let b = &mountains[1];
        let fragment = renderer.render_mountain(b, group_of(&groups, b))?;
        assert!(
            fragment.contains(r#"<a href="/blog/regions/tokyo-2/">tokyoの山</a>"#),
            "{}",
            fragment
        );

        let orphan = renderer.render_mountain(b, None)?;
        assert!(!orphan.contains("の山</a>"));
        assert!(orphan.contains("山一覧へ戻る"));
        Ok(())
    }

    #[test]
    fn test_home_features_lowest_mountains() -> Result<()> {
        let config = config();
        let theme = Theme::builtin()?;
        let renderer = Renderer::new(&config, &theme);
        let mountains: Vec<Mountain> = (0..8)
            .map(|i| mountain(&format!("mt_{}", i), &format!("山{}", i), 900 - i * 100, "東京都"))
            .collect();
        let groups = group_by_prefecture(&mountains, config.missing_prefecture)?;

        let home = renderer.render_home(&mountains, &groups)?;
        assert!(home.contains("8の低山"));
        assert!(home.contains("標高200m"));
        assert!(!home.contains("標高900m"));
        assert_eq!(HOME_FEATURED, home.matches("mountain-card\"").count());
        assert!(home.contains("(8山)"));
        Document::new(home).check_balanced().unwrap();

        let bare = renderer.render_home(&mountains, &[])?;
        assert!(!bare.contains("region-summary"));
        Ok(())
    }

    #[test]
    fn test_absolute_urls() {
        let config = config();
        let site = Site::new(&config);
        assert_eq!("https://teizan.example.com/blog/", site.absolute(&site.home()));
        assert_eq!(
            "https://teizan.example.com/blog/mountains/mt_takao/",
            site.absolute(&site.mountain("mt_takao"))
        );
    }

    #[test]
    fn test_breadcrumb_and_shell() -> Result<()> {
        let config = config();
        let theme = Theme::builtin()?;
        let renderer = Renderer::new(&config, &theme);
        let crumbs = renderer.render_breadcrumb(&[("山一覧", renderer.site.listing())])?;
        assert_eq!(
            r#"<a href="/blog/">ホーム</a> &gt; <a href="/blog/mountains/">山一覧</a>"#,
            crumbs
        );

        let shell = Document::new(renderer.render_shell()?);
        shell.check_balanced().unwrap();
        assert!(shell.as_str().contains(r#"href="/css/style.css""#));
        Ok(())
    }

    #[test]
    fn test_affiliate_block_carries_marker() -> Result<()> {
        let mut config = config();
        config.affiliate.products.push(crate::config::Product {
            name: "トレッキングポール".to_owned(),
            url: Url::parse("https://example.com/pole?tag=x&id=1").unwrap(),
            price: Some("¥3,980".to_owned()),
        });
        let theme = Theme::builtin()?;
        let renderer = Renderer::new(&config, &theme);
        let block = renderer.render_affiliate()?;
        assert!(block.contains(r#"class="affiliate-section""#));
        assert!(block.contains("tag=x&amp;id=1"));
        assert!(block.contains("¥3,980"));
        Ok(())
    }
}

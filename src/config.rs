//! Loads the project configuration from `teizan.yaml`, found by searching the
//! starting directory and then each of its parents. Relative paths in the file
//! are resolved against the directory holding it. Remote credentials are not
//! part of the project file; see [`RemoteConfig`].

use crate::document::Selector;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

pub const PROJECT_FILE: &str = "teizan.yaml";

#[derive(Deserialize)]
struct Project {
    site_root: Url,

    #[serde(default = "default_title")]
    title: String,

    #[serde(default = "default_store")]
    store: PathBuf,

    #[serde(default = "default_output_directory")]
    output_directory: PathBuf,

    #[serde(default)]
    theme: Option<PathBuf>,

    #[serde(default)]
    features: FeatureLimits,

    #[serde(default)]
    missing_prefecture: MissingPrefecture,

    #[serde(default = "default_stylesheet")]
    stylesheet: String,

    #[serde(default)]
    default_source: Option<String>,

    #[serde(default)]
    affiliate: Affiliate,
}

fn default_title() -> String {
    "低山旅行".to_owned()
}

fn default_store() -> PathBuf {
    PathBuf::from("data/mountains.json")
}

fn default_output_directory() -> PathBuf {
    PathBuf::from("static_site")
}

fn default_stylesheet() -> String {
    "/css/style.css".to_owned()
}

/// The template files making up a theme, listed in `theme.yaml`. A kind with
/// no files falls back to the built-in template. Several files for one kind
/// are concatenated in order, so later files can define templates used by
/// earlier ones.
#[derive(Deserialize, Default, Debug, Clone)]
pub struct ThemeFiles {
    #[serde(default)]
    pub shell: Vec<PathBuf>,
    #[serde(default)]
    pub home: Vec<PathBuf>,
    #[serde(default)]
    pub mountain: Vec<PathBuf>,
    #[serde(default)]
    pub listing: Vec<PathBuf>,
    #[serde(default)]
    pub regions: Vec<PathBuf>,
    #[serde(default)]
    pub group: Vec<PathBuf>,
    #[serde(default)]
    pub breadcrumb: Vec<PathBuf>,
    #[serde(default)]
    pub affiliate: Vec<PathBuf>,
    #[serde(default)]
    pub sitemap: Vec<PathBuf>,
}

/// How many `features` are shown in each rendering context.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureLimits {
    #[serde(default = "default_page_limit")]
    pub page: usize,
    #[serde(default = "default_card_limit")]
    pub card: usize,
}

fn default_page_limit() -> usize {
    5
}

fn default_card_limit() -> usize {
    3
}

impl Default for FeatureLimits {
    fn default() -> Self {
        FeatureLimits {
            page: default_page_limit(),
            card: default_card_limit(),
        }
    }
}

/// What to do with a record that has no prefecture when grouping.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MissingPrefecture {
    /// File it under the unclassified group.
    Unclassified,
    /// Report it as a validation error.
    Error,
}

impl Default for MissingPrefecture {
    fn default() -> Self {
        MissingPrefecture::Unclassified
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Product {
    pub name: String,
    pub url: Url,
    #[serde(default)]
    pub price: Option<String>,
}

/// The affiliate block the synchronizer keeps present on mountain pages.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Affiliate {
    /// Class carried by the block; its presence means "already inserted".
    #[serde(default = "default_marker")]
    pub marker: String,

    /// The block goes immediately before the first element matching this.
    #[serde(default = "default_anchor")]
    pub anchor: Selector,

    #[serde(default = "default_heading")]
    pub heading: String,

    #[serde(default = "default_disclaimer")]
    pub disclaimer: String,

    #[serde(default)]
    pub products: Vec<Product>,
}

fn default_marker() -> String {
    "affiliate-section".to_owned()
}

fn default_anchor() -> Selector {
    Selector::class("related-articles")
}

fn default_heading() -> String {
    "🎒 おすすめの登山グッズ".to_owned()
}

fn default_disclaimer() -> String {
    "※以下の商品リンクはアフィリエイトリンクです。価格・在庫は変動する場合があります。".to_owned()
}

impl Default for Affiliate {
    fn default() -> Self {
        Affiliate {
            marker: default_marker(),
            anchor: default_anchor(),
            heading: default_heading(),
            disclaimer: default_disclaimer(),
            products: Vec::new(),
        }
    }
}

/// The resolved project configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_root: PathBuf,

    /// The public root of the site. Always ends in a slash so that
    /// [`Url::join`] treats it as a directory.
    pub site_root: Url,
    pub title: String,
    pub store_path: PathBuf,
    pub output_directory: PathBuf,
    pub theme: ThemeFiles,
    pub features: FeatureLimits,
    pub missing_prefecture: MissingPrefecture,
    pub stylesheet: String,
    pub default_source: Option<String>,
    pub affiliate: Affiliate,
}

impl Config {
    /// Searches `dir` and its ancestors for [`PROJECT_FILE`] and loads the
    /// first one found.
    pub fn from_directory(dir: &Path) -> Result<Config> {
        let mut current = Some(dir);
        while let Some(dir) = current {
            let path = dir.join(PROJECT_FILE);
            if path.is_file() {
                return Config::from_project_file(&path);
            }
            current = dir.parent();
        }
        Err(Error::ProjectNotFound(dir.to_owned()))
    }

    pub fn from_project_file(path: &Path) -> Result<Config> {
        let file = open(path)?;
        let project: Project = serde_yaml::from_reader(file).map_err(|e| Error::Yaml {
            path: path.to_owned(),
            err: e,
        })?;
        let project_root = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_owned(),
            _ => PathBuf::from("."),
        };

        let theme = match &project.theme {
            None => ThemeFiles::default(),
            Some(theme_dir) => {
                let theme_dir = project_root.join(theme_dir);
                let theme_path = theme_dir.join("theme.yaml");
                let files: ThemeFiles =
                    serde_yaml::from_reader(open(&theme_path)?).map_err(|e| Error::Yaml {
                        path: theme_path.clone(),
                        err: e,
                    })?;
                files.resolve(&theme_dir)
            }
        };

        Ok(Config {
            site_root: with_trailing_slash(project.site_root),
            title: project.title,
            store_path: project_root.join(project.store),
            output_directory: project_root.join(project.output_directory),
            theme,
            features: project.features,
            missing_prefecture: project.missing_prefecture,
            stylesheet: project.stylesheet,
            default_source: project.default_source,
            affiliate: project.affiliate,
            project_root,
        })
    }
}

impl ThemeFiles {
    fn resolve(self, theme_dir: &Path) -> ThemeFiles {
        let join = |files: Vec<PathBuf>| -> Vec<PathBuf> {
            files.into_iter().map(|f| theme_dir.join(f)).collect()
        };
        ThemeFiles {
            shell: join(self.shell),
            home: join(self.home),
            mountain: join(self.mountain),
            listing: join(self.listing),
            regions: join(self.regions),
            group: join(self.group),
            breadcrumb: join(self.breadcrumb),
            affiliate: join(self.affiliate),
            sitemap: join(self.sitemap),
        }
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

fn open(path: &Path) -> Result<std::fs::File> {
    std::fs::File::open(path).map_err(|e| Error::Open {
        path: path.to_owned(),
        err: e,
    })
}

pub const ENV_HOST: &str = "TEIZAN_FTP_HOST";
pub const ENV_PORT: &str = "TEIZAN_FTP_PORT";
pub const ENV_USER: &str = "TEIZAN_FTP_USER";
pub const ENV_PASSWORD: &str = "TEIZAN_FTP_PASSWORD";
pub const ENV_DIRECTORY: &str = "TEIZAN_FTP_DIR";

/// Connection settings for the remote mirror. These only ever come from the
/// environment, optionally seeded from a `.env` file in the project root.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub directory: String,
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("directory", &self.directory)
            .finish()
    }
}

impl RemoteConfig {
    /// Loads `.env` from `project_root` if there is one (variables already
    /// set in the environment win) and reads the settings from the process
    /// environment.
    pub fn from_env(project_root: &Path) -> Result<RemoteConfig> {
        let env_file = project_root.join(".env");
        if env_file.is_file() {
            dotenvy::from_path(&env_file).map_err(|e| Error::EnvFile {
                path: env_file.clone(),
                err: e,
            })?;
        }
        RemoteConfig::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<RemoteConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| match lookup(key) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(Error::MissingEnv(key)),
        };
        let port: u16 = match lookup(ENV_PORT) {
            None => 21,
            Some(port) => port.parse().map_err(|_| Error::InvalidEnv {
                key: ENV_PORT,
                value: port,
            })?,
        };
        Ok(RemoteConfig {
            host: required(ENV_HOST)?,
            port,
            user: required(ENV_USER)?,
            password: required(ENV_PASSWORD)?,
            directory: remote_directory(lookup(ENV_DIRECTORY)),
        })
    }
}

// The push root as an absolute path. Relative paths are taken from the FTP
// root, so they don't depend on the session's working directory.
fn remote_directory(directory: Option<String>) -> String {
    match directory {
        Some(dir) if dir.starts_with('/') => dir,
        Some(dir) => format!("/{}", dir),
        None => "/".to_owned(),
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Errors locating or reading configuration.
#[derive(Debug)]
pub enum Error {
    /// Returned when no [`PROJECT_FILE`] exists in the directory or any parent.
    ProjectNotFound(PathBuf),

    /// Returned when a configuration file can't be opened.
    Open { path: PathBuf, err: std::io::Error },

    /// Returned when a configuration file isn't valid.
    Yaml { path: PathBuf, err: serde_yaml::Error },

    /// Returned when the `.env` file can't be parsed.
    EnvFile { path: PathBuf, err: dotenvy::Error },

    /// Returned when a required environment variable is unset or empty.
    MissingEnv(&'static str),

    /// Returned when an environment variable can't be parsed.
    InvalidEnv { key: &'static str, value: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ProjectNotFound(dir) => write!(
                f,
                "could not find `{}` in `{}` or any parent directory",
                PROJECT_FILE,
                dir.display()
            ),
            Error::Open { path, err } => write!(f, "opening `{}`: {}", path.display(), err),
            Error::Yaml { path, err } => write!(f, "loading `{}`: {}", path.display(), err),
            Error::EnvFile { path, err } => write!(f, "loading `{}`: {}", path.display(), err),
            Error::MissingEnv(key) => write!(f, "environment variable `{}` is not set", key),
            Error::InvalidEnv { key, value } => {
                write!(f, "environment variable `{}` has invalid value `{}`", key, value)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Open { err, .. } => Some(err),
            Error::Yaml { err, .. } => Some(err),
            Error::EnvFile { err, .. } => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_from_directory_searches_parents() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(PROJECT_FILE),
            "site_root: https://teizan.example.com/blog\nfeatures:\n  card: 2\nmissing_prefecture: error\naffiliate:\n  anchor: div.related\n",
        )
        .unwrap();
        let nested = dir.path().join("static_site").join("mountains");
        std::fs::create_dir_all(&nested).unwrap();

        let config = Config::from_directory(&nested)?;
        assert_eq!("https://teizan.example.com/blog/", config.site_root.as_str());
        assert_eq!(dir.path().join("data/mountains.json"), config.store_path);
        assert_eq!(dir.path().join("static_site"), config.output_directory);
        assert_eq!(FeatureLimits { page: 5, card: 2 }, config.features);
        assert_eq!(MissingPrefecture::Error, config.missing_prefecture);
        assert_eq!("div.related", config.affiliate.anchor.to_string());
        assert_eq!("affiliate-section", config.affiliate.marker);
        Ok(())
    }

    #[test]
    fn test_theme_paths_resolve_against_theme_dir() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(PROJECT_FILE),
            "site_root: https://teizan.example.com/\ntheme: theme\n",
        )
        .unwrap();
        std::fs::create_dir(dir.path().join("theme")).unwrap();
        std::fs::write(
            dir.path().join("theme").join("theme.yaml"),
            "mountain: [base.html, mountain.html]\n",
        )
        .unwrap();

        let config = Config::from_directory(dir.path())?;
        assert_eq!(
            vec![
                dir.path().join("theme").join("base.html"),
                dir.path().join("theme").join("mountain.html")
            ],
            config.theme.mountain
        );
        assert!(config.theme.shell.is_empty());
        Ok(())
    }

    #[test]
    fn test_project_not_found() {
        let dir = tempfile::tempdir().unwrap();
        // the temp dir's ancestors are assumed not to hold a project file
        match Config::from_directory(dir.path()) {
            Err(Error::ProjectNotFound(_)) => {}
            other => panic!("unexpected {:?}", other.map(|c| c.project_root)),
        }
    }

    #[test]
    fn test_remote_config_from_lookup() -> Result<()> {
        let env: HashMap<&str, &str> = vec![
            (ENV_HOST, "ftp.example.jp"),
            (ENV_USER, "user"),
            (ENV_PASSWORD, "secret"),
        ]
        .into_iter()
        .collect();
        let remote = RemoteConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()))?;
        assert_eq!(21, remote.port);
        assert_eq!("/", remote.directory);
        assert!(!format!("{:?}", remote).contains("secret"));

        match RemoteConfig::from_lookup(|k| match k {
            ENV_PORT => Some("ftp".to_owned()),
            _ => env.get(k).map(|v| v.to_string()),
        }) {
            Err(Error::InvalidEnv { key, .. }) => assert_eq!(ENV_PORT, key),
            other => panic!("unexpected {:?}", other),
        }
        match RemoteConfig::from_lookup(|k| match k {
            ENV_PASSWORD => None,
            _ => env.get(k).map(|v| v.to_string()),
        }) {
            Err(Error::MissingEnv(key)) => assert_eq!(ENV_PASSWORD, key),
            other => panic!("unexpected {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_remote_directory_is_absolute() -> Result<()> {
        let cases = vec![
            ("as_teizan", "/as_teizan"),
            ("/as_teizan", "/as_teizan"),
            ("", "/"),
            ("public_html/blog/", "/public_html/blog/"),
        ];
        for (input, expected) in cases {
            let remote = RemoteConfig::from_lookup(|k| match k {
                ENV_HOST => Some("ftp.example.jp".to_owned()),
                ENV_USER => Some("user".to_owned()),
                ENV_PASSWORD => Some("secret".to_owned()),
                ENV_DIRECTORY => Some(input.to_owned()),
                _ => None,
            })?;
            assert_eq!(expected, remote.directory, "input {:?}", input);
        }
        Ok(())
    }
}

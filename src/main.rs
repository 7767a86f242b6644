use chrono::{Local, Utc};
use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use std::path::{Path, PathBuf};
use teizan::config::{Config, RemoteConfig};
use teizan::push::{push, FtpRemote};
use teizan::render::{group_by_prefecture, Renderer};
use teizan::store::{read_incoming, Store};
use teizan::sync::{self, Patcher};
use teizan::theme::Theme;
use teizan::write::{self, mountain_page_path, Tally, Writer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let matches = App::new("teizan")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Builds, patches, and publishes the low-mountain hiking site")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("project")
                .long("project")
                .takes_value(true)
                .value_name("DIR")
                .global(true)
                .help("Where to start looking for teizan.yaml (default: current directory)"),
        )
        .subcommand(
            SubCommand::with_name("merge")
                .about("Merges incoming mountain records into the record store")
                .arg(
                    Arg::with_name("incoming")
                        .required(true)
                        .value_name("FILE")
                        .help("JSON file with the incoming records"),
                )
                .arg(
                    Arg::with_name("source")
                        .long("source")
                        .takes_value(true)
                        .value_name("NAME")
                        .help("Source name recorded in the store metadata"),
                ),
        )
        .subcommand(
            SubCommand::with_name("render")
                .about("Renders pages from the record store")
                .arg(
                    Arg::with_name("target")
                        .required(true)
                        .value_name("ID|all")
                        .help("A mountain id, or `all` for every page"),
                ),
        )
        .subcommand(
            SubCommand::with_name("sync-patch")
                .about("Inserts the affiliate block and versions stylesheet links")
                .arg(
                    Arg::with_name("css-version")
                        .long("css-version")
                        .takes_value(true)
                        .value_name("TOKEN")
                        .help("Stylesheet version token (default: current time)"),
                )
                .arg(
                    Arg::with_name("check")
                        .long("check")
                        .help("Only report mountain pages missing the affiliate block"),
                ),
        )
        .subcommand(
            SubCommand::with_name("push")
                .about("Uploads the output directory to the remote host")
                .arg(
                    Arg::with_name("check")
                        .long("check")
                        .help("Only connect, log in, and print the remote directory"),
                ),
        )
        .get_matches();

    let result = load_config(&matches).and_then(|config| match matches.subcommand() {
        ("merge", Some(m)) => merge(&config, m),
        ("render", Some(m)) => render(&config, m),
        ("sync-patch", Some(m)) => sync_patch(&config, m),
        ("push", Some(m)) => push_site(&config, m),
        _ => unreachable!("a subcommand is required"),
    });
    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            error!("{}", err);
            let mut source = err.source();
            while let Some(cause) = source {
                error!("  caused by: {}", cause);
                source = cause.source();
            }
            std::process::exit(1);
        }
    }
}

fn load_config(matches: &ArgMatches) -> Result<Config> {
    let start = match matches.value_of("project") {
        Some(dir) => PathBuf::from(dir),
        None => std::env::current_dir()?,
    };
    let config = Config::from_directory(&start)?;
    info!(project = %config.project_root.display(), "loaded configuration");
    Ok(config)
}

fn merge(config: &Config, matches: &ArgMatches) -> Result<bool> {
    let incoming_path = Path::new(matches.value_of("incoming").unwrap_or_default());
    let source = matches
        .value_of("source")
        .map(str::to_owned)
        .or_else(|| config.default_source.clone())
        .or_else(|| {
            incoming_path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
        });

    let mut store = Store::load(&config.store_path)?;
    let incoming = read_incoming(incoming_path)?;
    let report = store.merge(incoming, source.as_deref(), Utc::now());

    for outcome in &report.outcomes {
        println!("{}", outcome);
    }
    if report.changed() {
        store.save(&config.store_path)?;
    }
    println!(
        "{}; store has {} mountains (version {})",
        report, store.metadata.total_count, store.metadata.version,
    );
    Ok(report.succeeded())
}

fn render(config: &Config, matches: &ArgMatches) -> Result<bool> {
    let store = Store::load(&config.store_path)?;
    let theme = Theme::load(&config.theme)?;
    let renderer = Renderer::new(config, &theme);
    let writer = Writer::new(&renderer, &config.output_directory)?;

    let outcomes = match matches.value_of("target") {
        Some("all") | None => {
            writer.write_all(&store.mountains, store.metadata.last_updated_date())
        }
        Some(id) => match store.get(id) {
            Some(mountain) => {
                // Group pages only exist when grouping the whole store succeeds.
                let groups = group_by_prefecture(&store.mountains, config.missing_prefecture)
                    .unwrap_or_default();
                vec![write::Outcome {
                    item: mountain_page_path(id)
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|_| id.to_owned()),
                    result: writer.write_mountain(mountain, &groups),
                }]
            }
            None => {
                println!("{:<9} {}: no such mountain in the store", "failed", id);
                println!(
                    "{}",
                    Tally {
                        failed: 1,
                        ..Tally::default()
                    }
                );
                return Ok(false);
            }
        },
    };

    for outcome in &outcomes {
        println!("{}", outcome);
    }
    let tally = Tally::of(&outcomes);
    println!("{}", tally);
    Ok(tally.succeeded())
}

fn sync_patch(config: &Config, matches: &ArgMatches) -> Result<bool> {
    let theme = Theme::load(&config.theme)?;
    let renderer = Renderer::new(config, &theme);
    let block = renderer.render_affiliate()?;
    let token = match matches.value_of("css-version") {
        Some(token) => token.to_owned(),
        None => Local::now().format("%Y%m%d%H%M").to_string(),
    };
    let patcher = Patcher {
        output_directory: &config.output_directory,
        marker: &config.affiliate.marker,
        block: &block,
        anchor: &config.affiliate.anchor,
        stylesheet: &config.stylesheet,
        token: &token,
    };

    if matches.is_present("check") {
        let pages = patcher.check();
        for page in &pages {
            println!("{}", page);
        }
        let missing = pages.iter().filter(|p| p.is_missing()).count();
        println!(
            "{} mountain pages: {} with the affiliate block, {} without",
            pages.len(),
            pages.len() - missing,
            missing
        );
        return Ok(missing == 0);
    }

    let outcomes = patcher.patch_tree();
    for outcome in &outcomes {
        println!("{}", outcome);
    }
    let tally = sync::Tally::of(&outcomes);
    println!("{} (css version {})", tally, token);
    Ok(tally.succeeded())
}

fn push_site(config: &Config, matches: &ArgMatches) -> Result<bool> {
    let remote_config = RemoteConfig::from_env(&config.project_root)?;
    let mut remote = FtpRemote::connect(&remote_config)?;

    if matches.is_present("check") {
        println!(
            "connected to {}:{} as {}; remote directory is {}",
            remote_config.host,
            remote_config.port,
            remote_config.user,
            remote.pwd()?
        );
        return Ok(true);
    }

    let report = push(&config.output_directory, &remote_config.directory, &mut remote);
    for path in &report.uploaded {
        println!("{:<9} {}", "uploaded", path.display());
    }
    for (path, err) in &report.failed {
        println!("{:<9} {}: {}", "failed", path.display(), err);
    }
    println!("{}", report);
    Ok(report.succeeded())
}

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use recuento::calls_file;
use recuento::cli::{Cli, OutputFormat};
use recuento::config::{CALLS_FILE_NAME, MAPS_FILE_NAME};
use recuento::maps_file::AddressMap;
use recuento::report::{build_report, SymbolResolver};

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Locate the calls file and maps snapshot from the positional argument:
/// a session directory uses the standard layout, a plain file is taken as
/// the calls stream with an optional sibling `maps`.
fn resolve_paths(cli: &Cli) -> (PathBuf, Option<PathBuf>) {
    let session = &cli.session;
    let (calls, default_maps) = if session.is_dir() {
        (session.join(CALLS_FILE_NAME), session.join(MAPS_FILE_NAME))
    } else {
        let sibling = session
            .parent()
            .map(|p| p.join(MAPS_FILE_NAME))
            .unwrap_or_else(|| PathBuf::from(MAPS_FILE_NAME));
        (session.clone(), sibling)
    };
    let maps = cli.maps.clone().or_else(|| default_maps.exists().then_some(default_maps));
    (calls, maps)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let (calls_path, maps_path) = resolve_paths(&cli);

    let records = calls_file::read_calls_file(&calls_path, cli.addr_width.map(Into::into))
        .with_context(|| format!("reading {}", calls_path.display()))?;

    let map = match &maps_path {
        Some(path) => Some(
            AddressMap::load(path).with_context(|| format!("parsing {}", path.display()))?,
        ),
        None => {
            tracing::debug!("no maps snapshot found, printing raw addresses");
            None
        }
    };

    let mut resolver = SymbolResolver::new(!cli.no_demangle);
    let report = build_report(&records, map.as_ref(), &mut resolver, cli.limit);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match cli.format {
        OutputFormat::Text => report.write_text(&mut out)?,
        OutputFormat::Json => report.write_json(&mut out)?,
    }
    out.flush()?;
    Ok(())
}

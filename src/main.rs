//! mdpaper - render, pack and inspect markdown documents for print.
//!
//! # Usage
//!
//! ```bash
//! mdpaper notes.md                      # sanitized HTML fragment to stdout
//! mdpaper notes.md -o notes.html        # printable standalone HTML
//! mdpaper notes.md --image fig.png -o notes.mp
//! mdpaper notes.mp --list-images
//! mdpaper --watch notes.md -o notes.html
//! ```

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;

use mdpaper::bundle::{self, is_bundle_path};
use mdpaper::config::{
    ConfigFlags, clear_config_flags, global_config_path, load_config_flags, local_override_path,
    parse_flag_tokens, save_config_flags,
};
use mdpaper::document::{FsStorage, Session};
use mdpaper::perf;
use mdpaper::print::{PaperSize, PrintSettings};
use mdpaper::style::Font;
use mdpaper::watcher::{DEFAULT_DEBOUNCE, SourceWatcher};

/// Render markdown to print-ready HTML and pack it with its images
#[derive(Parser, Debug)]
#[command(name = "mdpaper", version, about, long_about = None)]
struct Cli {
    /// Markdown (.md) or bundle (.mp) file to read
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Output file; the extension picks the format (.html, .mp, .md)
    #[arg(short, long, value_name = "OUT")]
    output: Option<PathBuf>,

    /// Embed an image and append a reference to it (repeatable)
    #[arg(long = "image", value_name = "PATH")]
    images: Vec<PathBuf>,

    /// List the images stored in a bundle and exit
    #[arg(long)]
    list_images: bool,

    /// Paper size for printable HTML
    #[arg(long, value_enum)]
    paper: Option<PaperSize>,

    /// Set the document font
    #[arg(long, value_enum)]
    font: Option<Font>,

    /// Set the document font size in points (8-72)
    #[arg(long, value_name = "PT")]
    font_size: Option<u32>,

    /// Watch the file and write the output again on every change
    #[arg(short, long)]
    watch: bool,

    /// Enable performance logging
    #[arg(long)]
    perf: bool,

    /// Write detailed render/bundle debug events to a file
    #[arg(long, value_name = "PATH")]
    render_debug_log: Option<PathBuf>,

    /// Save current command-line flags as defaults
    #[arg(long)]
    save: bool,

    /// Clear saved defaults
    #[arg(long)]
    clear: bool,
}

fn list_images(path: &Path) -> Result<()> {
    if !is_bundle_path(path) {
        println!("{} is plain markdown and holds no images", path.display());
        return Ok(());
    }
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let decoded = bundle::decode(&bytes).with_context(|| format!("Failed to decode {}", path.display()))?;
    println!(
        "version {} (last modified {})",
        decoded.metadata.version,
        decoded.metadata.last_modified.to_rfc3339()
    );
    for image in &decoded.images {
        println!("{}\t{} bytes", image.name, image.bytes.len());
    }
    for name in &decoded.missing_images {
        println!("{name}\tmissing");
    }
    Ok(())
}

fn build_session(cli: &Cli) -> Result<Session> {
    let mut session = Session::new();
    let outcome = session
        .open(&cli.file, &FsStorage)
        .with_context(|| format!("Failed to open {}", cli.file.display()))?;
    for name in &outcome.missing_images {
        eprintln!("[warn] {name} is listed in the bundle but missing");
    }

    if !cli.images.is_empty() {
        let mut text = session.markdown().to_string();
        for path in &cli.images {
            let bytes = fs::read(path).with_context(|| format!("Failed to read image {}", path.display()))?;
            let suggested = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let insertion = session.add_image(bytes, &suggested)?;
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&insertion.markup);
            text.push('\n');
        }
        session.edit(text)?;
    }
    if let Some(font) = cli.font {
        session.set_font_family(font.family())?;
    }
    if let Some(size) = cli.font_size {
        session.set_font_size(size)?;
    }
    Ok(session)
}

fn write_output(session: &mut Session, output: Option<&Path>, paper: PaperSize) -> Result<()> {
    let Some(output) = output else {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(session.html().as_bytes())?;
        return stdout.flush().context("Failed to write to stdout");
    };

    let is_html = output
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("html") || ext.eq_ignore_ascii_case("htm"));
    if is_html {
        let html = session.printable_html(&PrintSettings::with_paper(paper))?;
        fs::write(output, html).with_context(|| format!("Failed to write {}", output.display()))?;
    } else {
        session
            .save(output, &mut FsStorage)
            .with_context(|| format!("Failed to write {}", output.display()))?;
    }
    Ok(())
}

fn run_once(cli: &Cli, paper: PaperSize) -> Result<()> {
    let _scope = perf::scope("cli.run");
    let mut session = build_session(cli)?;
    write_output(&mut session, cli.output.as_deref(), paper)
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let raw_args = std::env::args().collect::<Vec<_>>();
    let cli = Cli::parse();
    let global_path = global_config_path();
    let local_path = local_override_path();
    let cli_flags = parse_flag_tokens(&raw_args);

    if cli.clear {
        clear_config_flags(&global_path)?;
    }
    if cli.save {
        save_config_flags(&global_path, &cli_flags)?;
    }

    let file_flags = if cli.clear {
        ConfigFlags::default()
    } else {
        let global_flags = load_config_flags(&global_path)?;
        let local_flags = load_config_flags(&local_path)?;
        global_flags.union(&local_flags)
    };
    let effective = file_flags.union(&cli_flags);

    perf::set_enabled(effective.perf);
    let render_debug_log_path = effective
        .render_debug_log
        .clone()
        .or_else(|| std::env::var_os(perf::DEBUG_LOG_ENV).map(PathBuf::from));
    if let Err(err) = perf::set_debug_log_path(render_debug_log_path.as_deref()) {
        eprintln!(
            "[warn] Failed to initialize render debug log {}: {}",
            render_debug_log_path
                .as_ref()
                .map_or_else(|| "<unset>".to_string(), |p| p.display().to_string()),
            err
        );
    }

    if !cli.file.exists() {
        anyhow::bail!("File not found: {}", cli.file.display());
    }

    if cli.list_images {
        return list_images(&cli.file);
    }

    let paper = effective.paper.unwrap_or_default();
    run_once(&cli, paper)?;
    if !effective.watch {
        return Ok(());
    }

    let mut watcher = SourceWatcher::new(&cli.file, DEFAULT_DEBOUNCE)
        .with_context(|| format!("Failed to watch {}", cli.file.display()))?;
    eprintln!("Watching {} (Ctrl-C to stop)", watcher.source().display());
    loop {
        watcher.wait_for_change(None);
        match run_once(&cli, paper) {
            Ok(()) => eprintln!("Updated from {}", cli.file.display()),
            Err(err) => eprintln!("[error] {err:#}"),
        }
    }
}

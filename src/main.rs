use std::ffi::OsString;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use log::LevelFilter;
use memmap2::Mmap;

use pyinst_extractor::{ExtractOptions, ExtractionReport, FsSink, PyInstArchive, Sink, ZipSink};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "pyinst-extractor", version, about = "Extract the contents of a PyInstaller generated executable")]
struct Args {
    /// PyInstaller generated executable.
    input: PathBuf,

    /// Output directory. Default: <INPUT>_extracted
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write a single <OUTPUT>.zip instead of a directory tree.
    #[arg(long, conflicts_with = "list")]
    zip: bool,

    /// Print the table of contents and exit.
    #[arg(short, long)]
    list: bool,

    /// Keep PYZ archives packed.
    #[arg(long)]
    no_pyz: bool,

    /// Decompress entries on the calling thread only.
    #[arg(long)]
    single_thread: bool,

    /// More output, repeat for trace level.
    #[arg(short, long, action = clap::ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,

    /// Only report warnings and errors.
    #[arg(short, long)]
    quiet: bool,
}

fn init_logger(args: &Args) {
    let level = match (args.quiet, args.verbose) {
        (true, _) => LevelFilter::Warn,
        (false, 0) => LevelFilter::Info,
        (false, 1) => LevelFilter::Debug,
        (false, _) => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .format_target(false)
        .format_timestamp(None)
        .parse_default_env()
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(&args);

    let file = File::open(&args.input).with_context(|| format!("open {}", args.input.display()))?;
    // SAFETY: the file is only read, and is not expected to change while mapped.
    let data = unsafe { Mmap::map(&file) }.with_context(|| format!("map {}", args.input.display()))?;

    log::info!("Processing {}", args.input.display());
    let archive = PyInstArchive::parse(&data)
        .with_context(|| format!("{} is not a pyinstaller archive", args.input.display()))?;

    if args.list {
        list(&archive);
        return Ok(());
    }

    let options = ExtractOptions::default()
        .parallel(!args.single_thread)
        .extract_pyz(!args.no_pyz);
    let output = args.output.clone().unwrap_or_else(|| default_output(&args.input));

    let report = if args.zip {
        let mut zip_path = OsString::from(output.as_os_str());
        zip_path.push(".zip");
        let zip_path = PathBuf::from(zip_path);

        let mut sink = ZipSink::new();
        let report = run(&archive, &mut sink, &options)?;
        let bytes = sink.finish().context("finish zip archive")?;
        fs::write(&zip_path, bytes).with_context(|| format!("write {}", zip_path.display()))?;
        log::info!("Wrote {}", zip_path.display());
        report
    } else {
        let mut sink =
            FsSink::new(&output).with_context(|| format!("create {}", output.display()))?;
        run(&archive, &mut sink, &options)?
    };

    log::info!("Successfully extracted pyinstaller archive: {}", args.input.display());
    log::info!("You can now use a python decompiler on the pyc files within the extracted directory");
    if !report.warnings.is_empty() {
        log::warn!("{} warning(s) during extraction", report.warnings.len());
    }
    Ok(())
}

fn run(archive: &PyInstArchive<'_>, sink: &mut dyn Sink, options: &ExtractOptions) -> Result<ExtractionReport> {
    let report = archive.extract(sink, options).context("extraction failed")?;
    log::info!(
        "Wrote {} files, skipped {} entries",
        report.files_written,
        report.entries_skipped
    );
    Ok(report)
}

fn default_output(input: &Path) -> PathBuf {
    let mut name = OsString::from(input.as_os_str());
    name.push("_extracted");
    PathBuf::from(name)
}

fn list(archive: &PyInstArchive<'_>) {
    let info = &archive.info;
    println!("PyInstaller {}, Python {}", info.version, info.python);
    if let Some(lib) = info.cookie.lib_name() {
        println!("Library: {lib}");
    }
    println!(
        "Overlay at {:#X}, {} bytes; TOC at {:#X}, {} bytes",
        info.geometry.overlay_position, info.geometry.overlay_size, info.geometry.toc_position, info.geometry.toc_size
    );
    println!("{:>10} {:>10} {:>10} C T Name", "Position", "Stored", "Size");
    for entry in &archive.toc {
        println!("{entry}");
    }
}

//! Entry extraction.
//!
//! Extraction runs in two phases. The first decompresses and classifies every
//! TOC entry (in parallel when enabled) and produces a list of steps without
//! touching the sink. The second walks those steps in TOC order, settles the
//! pyc magic, completes the headers of bare code objects and performs every
//! write. Which entry happens to carry the magic therefore never influences
//! what ends up in a file.

use std::borrow::Cow;
use std::collections::HashSet;

use rayon::prelude::*;

use crate::archive::PyInstArchive;
use crate::config::ExtractOptions;
use crate::error::{FormatError, Result, Warning};
use crate::inflate::zlib_inflate;
use crate::path::{OutputPath, module_path};
use crate::pyc::{HeaderState, MagicOrigin, Observed, PycMagic, has_pyc_header, pyc_header};
use crate::pyz::PyzArchive;
use crate::sink::Sink;
use crate::toc::{EntryKind, TocEntry};

/// Summary of an extraction run.
#[derive(Debug, Default)]
pub struct ExtractionReport {
    pub files_written: usize,
    /// Dependency and runtime option entries, which are not files.
    pub entries_skipped: usize,
    /// Magic used for reconstructed headers, if one was found.
    pub pyc_magic: Option<PycMagic>,
    pub warnings: Vec<Warning>,
}

struct PlannedFile<'a> {
    path: OutputPath,
    content: Cow<'a, [u8]>,
    /// Needs a reconstructed pyc header.
    bare_pyc: bool,
}

enum Step<'a> {
    Dir(OutputPath),
    File(PlannedFile<'a>),
    Magic {
        magic: PycMagic,
        origin: MagicOrigin,
        source: String,
    },
}

#[derive(Default)]
struct EntryPlan<'a> {
    steps: Vec<Step<'a>>,
    warnings: Vec<Warning>,
    skipped: bool,
}

impl<'a> EntryPlan<'a> {
    fn warn(&mut self, warning: Warning) {
        log::warn!("{warning}");
        self.warnings.push(warning);
    }

    fn file(&mut self, path: OutputPath, content: Cow<'a, [u8]>, bare_pyc: bool) {
        self.steps.push(Step::File(PlannedFile {
            path,
            content,
            bare_pyc,
        }));
    }

    /// Like [`EntryPlan::file`] for a CArchive name, which still needs sanitizing.
    fn named_file(&mut self, name: &str, content: Cow<'a, [u8]>, bare_pyc: bool) {
        match OutputPath::parse(name) {
            Some(path) => self.file(path, content, bare_pyc),
            None => self.warn(Warning::UnsafePath(name.to_string())),
        }
    }

    fn magic(&mut self, magic: PycMagic, origin: MagicOrigin, source: &str) {
        self.steps.push(Step::Magic {
            magic,
            origin,
            source: source.to_string(),
        });
    }

    fn append(&mut self, other: EntryPlan<'a>) {
        self.steps.extend(other.steps);
        self.warnings.extend(other.warnings);
    }
}

/// Decompresses `entry` and decides what to write for it.
fn plan_entry<'a>(
    archive: &PyInstArchive<'a>,
    entry: &TocEntry,
    options: &ExtractOptions,
) -> Result<EntryPlan<'a>, FormatError> {
    let mut plan = EntryPlan::default();
    let name = entry.name.as_str();
    let stored = archive.entry_data(entry);

    let data: Cow<'a, [u8]> = if entry.is_compressed() {
        match zlib_inflate(stored, entry.uncompressed_size as usize) {
            Ok(bytes) => {
                if bytes.len() != entry.uncompressed_size as usize {
                    plan.warn(Warning::SizeMismatch {
                        name: name.to_string(),
                        declared: entry.uncompressed_size,
                        actual: bytes.len(),
                    });
                }
                Cow::Owned(bytes)
            }
            Err(_) => {
                plan.warn(Warning::Decompress(name.to_string()));
                plan.named_file(name, Cow::Borrowed(stored), false);
                return Ok(plan);
            }
        }
    } else {
        Cow::Borrowed(stored)
    };

    match entry.kind() {
        EntryKind::Dependency | EntryKind::RuntimeOption => {
            log::debug!("Skipping {name}, not a file");
            plan.skipped = true;
        }
        EntryKind::PySource => {
            log::info!("Possible entry point: {name}.pyc");
            plan.named_file(&format!("{name}.pyc"), data, true);
        }
        EntryKind::PyModule | EntryKind::PyPackage => {
            // PyInstaller 5.3+ no longer keeps the header of modules
            if has_pyc_header(&data) {
                let mut magic = [0u8; 4];
                magic.copy_from_slice(&data[..4]);
                plan.magic(magic, MagicOrigin::Module, name);
                plan.named_file(&format!("{name}.pyc"), data, false);
            } else {
                plan.named_file(&format!("{name}.pyc"), data, true);
            }
        }
        EntryKind::Pyz => {
            let members = if options.extract_pyz {
                Some(plan_pyz(name, &data)?)
            } else {
                None
            };
            plan.named_file(name, data, false);
            if let Some(members) = members {
                plan.append(members);
            }
        }
        EntryKind::Data(_) => plan.named_file(name, data, false),
    }

    Ok(plan)
}

/// Plans the members of a PYZ archive into `<name>_extracted/`.
fn plan_pyz(name: &str, data: &[u8]) -> Result<EntryPlan<'static>, FormatError> {
    let pyz = PyzArchive::parse(data, name)?;
    let mut plan = EntryPlan::default();

    if !pyz.magic_ok {
        plan.warn(Warning::PyzMagic(name.to_string()));
    }
    plan.magic(pyz.pyc_magic, MagicOrigin::Pyz, name);
    log::info!("Found {} files in PYZArchive {name}", pyz.entries.len());

    let dir_name = format!("{name}_extracted");
    let Some(dir) = OutputPath::parse(&dir_name) else {
        plan.warn(Warning::UnsafePath(dir_name));
        return Ok(plan);
    };
    plan.steps.push(Step::Dir(dir.clone()));

    for member in &pyz.entries {
        let Some(path) = dir.join(&module_path(&member.name, member.is_package)) else {
            plan.warn(Warning::UnsafePath(member.name.clone()));
            continue;
        };
        let Some(stored) = pyz.member_bytes(member) else {
            plan.warn(Warning::PyzMemberOutOfBounds {
                pyz: name.to_string(),
                name: member.name.clone(),
            });
            continue;
        };

        match zlib_inflate(stored, 0) {
            Ok(code) => plan.file(path, Cow::Owned(code), true),
            Err(_) => {
                plan.warn(Warning::Encrypted(path.to_string()));
                plan.file(path.with_suffix(".encrypted"), Cow::Owned(stored.to_vec()), false);
            }
        }
    }

    Ok(plan)
}

enum Output<'a> {
    Dir(OutputPath),
    File {
        path: OutputPath,
        header: Vec<u8>,
        content: Cow<'a, [u8]>,
    },
}

/// Paths claimed so far. A file never replaces a directory and nothing is
/// placed below a file. Writing the same file twice is allowed, the last write
/// wins.
#[derive(Default)]
struct Layout {
    files: HashSet<OutputPath>,
    dirs: HashSet<OutputPath>,
}

impl Layout {
    fn below_file(&self, path: &OutputPath) -> bool {
        path.ancestors().any(|dir| self.files.contains(&dir))
    }

    fn claim_dir(&mut self, path: &OutputPath) -> bool {
        if self.files.contains(path) || self.below_file(path) {
            return false;
        }
        self.dirs.extend(path.ancestors());
        self.dirs.insert(path.clone());
        true
    }

    fn claim_file(&mut self, path: &OutputPath) -> bool {
        if self.dirs.contains(path) || self.below_file(path) {
            return false;
        }
        self.dirs.extend(path.ancestors());
        self.files.insert(path.clone());
        true
    }
}

fn conflict(path: &OutputPath, warnings: &mut Vec<Warning>) {
    let warning = Warning::PathConflict(path.to_string());
    log::warn!("{warning}");
    warnings.push(warning);
}

/// Runs both phases against `sink`.
pub fn extract(
    archive: &PyInstArchive<'_>,
    sink: &mut dyn Sink,
    options: &ExtractOptions,
) -> Result<ExtractionReport> {
    log::info!("Beginning extraction...please standby");

    let plans: Vec<EntryPlan<'_>> = if options.parallel {
        archive
            .toc
            .par_iter()
            .map(|entry| plan_entry(archive, entry, options))
            .collect::<Result<_, _>>()?
    } else {
        archive
            .toc
            .iter()
            .map(|entry| plan_entry(archive, entry, options))
            .collect::<Result<_, _>>()?
    };

    let mut report = ExtractionReport {
        warnings: archive.warnings.clone(),
        ..ExtractionReport::default()
    };
    let mut headers = HeaderState::new(archive.python_version());
    let mut outputs: Vec<Output<'_>> = Vec::new();
    let mut layout = Layout::default();

    for plan in plans {
        report.warnings.extend(plan.warnings);
        if plan.skipped {
            report.entries_skipped += 1;
        }

        for step in plan.steps {
            match step {
                Step::Dir(path) => {
                    if layout.claim_dir(&path) {
                        outputs.push(Output::Dir(path));
                    } else {
                        conflict(&path, &mut report.warnings);
                    }
                }
                Step::Magic {
                    magic,
                    origin,
                    source,
                } => match headers.observe(magic, origin) {
                    Observed::Captured(pending) => {
                        log::debug!("Captured pyc magic {magic:02x?} from {source}");
                        for index in pending {
                            if let Some(Output::File { header, .. }) = outputs.get_mut(index) {
                                *header = headers.header(magic);
                            }
                        }
                    }
                    Observed::Replaced { previous } => {
                        let warning = Warning::PycMagicConflict(source);
                        log::warn!("{warning} ({previous:02x?} -> {magic:02x?})");
                        report.warnings.push(warning);
                    }
                    Observed::Unchanged => {}
                },
                Step::File(file) => {
                    if !layout.claim_file(&file.path) {
                        conflict(&file.path, &mut report.warnings);
                        continue;
                    }
                    let header = if file.bare_pyc {
                        headers.header_or_defer(outputs.len()).unwrap_or_default()
                    } else {
                        Vec::new()
                    };
                    outputs.push(Output::File {
                        path: file.path,
                        header,
                        content: file.content,
                    });
                }
            }
        }
    }

    report.pyc_magic = headers.magic();
    let python = archive.python_version();
    let pending = headers.into_pending();
    if !pending.is_empty() {
        let warning = Warning::MissingPycMagic(pending.len());
        log::warn!("{warning}");
        report.warnings.push(warning);
        for index in pending {
            if let Some(Output::File { header, .. }) = outputs.get_mut(index) {
                *header = pyc_header([0; 4], python);
            }
        }
    }

    for output in &outputs {
        match output {
            Output::Dir(path) => sink.ensure_dir(path)?,
            Output::File {
                path,
                header,
                content,
            } => {
                log::debug!("Writing {path}");
                sink.write_file(path, &[&header[..], &content[..]])?;
                report.files_written += 1;
            }
        }
    }

    Ok(report)
}

//! Extracts the embedded archive of PyInstaller-built executables.
//!
//! The executable is mapped as a whole, the cookie at the end of the PyInstaller
//! overlay is located, and the table of contents is read from it. Every entry
//! is then written to a [`Sink`], with `.pyc` headers restored for code
//! objects PyInstaller stored without one. PYZ archives are unpacked as well.
//!
//! ```no_run
//! use pyinst_extractor::{ExtractOptions, FsSink, PyInstArchive};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let data = std::fs::read("app.exe")?;
//! let archive = PyInstArchive::parse(&data)?;
//! let mut sink = FsSink::new("app.exe_extracted")?;
//! let report = archive.extract(&mut sink, &ExtractOptions::default())?;
//! println!("{} files", report.files_written);
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod config;
pub mod cookie;
pub mod error;
pub mod extract;
pub mod inflate;
pub mod marshal;
pub mod names;
pub mod path;
pub mod pyc;
pub mod pyz;
pub mod sink;
pub mod toc;

pub use archive::PyInstArchive;
pub use config::ExtractOptions;
pub use cookie::{ArchiveGeometry, ArchiveInfo, PyInstVersion, PythonVersion};
pub use error::{Error, FormatError, MarshalError, Result, Warning};
pub use extract::ExtractionReport;
pub use names::{SequentialNames, UniqueNameGenerator, UuidNames};
pub use path::OutputPath;
pub use sink::{FsSink, MemorySink, Sink, ZipSink};
pub use toc::{EntryKind, TocEntry};

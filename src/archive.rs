use crate::config::ExtractOptions;
use crate::cookie::{ArchiveInfo, PythonVersion};
use crate::error::{FormatError, Result, Warning};
use crate::extract::{self, ExtractionReport};
use crate::names::{UniqueNameGenerator, UuidNames};
use crate::sink::Sink;
use crate::toc::{self, TocEntry};

/// A parsed PyInstaller CArchive over the bytes of the whole executable.
#[derive(Debug)]
pub struct PyInstArchive<'a> {
    data: &'a [u8],
    pub info: ArchiveInfo,
    pub toc: Vec<TocEntry>,
    /// Problems found while reading the table of contents.
    pub warnings: Vec<Warning>,
}

impl<'a> PyInstArchive<'a> {
    /// Locates the cookie and reads the table of contents. Unnamed entries
    /// get random UUID names.
    pub fn parse(data: &'a [u8]) -> Result<Self, FormatError> {
        Self::parse_with_names(data, &mut UuidNames)
    }

    pub fn parse_with_names(
        data: &'a [u8],
        names: &mut dyn UniqueNameGenerator,
    ) -> Result<Self, FormatError> {
        let info = ArchiveInfo::parse(data)?;
        let mut warnings = Vec::new();
        let toc = toc::parse_toc(data, &info.geometry, names, &mut warnings)?;

        Ok(Self {
            data,
            info,
            toc,
            warnings,
        })
    }

    /// Assembles an archive from an already decoded cookie and TOC.
    pub fn from_parts(data: &'a [u8], info: ArchiveInfo, toc: Vec<TocEntry>) -> Self {
        Self {
            data,
            info,
            toc,
            warnings: Vec::new(),
        }
    }

    pub fn python_version(&self) -> PythonVersion {
        self.info.python
    }

    /// Stored bytes of `entry`.
    ///
    /// Ranges of this archive's own entries were checked by the TOC parser;
    /// a foreign entry that does not fit yields an empty slice.
    pub fn entry_data(&self, entry: &TocEntry) -> &'a [u8] {
        let range = entry.data_range(&self.info.geometry);
        self.data
            .get(range.start as usize..range.end as usize)
            .unwrap_or_default()
    }

    /// Extracts every entry into `sink`.
    pub fn extract(&self, sink: &mut dyn Sink, options: &ExtractOptions) -> Result<ExtractionReport> {
        extract::extract(self, sink, options)
    }
}

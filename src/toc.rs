//! CArchive table of contents.

use std::fmt;
use std::io::Cursor;

use binrw::BinRead;

use crate::cookie::ArchiveGeometry;
use crate::error::{FormatError, Warning};
use crate::names::UniqueNameGenerator;

/// Size of the fixed part of a TOC record.
pub const TOC_ENTRY_HEADER_SIZE: usize = 18;

/// What a TOC entry holds, from its one byte type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// `d`: dependency on another archive, not a file.
    Dependency,
    /// `o`: runtime option, not a file.
    RuntimeOption,
    /// `s`: entry point script, stored as a header-less code object.
    PySource,
    /// `m`
    PyModule,
    /// `M`
    PyPackage,
    /// `z` / `Z`
    Pyz,
    /// Anything else is written as is.
    Data(u8),
}

impl EntryKind {
    pub fn from_code(code: u8) -> Self {
        match code {
            b'd' => EntryKind::Dependency,
            b'o' => EntryKind::RuntimeOption,
            b's' => EntryKind::PySource,
            b'm' => EntryKind::PyModule,
            b'M' => EntryKind::PyPackage,
            b'z' | b'Z' => EntryKind::Pyz,
            other => EntryKind::Data(other),
        }
    }
}

#[derive(BinRead, Debug, Clone, Copy)]
#[br(big)]
struct TocEntryHeader {
    entry_size: u32,
    entry_position: u32,
    data_size: u32,
    uncompressed_size: u32,
    compression_flag: u8,
    type_code: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    /// Record length, header plus name.
    pub entry_size: u32,
    /// Offset of the data relative to the overlay start.
    pub entry_position: u32,
    pub data_size: u32,
    pub uncompressed_size: u32,
    pub compression_flag: u8,
    pub type_code: u8,
    pub name: String,
}

impl TocEntry {
    pub fn is_compressed(&self) -> bool {
        self.compression_flag == 1
    }

    pub fn kind(&self) -> EntryKind {
        EntryKind::from_code(self.type_code)
    }

    /// Absolute byte range of the entry data.
    pub fn data_range(&self, geometry: &ArchiveGeometry) -> std::ops::Range<u64> {
        let start = geometry.overlay_position + u64::from(self.entry_position);
        start..start + u64::from(self.data_size)
    }
}

impl fmt::Display for TocEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>10} {:>10} {:>10} {} {} {}",
            self.entry_position,
            self.data_size,
            self.uncompressed_size,
            if self.is_compressed() { 'z' } else { '-' },
            char::from(self.type_code),
            self.name
        )
    }
}

/// Walks the TOC records. Their lengths must add up to exactly `toc_size`,
/// and every entry's data must lie inside the file.
pub fn parse_toc(
    data: &[u8],
    geometry: &ArchiveGeometry,
    names: &mut dyn UniqueNameGenerator,
    warnings: &mut Vec<Warning>,
) -> Result<Vec<TocEntry>, FormatError> {
    let toc_start = geometry.toc_position as usize;
    let toc_end = toc_start + geometry.toc_size as usize;
    let toc = data
        .get(toc_start..toc_end)
        .ok_or(FormatError::Geometry("table of contents extends past end of file"))?;

    let mut entries = Vec::new();
    let mut consumed: u64 = 0;

    while consumed < geometry.toc_size {
        let offset = geometry.toc_position + consumed;
        let record = &toc[consumed as usize..];

        let header = TocEntryHeader::read_be(&mut Cursor::new(record))
            .map_err(|source| FormatError::TocEntry { offset, source })?;

        let length = header.entry_size as usize;
        if length < TOC_ENTRY_HEADER_SIZE {
            return Err(FormatError::TocRecordTooShort {
                offset,
                length: header.entry_size,
                min: TOC_ENTRY_HEADER_SIZE,
            });
        }
        if length > record.len() {
            return Err(FormatError::TocOverrun {
                offset,
                consumed,
                length: header.entry_size,
                size: geometry.toc_size,
            });
        }

        let name_bytes = &record[TOC_ENTRY_HEADER_SIZE..length];
        let end = name_bytes
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |i| i + 1);
        let name = if end == 0 {
            let generated = names.unique_name();
            log::warn!("Found an unnamed file in CArchive. Using random name {generated}");
            warnings.push(Warning::UnnamedEntry(generated.clone()));
            generated
        } else {
            String::from_utf8_lossy(&name_bytes[..end]).into_owned()
        };

        let entry = TocEntry {
            entry_size: header.entry_size,
            entry_position: header.entry_position,
            data_size: header.data_size,
            uncompressed_size: header.uncompressed_size,
            compression_flag: header.compression_flag,
            type_code: header.type_code,
            name,
        };

        if entry.data_range(geometry).end > geometry.file_size {
            return Err(FormatError::EntryOutOfBounds { name: entry.name });
        }

        log::debug!("{entry}");
        entries.push(entry);
        consumed += u64::from(header.entry_size);
    }

    log::info!("Found {} files in CArchive", entries.len());
    Ok(entries)
}

//! PYZ archives: the zlib-compressed module store PyInstaller embeds as one
//! CArchive member.
//!
//! # Structure on Disk
//!
//! | Offset | Type      | Description                                      |
//! |--------|-----------|--------------------------------------------------|
//! | 0      | `[u8; 4]` | Magic: `PYZ\0`                                   |
//! | 4      | `[u8; 4]` | pyc magic of the bundled interpreter             |
//! | 8      | `u32` BE  | Offset of the marshalled index                   |
//! | ...    | `[u8]`    | zlib-compressed code objects                     |
//!
//! The index is a list of `(name, (ispkg, offset, length))` records.

use std::io::Cursor;

use binrw::BinRead;

use crate::error::FormatError;
use crate::marshal::{Object, Unmarshaler};
use crate::pyc::PycMagic;

pub const PYZ_MAGIC: [u8; 4] = *b"PYZ\0";
pub const PYZ_HEADER_SIZE: usize = 12;

#[derive(BinRead, Debug, Clone, Copy)]
#[br(big)]
struct PyzHeader {
    magic: [u8; 4],
    pyc_magic: [u8; 4],
    toc_offset: u32,
}

/// One module stored in a PYZ archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PyzEntry {
    pub name: String,
    pub is_package: bool,
    pub offset: i32,
    pub length: i32,
}

#[derive(Debug)]
pub struct PyzArchive<'a> {
    data: &'a [u8],
    pub magic_ok: bool,
    pub pyc_magic: PycMagic,
    pub entries: Vec<PyzEntry>,
}

impl<'a> PyzArchive<'a> {
    /// Reads the header and index. `name` is only used in errors.
    pub fn parse(data: &'a [u8], name: &str) -> Result<Self, FormatError> {
        let header = PyzHeader::read_be(&mut Cursor::new(data)).map_err(|_| FormatError::PyzHeader {
            name: name.to_string(),
        })?;

        let index_offset = header.toc_offset as usize;
        if index_offset >= data.len() {
            return Err(FormatError::PyzIndexOffset {
                name: name.to_string(),
                offset: header.toc_offset,
                len: data.len(),
            });
        }

        let index = Unmarshaler::at(data, index_offset)
            .read_object()
            .map_err(|source| FormatError::Marshal {
                name: name.to_string(),
                source,
            })?;
        let entries = index_entries(&index).map_err(|reason| FormatError::PyzIndex {
            name: name.to_string(),
            reason,
        })?;

        Ok(Self {
            data,
            magic_ok: header.magic == PYZ_MAGIC,
            pyc_magic: header.pyc_magic,
            entries,
        })
    }

    /// Stored (compressed) bytes of `entry`, if its range lies inside the archive.
    pub fn member_bytes(&self, entry: &PyzEntry) -> Option<&'a [u8]> {
        let start = usize::try_from(entry.offset).ok()?;
        let len = usize::try_from(entry.length).ok()?;
        self.data.get(start..start.checked_add(len)?)
    }
}

fn index_entries(index: &Object) -> Result<Vec<PyzEntry>, String> {
    let records = index
        .as_seq()
        .ok_or_else(|| "index is not a list".to_string())?;

    records
        .iter()
        .enumerate()
        .map(|(i, record)| index_entry(record).map_err(|reason| format!("record {i}: {reason}")))
        .collect()
}

fn index_entry(record: &Object) -> Result<PyzEntry, &'static str> {
    let fields = record.as_seq().ok_or("not a tuple")?;
    if !(2..=3).contains(&fields.len()) {
        return Err("expected 2 or 3 fields");
    }

    let name = fields[0].as_bytes().ok_or("name is not a string")?;
    let location = fields[1].as_seq().ok_or("location is not a tuple")?;
    let [kind, offset, length] = location else {
        return Err("location is not a triple");
    };

    Ok(PyzEntry {
        name: String::from_utf8_lossy(name).into_owned(),
        is_package: kind.as_int().ok_or("ispkg is not an int")? == 1,
        offset: offset.as_int().ok_or("offset is not an int")?,
        length: length.as_int().ok_or("length is not an int")?,
    })
}

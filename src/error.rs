use std::io;

use thiserror::Error;

/// Failures while decoding the marshal object stream of a PYZ index.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarshalError {
    #[error("unexpected end of data at offset {offset:#x} (needed {needed} bytes)")]
    UnexpectedEof { offset: usize, needed: usize },

    #[error("unsupported marshal type {tag:#04x} ({printable:?}) at offset {offset:#x}")]
    UnknownType {
        tag: u8,
        printable: char,
        offset: usize,
    },

    #[error("negative length {length} at offset {offset:#x}")]
    NegativeLength { length: i32, offset: usize },

    #[error("back-reference {index} out of bounds (table holds {len} objects)")]
    BadReference { index: i32, len: usize },

    #[error("invalid float literal at offset {offset:#x}")]
    InvalidFloat { offset: usize },

    #[error("object nesting exceeds {0} levels")]
    TooDeep(usize),
}

/// Structural problems that make the rest of the archive unreadable.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("file is too short or truncated ({0} bytes)")]
    FileTooShort(u64),

    #[error("missing cookie, unsupported pyinstaller version or not a pyinstaller archive")]
    CookieNotFound,

    #[error("cookie at {position:#x} is truncated")]
    CookieTruncated { position: u64 },

    #[error("failed to decode cookie: {0}")]
    Cookie(#[source] binrw::Error),

    #[error("archive geometry out of bounds: {0}")]
    Geometry(&'static str),

    #[error("table of contents entry at {offset:#x} has record length {length}, below the {min} byte header")]
    TocRecordTooShort { offset: u64, length: u32, min: usize },

    #[error("table of contents entry at {offset:#x} runs past the end of the table ({consumed} + {length} > {size})")]
    TocOverrun {
        offset: u64,
        consumed: u64,
        length: u32,
        size: u64,
    },

    #[error("failed to decode table of contents entry at {offset:#x}: {source}")]
    TocEntry {
        offset: u64,
        #[source]
        source: binrw::Error,
    },

    #[error("data of entry {name:?} lies outside the file")]
    EntryOutOfBounds { name: String },

    #[error("PYZ archive {name:?} has a truncated header")]
    PyzHeader { name: String },

    #[error("PYZ archive {name:?} points its index at {offset:#x}, past its {len} bytes")]
    PyzIndexOffset { name: String, offset: u32, len: usize },

    #[error("malformed PYZ index in {name:?}: {reason}")]
    PyzIndex { name: String, reason: String },

    #[error("failed to unmarshal PYZ index of {name:?}: {source}")]
    Marshal {
        name: String,
        #[source]
        source: MarshalError,
    },
}

/// Everything that can abort an extraction run.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Per-entry problems. Processing continues in a degraded form.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    #[error("found an unnamed file in CArchive, using random name {0}")]
    UnnamedEntry(String),

    #[error("failed to decompress {0} in CArchive, extracting as-is")]
    Decompress(String),

    #[error("decompressed size mismatch for file {name} (declared {declared}, got {actual})")]
    SizeMismatch {
        name: String,
        declared: u32,
        actual: usize,
    },

    #[error("magic header in PYZ archive {0} doesn't match")]
    PyzMagic(String),

    #[error("pyc magic of files inside PYZ archive {0} differs from those in CArchive")]
    PycMagicConflict(String),

    #[error("failed to decompress {0} in PYZ archive, likely encrypted, extracting as-is")]
    Encrypted(String),

    #[error("member {name} of PYZ archive {pyz} lies outside the archive")]
    PyzMemberOutOfBounds { pyz: String, name: String },

    #[error("refusing to write {0}: path escapes the output directory")]
    UnsafePath(String),

    #[error("skipping {0}: a file and a directory would share this path")]
    PathConflict(String),

    #[error("pyc magic never found, {0} files written with an empty magic")]
    MissingPycMagic(usize),
}

//! Compiled module (`.pyc`) header reconstruction.
//!
//! Entry scripts, PYZ members and modules from PyInstaller 5.3+ are stored as
//! bare code objects. A decompiler needs the header back, and the only part
//! that matters is the 4 byte magic identifying the bytecode version. It is
//! taken from the first module that still has its header, or from a PYZ
//! archive header. Files seen before the magic is known wait in a queue.

use crate::cookie::PythonVersion;

pub type PycMagic = [u8; 4];

/// True if `data` starts with an intact header (`xx xx \r \n`).
pub fn has_pyc_header(data: &[u8]) -> bool {
    data.get(2..4) == Some(b"\r\n".as_slice())
}

/// Magic followed by the zeroed fields of the header layout used by `python`.
pub fn pyc_header(magic: PycMagic, python: PythonVersion) -> Vec<u8> {
    let mut header = magic.to_vec();
    if python >= PythonVersion::new(3, 7) {
        // PEP 552: bitfield, then timestamp and size (or the source hash)
        header.extend_from_slice(&[0; 4]);
        header.extend_from_slice(&[0; 8]);
    } else {
        // timestamp
        header.extend_from_slice(&[0; 4]);
        if python >= PythonVersion::new(3, 3) {
            // source size
            header.extend_from_slice(&[0; 4]);
        }
    }
    header
}

/// Where a magic was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MagicOrigin {
    /// A CArchive module with its header intact.
    Module,
    /// The header of a PYZ archive.
    Pyz,
}

/// Outcome of [`HeaderState::observe`].
#[derive(Debug, PartialEq, Eq)]
pub enum Observed {
    /// First magic of the session. Holds the queued files, in queue order.
    Captured(Vec<usize>),
    /// Same as, or ignored in favour of, the current magic.
    Unchanged,
    /// A PYZ disagreed with the current magic. Later files use the new one.
    Replaced { previous: PycMagic },
}

/// Magic captured so far plus the files waiting for it.
///
/// Files are identified by an index chosen by the caller.
#[derive(Debug)]
pub struct HeaderState {
    python: PythonVersion,
    magic: Option<PycMagic>,
    pending: Vec<usize>,
}

impl HeaderState {
    pub fn new(python: PythonVersion) -> Self {
        Self {
            python,
            magic: None,
            pending: Vec::new(),
        }
    }

    pub fn magic(&self) -> Option<PycMagic> {
        self.magic
    }

    pub fn observe(&mut self, magic: PycMagic, origin: MagicOrigin) -> Observed {
        match self.magic {
            None => {
                self.magic = Some(magic);
                Observed::Captured(std::mem::take(&mut self.pending))
            }
            Some(previous) if previous != magic && origin == MagicOrigin::Pyz => {
                self.magic = Some(magic);
                Observed::Replaced { previous }
            }
            Some(_) => Observed::Unchanged,
        }
    }

    /// Header for file `index`, or `None` if it has been queued.
    pub fn header_or_defer(&mut self, index: usize) -> Option<Vec<u8>> {
        match self.magic {
            Some(magic) => Some(self.header(magic)),
            None => {
                self.pending.push(index);
                None
            }
        }
    }

    pub fn header(&self, magic: PycMagic) -> Vec<u8> {
        pyc_header(magic, self.python)
    }

    /// Files still waiting when the session ends.
    pub fn into_pending(self) -> Vec<usize> {
        self.pending
    }
}

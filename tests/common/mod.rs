//! Builders for synthetic PyInstaller executables.
#![allow(dead_code)]

use libdeflater::{CompressionLvl, Compressor};
use pyinst_extractor::cookie::MAGIC;
use pyinst_extractor::marshal::{TYPE_INT, TYPE_LIST, TYPE_SHORT_ASCII, TYPE_SMALL_TUPLE};
use pyinst_extractor::pyz::PYZ_MAGIC;

pub const MAGIC_38: [u8; 4] = [0x55, 0x0D, 0x0D, 0x0A];
pub const MAGIC_311: [u8; 4] = [0xA7, 0x0D, 0x0D, 0x0A];

pub fn deflate(data: &[u8]) -> Vec<u8> {
    let mut compressor = Compressor::new(CompressionLvl::default());
    let mut out = vec![0u8; compressor.zlib_compress_bound(data.len())];
    let len = compressor.zlib_compress(data, &mut out).unwrap();
    out.truncate(len);
    out
}

/// A `.pyc` image: magic, zeroed 3.7+ header fields, then `code`.
pub fn pyc(magic: [u8; 4], code: &[u8]) -> Vec<u8> {
    let mut out = magic.to_vec();
    out.extend_from_slice(&[0; 12]);
    out.extend_from_slice(code);
    out
}

struct Entry {
    name: Vec<u8>,
    type_code: u8,
    stored: Vec<u8>,
    uncompressed_size: u32,
    compressed: bool,
}

/// Lays out `host | entry data | TOC | cookie | trailer`.
pub struct ArchiveBuilder {
    host: Vec<u8>,
    entries: Vec<Entry>,
    python_version: u32,
    lib_name: Option<Vec<u8>>,
    trailer: Vec<u8>,
}

impl ArchiveBuilder {
    pub fn new(python_version: u32) -> Self {
        Self {
            host: b"MZ fake host executable".to_vec(),
            entries: Vec::new(),
            python_version,
            lib_name: None,
            trailer: Vec::new(),
        }
    }

    /// Switches to the 2.1+ cookie layout.
    pub fn lib_name(mut self, name: &str) -> Self {
        self.lib_name = Some(name.as_bytes().to_vec());
        self
    }

    pub fn trailer(mut self, trailer: &[u8]) -> Self {
        self.trailer = trailer.to_vec();
        self
    }

    pub fn entry(self, name: &str, type_code: u8, content: &[u8]) -> Self {
        self.raw_entry(name.as_bytes(), type_code, content.to_vec(), content.len() as u32, false)
    }

    pub fn compressed(self, name: &str, type_code: u8, content: &[u8]) -> Self {
        let stored = deflate(content);
        self.raw_entry(name.as_bytes(), type_code, stored, content.len() as u32, true)
    }

    pub fn raw_entry(
        mut self,
        name: &[u8],
        type_code: u8,
        stored: Vec<u8>,
        uncompressed_size: u32,
        compressed: bool,
    ) -> Self {
        self.entries.push(Entry {
            name: name.to_vec(),
            type_code,
            stored,
            uncompressed_size,
            compressed,
        });
        self
    }

    fn toc(&self) -> (Vec<u8>, Vec<u8>) {
        let mut data = Vec::new();
        let mut toc = Vec::new();
        for entry in &self.entries {
            // names are NUL padded to a 16 byte boundary
            let mut name = entry.name.clone();
            name.push(0);
            while (18 + name.len()) % 16 != 0 {
                name.push(0);
            }

            toc.extend_from_slice(&((18 + name.len()) as u32).to_be_bytes());
            toc.extend_from_slice(&(data.len() as u32).to_be_bytes());
            toc.extend_from_slice(&(entry.stored.len() as u32).to_be_bytes());
            toc.extend_from_slice(&entry.uncompressed_size.to_be_bytes());
            toc.push(u8::from(entry.compressed));
            toc.push(entry.type_code);
            toc.extend_from_slice(&name);
            data.extend_from_slice(&entry.stored);
        }
        (data, toc)
    }

    pub fn cookie(&self, package_length: u32, toc_offset: u32, toc_length: u32) -> Vec<u8> {
        let mut cookie = MAGIC.to_vec();
        for v in [package_length, toc_offset, toc_length, self.python_version] {
            cookie.extend_from_slice(&v.to_be_bytes());
        }
        if let Some(lib) = &self.lib_name {
            let mut field = [0u8; 64];
            field[..lib.len()].copy_from_slice(lib);
            cookie.extend_from_slice(&field);
        }
        cookie
    }

    pub fn build(&self) -> Vec<u8> {
        let (data, toc) = self.toc();
        let cookie_size = if self.lib_name.is_some() { 88 } else { 24 };
        let package_length = (data.len() + toc.len() + cookie_size) as u32;
        let cookie = self.cookie(package_length, data.len() as u32, toc.len() as u32);

        let mut out = self.host.clone();
        out.extend_from_slice(&data);
        out.extend_from_slice(&toc);
        out.extend_from_slice(&cookie);
        out.extend_from_slice(&self.trailer);
        out
    }
}

/// A PYZ member, stored as given.
pub struct PyzMember {
    pub name: &'static str,
    pub is_package: bool,
    pub stored: Vec<u8>,
}

impl PyzMember {
    /// Compressed bare code object.
    pub fn module(name: &'static str, is_package: bool, code: &[u8]) -> Self {
        Self {
            name,
            is_package,
            stored: deflate(code),
        }
    }

    /// Stored bytes which are not a zlib stream, as with encrypted archives.
    pub fn encrypted(name: &'static str, bytes: &[u8]) -> Self {
        Self {
            name,
            is_package: false,
            stored: bytes.to_vec(),
        }
    }
}

fn marshal_int(out: &mut Vec<u8>, v: i32) {
    out.push(TYPE_INT);
    out.extend_from_slice(&v.to_le_bytes());
}

pub fn pyz(pyc_magic: [u8; 4], members: &[PyzMember]) -> Vec<u8> {
    let mut body = Vec::new();
    let mut index = vec![TYPE_LIST];
    index.extend_from_slice(&(members.len() as i32).to_le_bytes());

    for member in members {
        let offset = 12 + body.len();
        body.extend_from_slice(&member.stored);

        index.extend_from_slice(&[TYPE_SMALL_TUPLE, 2, TYPE_SHORT_ASCII, member.name.len() as u8]);
        index.extend_from_slice(member.name.as_bytes());
        index.extend_from_slice(&[TYPE_SMALL_TUPLE, 3]);
        marshal_int(&mut index, i32::from(member.is_package));
        marshal_int(&mut index, offset as i32);
        marshal_int(&mut index, member.stored.len() as i32);
    }

    let mut out = PYZ_MAGIC.to_vec();
    out.extend_from_slice(&pyc_magic);
    out.extend_from_slice(&((12 + body.len()) as u32).to_be_bytes());
    out.extend_from_slice(&body);
    out.extend_from_slice(&index);
    out
}

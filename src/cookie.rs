//! Cookie location and decoding.
//!
//! The cookie is the fixed trailer PyInstaller appends after the table of
//! contents. Two layouts exist: the 2.0 one (24 bytes) and the 2.1+ one which
//! adds a 64 byte Python library name. Nothing in the cookie says which layout
//! is used, so the version is guessed from the bytes that follow it.

use std::fmt;
use std::io::Cursor;

use binrw::BinRead;
use memchr::memmem;

use crate::error::FormatError;

/// Magic which identifies a PyInstaller archive.
pub const MAGIC: [u8; 8] = [b'M', b'E', b'I', 0x0C, 0x0B, 0x0A, 0x0B, 0x0E];

pub const COOKIE_SIZE_V20: usize = 24;
pub const COOKIE_SIZE_V21: usize = COOKIE_SIZE_V20 + 64;

const SEARCH_CHUNK_SIZE: usize = 8192;

/// Returns the absolute offset of the last magic in `data`.
///
/// Scans from the end in [`SEARCH_CHUNK_SIZE`] windows which overlap by
/// `MAGIC.len() - 1` bytes, so a magic split across two windows is still found.
pub fn find_cookie(data: &[u8]) -> Result<u64, FormatError> {
    if data.len() < MAGIC.len() {
        return Err(FormatError::FileTooShort(data.len() as u64));
    }

    let finder = memmem::FinderRev::new(&MAGIC);
    let mut end = data.len();

    loop {
        let start = end.saturating_sub(SEARCH_CHUNK_SIZE);
        let window = &data[start..end];
        if window.len() < MAGIC.len() {
            break;
        }

        if let Some(offset) = finder.rfind(window) {
            return Ok((start + offset) as u64);
        }

        if start == 0 {
            break;
        }
        end = start + MAGIC.len() - 1;
    }

    Err(FormatError::CookieNotFound)
}

/// PyInstaller archive format generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PyInstVersion {
    V20,
    V21Plus,
}

impl PyInstVersion {
    pub fn cookie_size(self) -> usize {
        match self {
            PyInstVersion::V20 => COOKIE_SIZE_V20,
            PyInstVersion::V21Plus => COOKIE_SIZE_V21,
        }
    }

    /// Guesses the layout from the (up to) 64 bytes following the 2.0 cookie.
    ///
    /// 2.1+ cookies carry the Python library name there, which always
    /// contains "python" in some casing.
    pub fn detect(data: &[u8], cookie_position: u64) -> PyInstVersion {
        let start = cookie_position as usize + COOKIE_SIZE_V20;
        let end = data.len().min(start + 64);
        let tail = data.get(start..end).unwrap_or_default().to_ascii_lowercase();

        if memmem::find(&tail, b"python").is_some() {
            PyInstVersion::V21Plus
        } else {
            PyInstVersion::V20
        }
    }
}

impl fmt::Display for PyInstVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PyInstVersion::V20 => f.write_str("2.0"),
            PyInstVersion::V21Plus => f.write_str("2.1+"),
        }
    }
}

/// On-disk cookie. The library name is only present in the 2.1+ layout.
#[derive(BinRead, Debug, Clone)]
#[br(big, magic = b"MEI\x0c\x0b\x0a\x0b\x0e", import(has_lib_name: bool))]
pub struct Cookie {
    pub package_length: u32,
    pub toc_offset: u32,
    pub toc_length: u32,
    pub python_version: u32,
    #[br(if(has_lib_name))]
    pub python_lib_name: Option<[u8; 64]>,
}

impl Cookie {
    pub fn decode(data: &[u8], position: u64, version: PyInstVersion) -> Result<Cookie, FormatError> {
        let start = position as usize;
        let bytes = data
            .get(start..start + version.cookie_size())
            .ok_or(FormatError::CookieTruncated { position })?;

        let has_lib_name = version == PyInstVersion::V21Plus;
        Cookie::read_be_args(&mut Cursor::new(bytes), (has_lib_name,)).map_err(FormatError::Cookie)
    }

    pub fn lib_name(&self) -> Option<String> {
        let raw = self.python_lib_name.as_ref()?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Some(String::from_utf8_lossy(&raw[..end]).trim().to_string())
    }
}

/// Interpreter version the bundled bytecode targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PythonVersion {
    pub major: u32,
    pub minor: u32,
}

impl PythonVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Decodes `27`, `36` as well as `310`, `312` style version numbers.
    pub fn from_packed(version: u32) -> Self {
        if version >= 100 {
            Self::new(version / 100, version % 100)
        } else {
            Self::new(version / 10, version % 10)
        }
    }
}

impl fmt::Display for PythonVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Absolute positions derived from the cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveGeometry {
    pub file_size: u64,
    pub overlay_size: u64,
    pub overlay_position: u64,
    pub toc_position: u64,
    pub toc_size: u64,
}

impl ArchiveGeometry {
    /// `package_length` counts from the overlay start up to the end of the
    /// cookie; anything after the cookie (signatures, padding) also belongs to
    /// the overlay.
    pub fn compute(
        file_size: u64,
        cookie_position: u64,
        cookie_size: usize,
        cookie: &Cookie,
    ) -> Result<Self, FormatError> {
        let tail = file_size
            .checked_sub(cookie_position)
            .and_then(|n| n.checked_sub(cookie_size as u64))
            .ok_or(FormatError::Geometry("cookie extends past end of file"))?;

        let overlay_size = u64::from(cookie.package_length) + tail;
        let overlay_position = file_size
            .checked_sub(overlay_size)
            .ok_or(FormatError::Geometry("package is larger than the file"))?;

        let toc_position = overlay_position + u64::from(cookie.toc_offset);
        let toc_size = u64::from(cookie.toc_length);
        if toc_position + toc_size > file_size {
            return Err(FormatError::Geometry("table of contents extends past end of file"));
        }

        Ok(Self {
            file_size,
            overlay_size,
            overlay_position,
            toc_position,
            toc_size,
        })
    }
}

/// Everything learnt from the cookie.
#[derive(Debug, Clone)]
pub struct ArchiveInfo {
    pub cookie_position: u64,
    pub version: PyInstVersion,
    pub cookie: Cookie,
    pub python: PythonVersion,
    pub geometry: ArchiveGeometry,
}

impl ArchiveInfo {
    pub fn parse(data: &[u8]) -> Result<Self, FormatError> {
        let cookie_position = find_cookie(data)?;
        log::debug!("Got cookie offset at: {cookie_position:#X}");

        let version = PyInstVersion::detect(data, cookie_position);
        log::info!("Pyinstaller version: {version}");

        let cookie = Cookie::decode(data, cookie_position, version)?;
        if let Some(lib) = cookie.lib_name() {
            log::info!("Python library file: {lib}");
        }

        let python = PythonVersion::from_packed(cookie.python_version);
        log::info!("Python version: {python}");
        log::info!("Length of package: {} bytes", cookie.package_length);

        let geometry = ArchiveGeometry::compute(
            data.len() as u64,
            cookie_position,
            version.cookie_size(),
            &cookie,
        )?;

        Ok(Self {
            cookie_position,
            version,
            cookie,
            python,
            geometry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie_bytes(package: u32, toc: u32, toc_len: u32, py: u32, lib: Option<&[u8]>) -> Vec<u8> {
        let mut out = MAGIC.to_vec();
        for v in [package, toc, toc_len, py] {
            out.extend_from_slice(&v.to_be_bytes());
        }
        if let Some(lib) = lib {
            let mut field = [0u8; 64];
            field[..lib.len()].copy_from_slice(lib);
            out.extend_from_slice(&field);
        }
        out
    }

    #[test]
    fn finds_magic_at_end() {
        let mut data = vec![0xAA; 20_000];
        data.extend_from_slice(&MAGIC);
        assert_eq!(find_cookie(&data).unwrap(), 20_000);
    }

    #[test]
    fn finds_magic_straddling_window_boundary() {
        // window [len-8192, len) cuts the magic in half
        let mut data = vec![0u8; 10_000];
        let at = data.len() - SEARCH_CHUNK_SIZE - 4;
        data[at..at + 8].copy_from_slice(&MAGIC);
        assert_eq!(find_cookie(&data).unwrap(), at as u64);
    }

    #[test]
    fn finds_last_occurrence() {
        let mut data = MAGIC.to_vec();
        data.extend_from_slice(&[1, 2, 3]);
        data.extend_from_slice(&MAGIC);
        data.extend_from_slice(&[4, 5]);
        assert_eq!(find_cookie(&data).unwrap(), 11);
    }

    #[test]
    fn missing_magic_is_an_error() {
        assert!(matches!(
            find_cookie(&[0u8; 30_000]),
            Err(FormatError::CookieNotFound)
        ));
        assert!(matches!(find_cookie(b"MEI"), Err(FormatError::FileTooShort(3))));
    }

    #[test]
    fn version_inference_ignores_case() {
        let v21 = cookie_bytes(0, 0, 0, 38, Some(b"PyThOn38.dll"));
        assert_eq!(PyInstVersion::detect(&v21, 0), PyInstVersion::V21Plus);

        let v20 = cookie_bytes(0, 0, 0, 27, Some(b"libsomething.so"));
        assert_eq!(PyInstVersion::detect(&v20, 0), PyInstVersion::V20);

        let bare = cookie_bytes(0, 0, 0, 27, None);
        assert_eq!(PyInstVersion::detect(&bare, 0), PyInstVersion::V20);
    }

    #[test]
    fn decodes_v21_cookie() {
        let data = cookie_bytes(1000, 800, 150, 311, Some(b"python311.dll"));
        let cookie = Cookie::decode(&data, 0, PyInstVersion::V21Plus).unwrap();
        assert_eq!(cookie.package_length, 1000);
        assert_eq!(cookie.toc_offset, 800);
        assert_eq!(cookie.toc_length, 150);
        assert_eq!(cookie.lib_name().as_deref(), Some("python311.dll"));
        assert_eq!(PythonVersion::from_packed(cookie.python_version), PythonVersion::new(3, 11));
    }

    #[test]
    fn truncated_cookie_is_rejected() {
        let data = cookie_bytes(1, 2, 3, 27, None);
        assert!(matches!(
            Cookie::decode(&data[..20], 0, PyInstVersion::V20),
            Err(FormatError::CookieTruncated { position: 0 })
        ));
    }

    #[test]
    fn packed_python_versions() {
        assert_eq!(PythonVersion::from_packed(27), PythonVersion::new(2, 7));
        assert_eq!(PythonVersion::from_packed(36), PythonVersion::new(3, 6));
        assert_eq!(PythonVersion::from_packed(310), PythonVersion::new(3, 10));
    }

    #[test]
    fn geometry_accounts_for_trailing_bytes() {
        let cookie = Cookie {
            package_length: 100,
            toc_offset: 40,
            toc_length: 36,
            python_version: 27,
            python_lib_name: None,
        };
        // 50 bytes of host, 100 byte package (cookie last), 10 bytes of trailer
        let geometry = ArchiveGeometry::compute(160, 126, COOKIE_SIZE_V20, &cookie).unwrap();
        assert_eq!(geometry.overlay_size, 110);
        assert_eq!(geometry.overlay_position, 50);
        assert_eq!(geometry.toc_position, 90);
        assert_eq!(geometry.toc_size, 36);
    }

    #[test]
    fn geometry_rejects_oversized_package() {
        let cookie = Cookie {
            package_length: 500,
            toc_offset: 0,
            toc_length: 0,
            python_version: 27,
            python_lib_name: None,
        };
        assert!(matches!(
            ArchiveGeometry::compute(100, 76, COOKIE_SIZE_V20, &cookie),
            Err(FormatError::Geometry(_))
        ));
    }

    #[test]
    fn geometry_rejects_toc_past_end() {
        let cookie = Cookie {
            package_length: 100,
            toc_offset: 90,
            toc_length: 36,
            python_version: 27,
            python_lib_name: None,
        };
        assert!(matches!(
            ArchiveGeometry::compute(100, 76, COOKIE_SIZE_V20, &cookie),
            Err(FormatError::Geometry(_))
        ));
    }
}

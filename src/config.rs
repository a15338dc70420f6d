/// Knobs for [`crate::PyInstArchive::extract`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Decompress and classify entries on the rayon pool.
    pub parallel: bool,
    /// Unpack the modules of PYZ archives next to the archive itself.
    pub extract_pyz: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            parallel: true,
            extract_pyz: true,
        }
    }
}

impl ExtractOptions {
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn extract_pyz(mut self, extract_pyz: bool) -> Self {
        self.extract_pyz = extract_pyz;
        self
    }
}

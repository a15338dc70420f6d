//! Output path sanitization.
//!
//! Archive member names are untrusted. Every name is split on both separator
//! styles, `.` components are dropped and `..` pops the previous component.
//! A name that would climb above the output root is rejected instead of being
//! rewritten.

use std::fmt;
use std::path::{Path, PathBuf};

/// A relative path made of plain components only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputPath {
    components: Vec<String>,
}

impl OutputPath {
    /// Canonicalizes `name`. Returns `None` if it escapes the root or is empty.
    pub fn parse(name: &str) -> Option<OutputPath> {
        let mut components: Vec<String> = Vec::new();
        for part in name.trim_matches('\0').split(['/', '\\']) {
            match part {
                "" | "." => {}
                ".." => {
                    components.pop()?;
                }
                // drive prefixes like `C:` would make the join absolute on Windows
                p if p.contains(':') => return None,
                // no filesystem accepts an interior NUL
                p if p.contains('\0') => return None,
                p => components.push(p.to_string()),
            }
        }

        if components.is_empty() {
            return None;
        }
        Some(OutputPath { components })
    }

    /// Appends a suffix to the file name, e.g. `.pyc`.
    pub fn with_suffix(&self, suffix: &str) -> OutputPath {
        let mut components = self.components.clone();
        if let Some(last) = components.last_mut() {
            last.push_str(suffix);
        }
        OutputPath { components }
    }

    /// `self/child`, canonicalizing `child` on the way.
    pub fn join(&self, child: &str) -> Option<OutputPath> {
        let child = OutputPath::parse(child)?;
        let mut components = self.components.clone();
        components.extend(child.components);
        Some(OutputPath { components })
    }

    pub fn parent(&self) -> Option<OutputPath> {
        match self.components.len() {
            0 | 1 => None,
            n => Some(OutputPath {
                components: self.components[..n - 1].to_vec(),
            }),
        }
    }

    /// Every proper ancestor, nearest first.
    pub fn ancestors(&self) -> impl Iterator<Item = OutputPath> + '_ {
        (1..self.components.len()).rev().map(|n| OutputPath {
            components: self.components[..n].to_vec(),
        })
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.components.iter().map(String::as_str)
    }

    /// `root` joined with every component.
    pub fn under(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        path.extend(&self.components);
        path
    }
}

impl fmt::Display for OutputPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.components.join("/"))
    }
}

/// Turns a dotted module name into a relative file path.
///
/// `..` is neutralized before dots become separators, so `a..b` cannot
/// produce a parent component.
pub fn module_path(name: &str, is_package: bool) -> String {
    let path = name.replace("..", "__").replace('.', "/");
    if is_package {
        format!("{path}/__init__.pyc")
    } else {
        format!("{path}.pyc")
    }
}

use std::{borrow::Cow, collections::BTreeMap, path::Path};

use figment::{
    Figment,
    providers::{Format, Toml},
};
use serde::Deserialize;

use crate::error::CatalogLoadError;

/// Label prefix used when a class code has no catalog entry.
pub const UNKNOWN_CODE_LABEL: &str = "Неизвестный код";

/// Immutable class code to defect name lookup. Codes are contiguous `0..len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefectCatalog {
    names: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    names: BTreeMap<String, String>,
}

impl DefectCatalog {
    /// Read a TOML catalog file with a `[names]` table keyed by class code.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CatalogLoadError> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|source| CatalogLoadError::Unreadable {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, CatalogLoadError> {
        let file: CatalogFile = Figment::from(Toml::string(contents))
            .extract()
            .map_err(|e| CatalogLoadError::Malformed(e.to_string()))?;
        Self::from_entries(file.names)
    }

    /// Build from integer-like keys. Fails fast on anything that is not a dense,
    /// non-empty `0..N` code range with non-empty names.
    pub fn from_entries<I, K, V>(entries: I) -> Result<Self, CatalogLoadError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut by_code = BTreeMap::new();
        for (key, name) in entries {
            let key = key.as_ref();
            let code: u32 = key.trim().parse().map_err(|_| {
                CatalogLoadError::Malformed(format!(
                    "class code {:?} is not a non-negative integer",
                    key
                ))
            })?;
            let name: String = name.into();
            let name = name.trim();
            if name.is_empty() {
                return Err(CatalogLoadError::Malformed(format!(
                    "class code {} has an empty name",
                    code
                )));
            }
            if by_code.insert(code, name.to_string()).is_some() {
                return Err(CatalogLoadError::Malformed(format!(
                    "class code {} is defined more than once",
                    code
                )));
            }
        }

        if by_code.is_empty() {
            return Err(CatalogLoadError::Malformed("catalog has no entries".into()));
        }

        let mut names = Vec::with_capacity(by_code.len());
        for (expected, (code, name)) in by_code.into_iter().enumerate() {
            if code as usize != expected {
                return Err(CatalogLoadError::Malformed(format!(
                    "class codes must be contiguous from 0, missing code {}",
                    expected
                )));
            }
            names.push(name);
        }

        Ok(Self { names })
    }

    /// Canonical name for `code`, or the unknown-code label. Never fails.
    pub fn lookup(&self, code: u32) -> Cow<'_, str> {
        match self.names.get(code as usize) {
            Some(name) => Cow::Borrowed(name.as_str()),
            None => Cow::Owned(format!("{}: {}", UNKNOWN_CODE_LABEL, code)),
        }
    }

    pub fn contains(&self, code: u32) -> bool {
        (code as usize) < self.names.len()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.names
            .iter()
            .enumerate()
            .map(|(code, name)| (code as u32, name.as_str()))
    }
}

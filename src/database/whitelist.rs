use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{info, instrument, warn};

use crate::database::seed::SeedSet;
use crate::error::AppError;

/// A table name confirmed against the whitelist. Only [`Whitelist`] can
/// construct one, so SQL built from it never carries unchecked input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableName<'a>(&'a str);

/// A column name confirmed against the whitelist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnName<'a>(&'a str);

impl<'a> TableName<'a> {
    pub fn as_str(&self) -> &'a str {
        self.0
    }
}

impl<'a> ColumnName<'a> {
    pub fn as_str(&self) -> &'a str {
        self.0
    }
}

impl fmt::Display for TableName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl fmt::Display for ColumnName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// One immutable snapshot of the known table and column names.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Whitelist {
    tables: HashSet<String>,
    columns: HashSet<String>,
}

impl Whitelist {
    /// Builds a snapshot from the seed sources. A source whose headers can't
    /// be read still contributes its table name; only its columns are lost.
    pub fn from_seeds(seeds: &SeedSet) -> Result<Self, AppError> {
        let mut whitelist = Whitelist::default();

        for source in seeds.sources()? {
            match source.read_headers() {
                Ok(headers) => whitelist.columns.extend(headers),
                Err(e) => warn!(
                    source = %source.path.display(),
                    error = %e,
                    "Could not read headers for whitelist"
                ),
            }
            whitelist.tables.insert(source.table);
        }

        Ok(whitelist)
    }

    #[cfg(test)]
    pub fn with_names(tables: &[&str], columns: &[&str]) -> Self {
        Self {
            tables: tables.iter().map(|t| t.to_string()).collect(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn is_valid_table(&self, name: &str) -> bool {
        self.tables.contains(name)
    }

    pub fn is_valid_column(&self, name: &str) -> bool {
        self.columns.contains(name)
    }

    pub fn table<'a>(&self, name: &'a str) -> Result<TableName<'a>, AppError> {
        if self.is_valid_table(name) {
            Ok(TableName(name))
        } else {
            Err(AppError::InvalidIdentifier(name.to_string()))
        }
    }

    pub fn column<'a>(&self, name: &'a str) -> Result<ColumnName<'a>, AppError> {
        if self.is_valid_column(name) {
            Ok(ColumnName(name))
        } else {
            Err(AppError::InvalidIdentifier(name.to_string()))
        }
    }

    pub fn columns<'a, I>(&self, names: I) -> Result<Vec<ColumnName<'a>>, AppError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        names.into_iter().map(|name| self.column(name)).collect()
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.iter().cloned().collect();
        names.sort();
        names
    }
}

/// Process-wide holder of the current [`Whitelist`]. Clones share the same
/// state; a refresh swaps in a complete snapshot so readers never observe a
/// half-built set.
#[derive(Debug, Clone, Default)]
pub struct WhitelistRegistry {
    current: Arc<RwLock<Arc<Whitelist>>>,
}

impl WhitelistRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[instrument(skip_all, fields(seed_dir = %seeds.dir().display()))]
    pub fn refresh(&self, seeds: &SeedSet) -> Result<(), AppError> {
        let whitelist = Whitelist::from_seeds(seeds)?;
        info!(
            tables = ?whitelist.table_names(),
            columns = whitelist.columns.len(),
            "Refreshed identifier whitelist"
        );
        self.replace(whitelist);
        Ok(())
    }

    pub fn replace(&self, whitelist: Whitelist) {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(whitelist);
    }

    pub fn snapshot(&self) -> Arc<Whitelist> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_valid_table(&self, name: &str) -> bool {
        self.snapshot().is_valid_table(name)
    }

    pub fn is_valid_column(&self, name: &str) -> bool {
        self.snapshot().is_valid_column(name)
    }
}

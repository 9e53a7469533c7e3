//! Category mapping configuration
//!
//! Transaction categories are free text. The aggregation engine rolls them up into the
//! fixed aggregate columns through a lookup table built once per process. The built-in
//! table maps each column's statement label (住房, 餐饮, ...) to itself; a TOML file can
//! add aliases or replace the consumption subset.
//!
//! ```toml
//! [categories]
//! "房租" = "housing"
//! "外卖" = "dining"
//!
//! [consumption]
//! fields = ["dining", "living", "entertainment", "transportation", "travel", "gifts"]
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::CategoryField;

/// Fields summed into `avg_consumption` unless configured otherwise
pub const DEFAULT_CONSUMPTION_FIELDS: [CategoryField; 6] = [
    CategoryField::Dining,
    CategoryField::Living,
    CategoryField::Entertainment,
    CategoryField::Transportation,
    CategoryField::Travel,
    CategoryField::Gifts,
];

/// Lookup table from category text to aggregate column
#[derive(Debug, Clone)]
pub struct CategoryMap {
    fields: HashMap<String, CategoryField>,
    consumption: Vec<CategoryField>,
}

impl Default for CategoryMap {
    fn default() -> Self {
        let fields = CategoryField::ALL
            .into_iter()
            .map(|f| (f.label().to_string(), f))
            .collect();
        Self {
            fields,
            consumption: DEFAULT_CONSUMPTION_FIELDS.to_vec(),
        }
    }
}

impl CategoryMap {
    /// Shared built-in table
    pub fn builtin() -> &'static CategoryMap {
        static BUILTIN: OnceLock<CategoryMap> = OnceLock::new();
        BUILTIN.get_or_init(CategoryMap::default)
    }

    /// Load from an explicit path, else the default location, else the built-in table
    pub fn load(override_path: Option<&Path>) -> Result<Self> {
        let path = match override_path {
            Some(path) => Some(path.to_path_buf()),
            None => default_config_path().filter(|p| p.exists()),
        };

        match path {
            Some(path) => {
                let content = fs::read_to_string(&path).map_err(|e| {
                    Error::Config(format!("Failed to read {}: {}", path.display(), e))
                })?;
                debug!("Loaded category config from {}", path.display());
                Self::parse(&content)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse TOML content on top of the built-in table
    pub fn parse(content: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid category TOML: {}", e)))?;

        let mut map = Self::default();

        for (label, field) in raw.categories.unwrap_or_default() {
            let field: CategoryField = field.parse().map_err(Error::Config)?;
            map.fields.insert(label.trim().to_string(), field);
        }

        if let Some(consumption) = raw.consumption.and_then(|c| c.fields) {
            let mut fields = Vec::with_capacity(consumption.len());
            for name in consumption {
                let field: CategoryField = name.parse().map_err(Error::Config)?;
                // Housing enters avg_consumption through the amortized average only
                if field == CategoryField::Housing {
                    return Err(Error::Config(
                        "housing cannot be part of the consumption subset".to_string(),
                    ));
                }
                if !fields.contains(&field) {
                    fields.push(field);
                }
            }
            map.consumption = fields;
        }

        Ok(map)
    }

    /// Aggregate column for a category, if it is mapped
    pub fn field_for(&self, category: &str) -> Option<CategoryField> {
        self.fields.get(category.trim()).copied()
    }

    /// Columns summed (as magnitudes) into `avg_consumption`
    pub fn consumption_fields(&self) -> &[CategoryField] {
        &self.consumption
    }
}

/// Default config override path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("tally").join("config").join("categories.toml"))
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    categories: Option<HashMap<String, String>>,
    consumption: Option<RawConsumption>,
}

#[derive(Debug, Deserialize)]
struct RawConsumption {
    fields: Option<Vec<String>>,
}

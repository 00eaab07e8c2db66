//! Static gift and credit-package catalogs.
//!
//! Both catalogs are configuration input: loaded once from a JSON array at
//! startup, or built from the defaults below.

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;

use crate::ledger::GiftInfo;
use crate::payments::CreditPackage;

/// Catalog loading errors
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid catalog item {id}: {reason}")]
    Invalid { id: String, reason: String },
}

/// Gift id → credit cost lookup
pub trait GiftCatalog: Send + Sync {
    fn gift(&self, id: &str) -> Option<GiftInfo>;

    /// Every gift, sorted by cost
    fn gifts(&self) -> Vec<GiftInfo>;
}

/// Package id → price lookup
pub trait PackageCatalog: Send + Sync {
    fn package(&self, id: &str) -> Option<CreditPackage>;

    /// Every package, sorted by price
    fn packages(&self) -> Vec<CreditPackage>;
}

/// Gift catalog held in memory
#[derive(Debug, Clone, Default)]
pub struct StaticGiftCatalog {
    gifts: HashMap<String, GiftInfo>,
}

impl StaticGiftCatalog {
    pub fn new(gifts: impl IntoIterator<Item = GiftInfo>) -> Result<Self, CatalogError> {
        let mut map = HashMap::new();
        for gift in gifts {
            if gift.credits <= 0 {
                return Err(CatalogError::Invalid {
                    id: gift.id,
                    reason: "credits must be positive".to_string(),
                });
            }
            if map.contains_key(&gift.id) {
                return Err(CatalogError::Invalid {
                    id: gift.id,
                    reason: "duplicate id".to_string(),
                });
            }
            map.insert(gift.id.clone(), gift);
        }
        Ok(Self { gifts: map })
    }

    /// Parse a JSON array of gifts
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        Self::new(serde_json::from_str::<Vec<GiftInfo>>(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        Self::from_json(&read_catalog(path.as_ref())?)
    }

    /// Built-in gift set
    pub fn defaults() -> Self {
        let gifts = [
            ("rose", "Rose", 1),
            ("heart", "Heart", 5),
            ("coffee", "Coffee", 10),
            ("crown", "Crown", 100),
            ("rocket", "Rocket", 500),
        ]
        .into_iter()
        .map(|(id, name, credits)| {
            (
                id.to_string(),
                GiftInfo {
                    id: id.to_string(),
                    name: name.to_string(),
                    credits,
                },
            )
        })
        .collect();
        Self { gifts }
    }
}

impl GiftCatalog for StaticGiftCatalog {
    fn gift(&self, id: &str) -> Option<GiftInfo> {
        self.gifts.get(id).cloned()
    }

    fn gifts(&self) -> Vec<GiftInfo> {
        let mut gifts: Vec<GiftInfo> = self.gifts.values().cloned().collect();
        gifts.sort_by(|a, b| a.credits.cmp(&b.credits).then_with(|| a.id.cmp(&b.id)));
        gifts
    }
}

/// Package catalog held in memory
#[derive(Debug, Clone, Default)]
pub struct StaticPackageCatalog {
    packages: HashMap<String, CreditPackage>,
}

impl StaticPackageCatalog {
    pub fn new(packages: impl IntoIterator<Item = CreditPackage>) -> Result<Self, CatalogError> {
        let mut map = HashMap::new();
        for package in packages {
            if package.amount_minor <= 0 || package.credits <= 0 {
                return Err(CatalogError::Invalid {
                    id: package.id,
                    reason: "amount and credits must be positive".to_string(),
                });
            }
            if map.contains_key(&package.id) {
                return Err(CatalogError::Invalid {
                    id: package.id,
                    reason: "duplicate id".to_string(),
                });
            }
            map.insert(package.id.clone(), package);
        }
        Ok(Self { packages: map })
    }

    /// Parse a JSON array of packages
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        Self::new(serde_json::from_str::<Vec<CreditPackage>>(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        Self::from_json(&read_catalog(path.as_ref())?)
    }

    /// Built-in packages priced in `currency`
    pub fn defaults(currency: &str) -> Self {
        let packages = [
            ("starter", "Starter", 500, 100),
            ("popular", "Popular", 2000, 450),
            ("premium", "Premium", 5000, 1200),
        ]
        .into_iter()
        .map(|(id, name, amount_minor, credits)| {
            (
                id.to_string(),
                CreditPackage {
                    id: id.to_string(),
                    name: name.to_string(),
                    amount_minor,
                    credits,
                    currency: currency.to_string(),
                },
            )
        })
        .collect();
        Self { packages }
    }
}

impl PackageCatalog for StaticPackageCatalog {
    fn package(&self, id: &str) -> Option<CreditPackage> {
        self.packages.get(id).cloned()
    }

    fn packages(&self) -> Vec<CreditPackage> {
        let mut packages: Vec<CreditPackage> = self.packages.values().cloned().collect();
        packages.sort_by(|a, b| {
            a.amount_minor
                .cmp(&b.amount_minor)
                .then_with(|| a.id.cmp(&b.id))
        });
        packages
    }
}

fn read_catalog(path: &Path) -> Result<String, CatalogError> {
    std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.display().to_string(),
        source,
    })
}

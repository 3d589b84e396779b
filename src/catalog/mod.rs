//! Product catalog and policy index.
//!
//! Two JSON documents back the resolver: `products.json` (catalog entries,
//! aliases, and the company return address) and `policies/index.json`
//! (one metadata entry per policy text document). Both load leniently —
//! a missing or broken file yields an empty set with a warning, never an
//! error, because "no catalog match" is a valid resolution state.

use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::warn;

mod resolver;

pub use resolver::{Resolver, find_product_match, normalize, serial_prefix_product};

/// One product in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub product_id: String,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub policy_file: Option<String>,
}

/// Company return address printed on shipping labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnAddress {
    pub name: String,
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub country: String,
}

impl Default for ReturnAddress {
    fn default() -> Self {
        Self {
            name: "Meridian Appliance Returns".to_string(),
            street: "4800 Foundry Row".to_string(),
            city: "Columbus".to_string(),
            state: "OH".to_string(),
            zip: "43085".to_string(),
            country: "USA".to_string(),
        }
    }
}

/// The product catalog document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductCatalog {
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default)]
    pub return_address: Option<ReturnAddress>,
}

impl ProductCatalog {
    /// Load the catalog, tolerating a missing or unreadable file.
    pub async fn load(path: &Path) -> Self {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(catalog) => catalog,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Invalid product catalog JSON");
                    Self::default()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Product catalog not readable");
                Self::default()
            }
        }
    }

    /// Validate minimum schema requirements, returning human-readable problems.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for (i, product) in self.products.iter().enumerate() {
            if product.product_id.trim().is_empty() {
                problems.push(format!("products[{i}].product_id is required"));
            }
            if product.name.trim().is_empty() {
                problems.push(format!("products[{i}].name is required"));
            }
            if !product.product_id.trim().is_empty() && !seen.insert(product.product_id.clone()) {
                problems.push(format!("duplicate product_id: {}", product.product_id));
            }
            if product
                .policy_file
                .as_deref()
                .map(|f| f.trim().is_empty())
                .unwrap_or(true)
            {
                problems.push(format!("products[{i}].policy_file is required"));
            }
        }
        problems
    }
}

/// One entry in the policy index: metadata for a policy text document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyEntry {
    pub policy_id: String,
    pub product_id: String,
    #[serde(default)]
    pub product_name: Option<String>,
    pub policy_file: String,
    #[serde(default)]
    pub version: String,
    pub effective_date: NaiveDate,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub exclusion_keywords: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PolicyIndexFile {
    #[serde(default)]
    policies: Vec<PolicyEntry>,
}

/// Load the policy index, tolerating a missing or unreadable file.
pub async fn load_policy_index(path: &Path) -> Vec<PolicyEntry> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => match serde_json::from_str::<PolicyIndexFile>(&raw) {
            Ok(index) => index.policies,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Invalid policy index JSON");
                Vec::new()
            }
        },
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Policy index not readable");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(id: &str, name: &str) -> Product {
        Product {
            product_id: id.into(),
            name: name.into(),
            category: None,
            aliases: vec![],
            policy_file: Some(format!("policy_{id}.txt")),
        }
    }

    #[test]
    fn validate_accepts_well_formed_catalog() {
        let catalog = ProductCatalog {
            products: vec![product("MD-PRO-001", "ProDry 3000")],
            return_address: None,
        };
        assert!(catalog.validate().is_empty());
    }

    #[test]
    fn validate_flags_duplicates_and_missing_fields() {
        let mut bad = product("", "");
        bad.policy_file = None;
        let catalog = ProductCatalog {
            products: vec![
                product("MD-PRO-001", "ProDry 3000"),
                product("MD-PRO-001", "ProDry 3000 Copy"),
                bad,
            ],
            return_address: None,
        };
        let problems = catalog.validate();
        assert!(problems.iter().any(|p| p.contains("duplicate product_id")));
        assert!(problems.iter().any(|p| p.contains("product_id is required")));
        assert!(problems.iter().any(|p| p.contains("name is required")));
        assert!(problems.iter().any(|p| p.contains("policy_file is required")));
    }

    #[tokio::test]
    async fn missing_catalog_loads_empty() {
        let catalog = ProductCatalog::load(Path::new("/definitely/not/here.json")).await;
        assert!(catalog.products.is_empty());
    }

    #[tokio::test]
    async fn missing_index_loads_empty() {
        let entries = load_policy_index(Path::new("/definitely/not/here.json")).await;
        assert!(entries.is_empty());
    }
}

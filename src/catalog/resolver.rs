//! Deterministic product and policy resolution.
//!
//! Maps a free-text product mention (plus optional serial number) to a
//! catalog entry and a dated policy version. Same normalized mention,
//! same catalog — same answer, always.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::debug;

use crate::catalog::{PolicyEntry, Product, ProductCatalog, ReturnAddress, load_policy_index};
use crate::claim::Resolution;

/// Serial prefix (segment before the first hyphen) → product id.
const SERIAL_PREFIXES: &[(&str, &str)] = &[
    ("PD3K", "MD-PRO-001"),
    ("PD5K", "MD-PRO-002"),
    ("TRC", "MD-TRV-001"),
    ("TRP", "MD-TRV-002"),
    ("SL7K", "MD-SLN-001"),
    ("SL9K", "MD-SLN-002"),
    ("EC", "MD-ECO-001"),
    ("KD", "MD-KDS-001"),
    ("IN2K", "MD-ION-001"),
    ("QD", "MD-QCK-001"),
];

/// Normalize text for matching: lowercase, separators to spaces,
/// whitespace collapsed.
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase().replace(['-', '_'], " ");
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Find the best catalog match for a product mention.
///
/// Exact matches on name, product id, or alias score 1.0 and return
/// immediately. Otherwise partial containment is scored as
/// `len(matched substring) / len(mention)`, with name-level partials
/// capped at 0.9, and the best-scoring candidate wins.
pub fn find_product_match<'a>(
    mention: &str,
    products: &'a [Product],
) -> (Option<&'a Product>, f32) {
    let mention_norm = normalize(mention);
    if mention_norm.is_empty() {
        return (None, 0.0);
    }
    let mention_len = mention_norm.len().max(1) as f32;

    let mut best: Option<&Product> = None;
    let mut best_score = 0.0f32;

    for product in products {
        let name_norm = normalize(&product.name);
        if name_norm == mention_norm || normalize(&product.product_id) == mention_norm {
            return (Some(product), 1.0);
        }

        for alias in &product.aliases {
            let alias_norm = normalize(alias);
            if alias_norm.is_empty() {
                continue;
            }
            if alias_norm == mention_norm {
                return (Some(product), 1.0);
            }
            if alias_norm.contains(&mention_norm) || mention_norm.contains(&alias_norm) {
                // The matched substring is whichever string is contained:
                // a mention sitting inside a longer alias scores by its
                // own full length, so partial scores stay in [0, 1].
                let matched = alias_norm.len().min(mention_norm.len()) as f32;
                let score = matched / mention_len;
                if score > best_score {
                    best_score = score;
                    best = Some(product);
                }
            }
        }

        if !name_norm.is_empty()
            && (name_norm.contains(&mention_norm) || mention_norm.contains(&name_norm))
        {
            let matched = name_norm.len().min(mention_norm.len()) as f32;
            let score = (matched / mention_len).min(0.9);
            if score > best_score {
                best_score = score;
                best = Some(product);
            }
        }
    }

    (best, best_score)
}

/// Look up a product by serial-number prefix.
///
/// The prefix is the segment before the first hyphen, uppercased; a
/// serial without a hyphen has no usable prefix.
pub fn serial_prefix_product<'a>(serial: &str, products: &'a [Product]) -> Option<&'a Product> {
    let prefix = serial.split_once('-')?.0.to_uppercase();
    let target = SERIAL_PREFIXES
        .iter()
        .find(|(p, _)| *p == prefix)
        .map(|(_, id)| *id)?;
    products.iter().find(|p| p.product_id == target)
}

/// Resolves product mentions to catalog products and dated policy versions.
pub struct Resolver {
    catalog: ProductCatalog,
    entries: Vec<PolicyEntry>,
    policies_dir: PathBuf,
}

impl Resolver {
    pub fn new(catalog: ProductCatalog, entries: Vec<PolicyEntry>, policies_dir: PathBuf) -> Self {
        Self {
            catalog,
            entries,
            policies_dir,
        }
    }

    /// Load catalog and policy index from disk.
    pub async fn load(products_file: &Path, index_file: &Path, policies_dir: PathBuf) -> Self {
        let catalog = ProductCatalog::load(products_file).await;
        let entries = load_policy_index(index_file).await;
        Self::new(catalog, entries, policies_dir)
    }

    pub fn products(&self) -> &[Product] {
        &self.catalog.products
    }

    pub fn policy_entries(&self) -> &[PolicyEntry] {
        &self.entries
    }

    pub fn return_address(&self) -> ReturnAddress {
        self.catalog.return_address.clone().unwrap_or_default()
    }

    /// Resolve a claim's product mention and serial into a catalog product
    /// and policy version. Never fails: "no match" is a valid resolution.
    pub fn resolve(
        &self,
        mention: Option<&str>,
        serial: Option<&str>,
        purchase_date: Option<NaiveDate>,
    ) -> Resolution {
        let mention = mention.unwrap_or("");

        if self.catalog.products.is_empty() {
            return unresolved(mention, "Product catalog not available");
        }

        let by_serial = serial.and_then(|s| serial_prefix_product(s, &self.catalog.products));
        let (by_name, name_confidence) = find_product_match(mention, &self.catalog.products);

        let (product, confidence, mut reason) = match (by_serial, by_name) {
            (Some(serial_match), Some(name_match))
                if serial_match.product_id == name_match.product_id =>
            {
                (
                    serial_match,
                    1.0,
                    "Matched by both serial number and product name".to_string(),
                )
            }
            (Some(serial_match), _) => (
                serial_match,
                0.95,
                "Matched by serial number prefix".to_string(),
            ),
            (None, Some(name_match)) => (
                name_match,
                name_confidence,
                format!(
                    "Matched by product name (confidence: {:.0}%)",
                    name_confidence * 100.0
                ),
            ),
            (None, None) => {
                return unresolved(mention, "No product match found");
            }
        };

        let entry = self.select_policy(&product.product_id, purchase_date);

        let mut resolution = Resolution {
            product_id: Some(product.product_id.clone()),
            product_name: Some(product.name.clone()),
            product_category: product.category.clone(),
            policy_id: None,
            policy_file: None,
            policy_version: None,
            policy_effective_date: None,
            requirements: Vec::new(),
            exclusion_keywords: Vec::new(),
            match_confidence: confidence,
            reason: String::new(),
        };

        let policy_file = match entry {
            Some(entry) => {
                resolution.policy_id = Some(entry.policy_id.clone());
                resolution.policy_version = Some(entry.version.clone());
                resolution.policy_effective_date = Some(entry.effective_date);
                resolution.requirements = entry.requirements.clone();
                resolution.exclusion_keywords = entry.exclusion_keywords.clone();
                reason.push_str(&format!(
                    " | Policy: {} ({})",
                    entry.policy_id, entry.version
                ));
                Some(entry.policy_file.clone())
            }
            None => product.policy_file.clone(),
        };

        if let Some(file) = policy_file {
            if self.policies_dir.join(&file).exists() {
                resolution.policy_file = Some(file);
            } else {
                // Referenced but absent: treat as "no policy", never throw.
                reason.push_str(&format!(" (policy file not found: {file})"));
            }
        }

        debug!(
            product_id = %product.product_id,
            confidence,
            reason = %reason,
            "Resolved product"
        );
        resolution.reason = reason;
        resolution
    }

    /// Pick the policy entry for a product: the latest version whose
    /// effective date is on or before the purchase date, falling back to
    /// the latest overall when no purchase date is known or none qualify.
    fn select_policy(
        &self,
        product_id: &str,
        purchase_date: Option<NaiveDate>,
    ) -> Option<&PolicyEntry> {
        let for_product: Vec<&PolicyEntry> = self
            .entries
            .iter()
            .filter(|e| e.product_id == product_id)
            .collect();
        if for_product.is_empty() {
            return None;
        }

        if let Some(purchased) = purchase_date {
            let eligible = for_product
                .iter()
                .filter(|e| e.effective_date <= purchased)
                .max_by_key(|e| e.effective_date);
            if let Some(entry) = eligible {
                return Some(entry);
            }
        }

        for_product.into_iter().max_by_key(|e| e.effective_date)
    }
}

fn unresolved(mention: &str, reason: &str) -> Resolution {
    Resolution {
        product_id: None,
        product_name: if mention.is_empty() {
            None
        } else {
            Some(mention.to_string())
        },
        product_category: None,
        policy_id: None,
        policy_file: None,
        policy_version: None,
        policy_effective_date: None,
        requirements: Vec::new(),
        exclusion_keywords: Vec::new(),
        match_confidence: 0.0,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(id: &str, name: &str, aliases: &[&str]) -> Product {
        Product {
            product_id: id.into(),
            name: name.into(),
            category: Some("dryers".into()),
            aliases: aliases.iter().map(|s| s.to_string()).collect(),
            policy_file: Some(format!("policy_{}.txt", id.to_lowercase())),
        }
    }

    fn demo_products() -> Vec<Product> {
        vec![
            product("MD-PRO-001", "ProDry 3000", &["prodry", "pro dry 3000"]),
            product("MD-TRV-001", "TravelDry Compact", &["traveldry"]),
        ]
    }

    fn entry(policy_id: &str, product_id: &str, version: &str, date: &str) -> PolicyEntry {
        PolicyEntry {
            policy_id: policy_id.into(),
            product_id: product_id.into(),
            product_name: None,
            policy_file: format!("{}.txt", policy_id.to_lowercase()),
            version: version.into(),
            effective_date: date.parse().unwrap(),
            requirements: vec!["proof_of_purchase".into()],
            exclusion_keywords: vec!["water damage".into()],
        }
    }

    fn resolver(entries: Vec<PolicyEntry>) -> Resolver {
        Resolver::new(
            ProductCatalog {
                products: demo_products(),
                return_address: None,
            },
            entries,
            PathBuf::from("/nonexistent-policies"),
        )
    }

    #[test]
    fn normalize_strips_separators() {
        assert_eq!(normalize("  Pro-Dry_3000  "), "pro dry 3000");
        assert_eq!(normalize("ProDry   3000"), "prodry 3000");
    }

    #[test]
    fn exact_alias_match_scores_one() {
        let products = demo_products();
        let (matched, confidence) = find_product_match("ProDry", &products);
        assert_eq!(matched.unwrap().product_id, "MD-PRO-001");
        assert!((confidence - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn exact_id_match_scores_one() {
        let products = demo_products();
        let (matched, confidence) = find_product_match("md-pro-001", &products);
        assert_eq!(matched.unwrap().product_id, "MD-PRO-001");
        assert!((confidence - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn mention_inside_longer_alias_scores_one_not_above() {
        let products = demo_products();
        // "dry 3000" is a strict substring of the alias "pro dry 3000";
        // the matched substring is the mention itself.
        let (matched, confidence) = find_product_match("dry 3000", &products);
        assert_eq!(matched.unwrap().product_id, "MD-PRO-001");
        assert!((confidence - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn name_partial_is_capped_at_ninety_percent() {
        let products = demo_products();
        // "prodry 3000" is contained in the mention; name-level partial.
        let (matched, confidence) = find_product_match("my prodry 3000 dryer", &products);
        assert_eq!(matched.unwrap().product_id, "MD-PRO-001");
        assert!(confidence <= 0.9);
        assert!(confidence > 0.0);
    }

    #[test]
    fn resolution_is_deterministic() {
        let products = demo_products();
        let first = find_product_match("traveldry compact", &products);
        let second = find_product_match("traveldry compact", &products);
        assert_eq!(
            first.0.map(|p| &p.product_id),
            second.0.map(|p| &p.product_id)
        );
        assert_eq!(first.1, second.1);
    }

    #[test]
    fn no_match_yields_none() {
        let products = demo_products();
        let (matched, confidence) = find_product_match("toaster oven", &products);
        assert!(matched.is_none());
        assert_eq!(confidence, 0.0);
    }

    #[test]
    fn serial_prefix_lookup() {
        let products = demo_products();
        let matched = serial_prefix_product("PD3K-12345", &products).unwrap();
        assert_eq!(matched.product_id, "MD-PRO-001");
        assert!(serial_prefix_product("ZZZZ-1", &products).is_none());
        // No hyphen: no usable prefix.
        assert!(serial_prefix_product("PD3K12345", &products).is_none());
    }

    #[test]
    fn serial_agreeing_with_name_raises_to_full_confidence() {
        let r = resolver(vec![]);
        let resolution = r.resolve(Some("ProDry 3000"), Some("PD3K-998"), None);
        assert_eq!(resolution.product_id.as_deref(), Some("MD-PRO-001"));
        assert!((resolution.match_confidence - 1.0).abs() < f32::EPSILON);
        assert!(resolution.reason.contains("both serial number and product name"));
    }

    #[test]
    fn serial_disagreeing_with_name_wins() {
        let r = resolver(vec![]);
        // Name says TravelDry, serial says ProDry.
        let resolution = r.resolve(Some("TravelDry Compact"), Some("PD3K-998"), None);
        assert_eq!(resolution.product_id.as_deref(), Some("MD-PRO-001"));
        assert!((resolution.match_confidence - 0.95).abs() < f32::EPSILON);
        assert!(resolution.reason.contains("serial number prefix"));
    }

    #[test]
    fn unmatched_resolution_is_valid_state() {
        let r = resolver(vec![]);
        let resolution = r.resolve(Some("mystery gadget"), None, None);
        assert!(resolution.product_id.is_none());
        assert_eq!(resolution.match_confidence, 0.0);
        assert_eq!(resolution.reason, "No product match found");
    }

    #[test]
    fn policy_selection_respects_purchase_date() {
        let r = resolver(vec![
            entry("POL-A", "MD-PRO-001", "1.0", "2024-01-01"),
            entry("POL-B", "MD-PRO-001", "2.0", "2025-01-01"),
        ]);
        let purchased: NaiveDate = "2024-06-15".parse().unwrap();
        let resolution = r.resolve(Some("ProDry 3000"), None, Some(purchased));
        // Only POL-A was effective at purchase time.
        assert_eq!(resolution.policy_id.as_deref(), Some("POL-A"));
    }

    #[test]
    fn policy_selection_falls_back_to_latest() {
        let r = resolver(vec![
            entry("POL-A", "MD-PRO-001", "1.0", "2024-01-01"),
            entry("POL-B", "MD-PRO-001", "2.0", "2025-01-01"),
        ]);
        // No purchase date: latest overall.
        let resolution = r.resolve(Some("ProDry 3000"), None, None);
        assert_eq!(resolution.policy_id.as_deref(), Some("POL-B"));

        // Purchase predates every version: latest overall again.
        let early: NaiveDate = "2020-01-01".parse().unwrap();
        let resolution = r.resolve(Some("ProDry 3000"), None, Some(early));
        assert_eq!(resolution.policy_id.as_deref(), Some("POL-B"));
    }

    #[test]
    fn missing_policy_file_is_annotated_not_fatal() {
        let r = resolver(vec![entry("POL-A", "MD-PRO-001", "1.0", "2024-01-01")]);
        let resolution = r.resolve(Some("ProDry 3000"), None, None);
        // The policies dir doesn't exist, so the file can't either.
        assert!(resolution.policy_file.is_none());
        assert!(resolution.reason.contains("policy file not found"));
        // Metadata from the index entry survives.
        assert_eq!(resolution.policy_id.as_deref(), Some("POL-A"));
        assert_eq!(resolution.exclusion_keywords, vec!["water damage".to_string()]);
    }

    #[test]
    fn empty_catalog_reports_unavailable() {
        let r = Resolver::new(ProductCatalog::default(), vec![], PathBuf::from("/none"));
        let resolution = r.resolve(Some("ProDry 3000"), None, None);
        assert!(resolution.product_id.is_none());
        assert_eq!(resolution.reason, "Product catalog not available");
    }
}

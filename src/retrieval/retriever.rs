//! The per-claim retrieval protocol.
//!
//! Two queries per claim — one phrased around the specific issue, one
//! around general terms and exclusions — merged with first-seen content
//! dedup, plus a broad fallback when both come back empty. Every excerpt
//! keeps its originating query name and similarity distance.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::claim::{ClaimRecord, PolicyExcerpt};
use crate::error::RetrievalError;
use crate::retrieval::{ExcerptFilter, PolicyIndex, ScoredChunk};

/// Top-k for the issue-specific query.
const ISSUE_TOP_K: usize = 3;
/// Top-k for the terms/exclusions query.
const TERMS_TOP_K: usize = 2;
/// Top-k for the broad fallback query.
const FALLBACK_TOP_K: usize = 3;

/// Retrieves ranked, deduplicated policy excerpts for a claim.
pub struct Retriever {
    index: Arc<PolicyIndex>,
}

impl Retriever {
    pub fn new(index: Arc<PolicyIndex>) -> Self {
        Self { index }
    }

    /// Run the retrieval protocol for a claim.
    pub async fn retrieve(&self, record: &ClaimRecord) -> Result<Vec<PolicyExcerpt>, RetrievalError> {
        let product_name = record.product_display_name();
        let issue = record
            .extracted
            .as_ref()
            .and_then(|e| e.issue_description.clone())
            .unwrap_or_else(|| "general warranty inquiry".to_string());

        let filter = match &record.resolution {
            Some(res) => ExcerptFilter::scoped(
                res.policy_id.as_deref(),
                res.policy_file.as_deref(),
                res.product_id.as_deref(),
            ),
            None => ExcerptFilter::Unscoped,
        };

        let issue_query = format!("warranty coverage for {issue} on {product_name}");
        let terms_query =
            format!("warranty period duration coverage exclusions for {product_name}");

        let issue_hits = self.index.query(&issue_query, ISSUE_TOP_K, &filter).await?;
        let terms_hits = self.index.query(&terms_query, TERMS_TOP_K, &filter).await?;

        // Merge, keeping first-seen content: issue results before terms results.
        let mut seen = HashSet::new();
        let mut excerpts = Vec::new();
        for (query_name, hit) in issue_hits
            .into_iter()
            .map(|h| ("issue", h))
            .chain(terms_hits.into_iter().map(|h| ("terms", h)))
        {
            if !seen.insert(hit.content.clone()) {
                continue;
            }
            excerpts.push(to_excerpt(query_name, hit));
        }

        if excerpts.is_empty() {
            // Broad fallback, accepted without dedup.
            let fallback_query = format!("warranty policy for {product_name}");
            let fallback_hits = self
                .index
                .query(&fallback_query, FALLBACK_TOP_K, &filter)
                .await?;
            for hit in fallback_hits {
                excerpts.push(PolicyExcerpt {
                    section: "General Policy".to_string(),
                    ..to_excerpt("fallback", hit)
                });
            }
        }

        debug!(
            claim_id = %record.claim_id,
            excerpts = excerpts.len(),
            "Retrieved policy excerpts"
        );
        Ok(excerpts)
    }
}

fn to_excerpt(query_name: &str, hit: ScoredChunk) -> PolicyExcerpt {
    PolicyExcerpt {
        section: format!("Excerpt from {}", hit.tag.source),
        content: hit.content,
        policy_id: hit.tag.policy_id,
        policy_file: hit.tag.source,
        chunk_index: hit.tag.chunk_index,
        distance: hit.distance,
        query: query_name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PolicyEntry;
    use crate::claim::{ExtractedFields, Resolution};
    use crate::intake::RawMessage;
    use crate::retrieval::HashEmbedder;
    use tempfile::TempDir;

    fn record_with_issue(issue: &str, policy_id: Option<&str>) -> ClaimRecord {
        let mut record = ClaimRecord::new(RawMessage {
            id: "m-1".into(),
            from: "pat@example.com".into(),
            to: String::new(),
            subject: "claim".into(),
            date: None,
            body: issue.into(),
            attachments: vec![],
            attachment_text: None,
        });
        record.extracted = Some(ExtractedFields {
            issue_description: Some(issue.into()),
            product_name: Some("ProDry 3000".into()),
            ..Default::default()
        });
        record.resolution = Some(Resolution {
            product_id: Some("MD-PRO-001".into()),
            product_name: Some("ProDry 3000".into()),
            product_category: None,
            policy_id: policy_id.map(String::from),
            policy_file: None,
            policy_version: None,
            policy_effective_date: None,
            requirements: vec![],
            exclusion_keywords: vec![],
            match_confidence: 1.0,
            reason: String::new(),
        });
        record
    }

    fn entry(policy_id: &str, file: &str) -> PolicyEntry {
        PolicyEntry {
            policy_id: policy_id.into(),
            product_id: "MD-PRO-001".into(),
            product_name: Some("ProDry 3000".into()),
            policy_file: file.into(),
            version: "1.0".into(),
            effective_date: "2024-01-01".parse().unwrap(),
            requirements: vec![],
            exclusion_keywords: vec![],
        }
    }

    fn retriever_for(tmp: &TempDir) -> Retriever {
        std::fs::write(
            tmp.path().join("policy_a.txt"),
            "Warranty period is three months from purchase. \
             Exclusions: water damage, physical abuse, commercial use. \
             Heating element defects are covered.",
        )
        .unwrap();
        let index = PolicyIndex::new(
            tmp.path().to_path_buf(),
            vec![entry("POL-A", "policy_a.txt")],
            Arc::new(HashEmbedder::default()),
        );
        Retriever::new(Arc::new(index))
    }

    #[tokio::test]
    async fn retrieves_excerpts_with_provenance() {
        let tmp = TempDir::new().unwrap();
        let retriever = retriever_for(&tmp);
        let record = record_with_issue("dryer stopped heating", Some("POL-A"));

        let excerpts = retriever.retrieve(&record).await.unwrap();
        assert!(!excerpts.is_empty());
        for excerpt in &excerpts {
            assert_eq!(excerpt.policy_id, "POL-A");
            assert_eq!(excerpt.policy_file, "policy_a.txt");
            assert!(excerpt.query == "issue" || excerpt.query == "terms");
            assert!(excerpt.section.contains("policy_a.txt"));
        }
    }

    #[tokio::test]
    async fn merged_excerpts_are_content_deduplicated() {
        let tmp = TempDir::new().unwrap();
        let retriever = retriever_for(&tmp);
        let record = record_with_issue("warranty exclusions water damage", Some("POL-A"));

        let excerpts = retriever.retrieve(&record).await.unwrap();
        let mut contents: Vec<&str> = excerpts.iter().map(|e| e.content.as_str()).collect();
        let before = contents.len();
        contents.dedup();
        contents.sort();
        contents.dedup();
        assert_eq!(contents.len(), before);
    }

    #[tokio::test]
    async fn issue_results_come_before_terms_results() {
        let tmp = TempDir::new().unwrap();
        let retriever = retriever_for(&tmp);
        let record = record_with_issue("no heat at all", Some("POL-A"));

        let excerpts = retriever.retrieve(&record).await.unwrap();
        let first_terms = excerpts.iter().position(|e| e.query == "terms");
        let last_issue = excerpts.iter().rposition(|e| e.query == "issue");
        if let (Some(first_terms), Some(last_issue)) = (first_terms, last_issue) {
            assert!(last_issue < first_terms);
        }
    }

    #[tokio::test]
    async fn scoping_to_unknown_policy_falls_back_broadly() {
        let tmp = TempDir::new().unwrap();
        let retriever = retriever_for(&tmp);
        // Filter scopes to a policy id with no chunks: both primary
        // queries come back empty, and the fallback (same scope) does too —
        // empty excerpts, not an error.
        let record = record_with_issue("no heat", Some("POL-MISSING"));
        let excerpts = retriever.retrieve(&record).await.unwrap();
        assert!(excerpts.is_empty());
    }

    #[tokio::test]
    async fn unresolved_claim_queries_unscoped() {
        let tmp = TempDir::new().unwrap();
        let retriever = retriever_for(&tmp);
        let mut record = record_with_issue("no heat", None);
        record.resolution = None;
        let excerpts = retriever.retrieve(&record).await.unwrap();
        assert!(!excerpts.is_empty());
    }
}

//! The human review packet — a markdown document with everything a
//! reviewer needs to decide a claim.

use chrono::Utc;

use crate::claim::ClaimRecord;

fn opt(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("Not provided")
}

/// Render the markdown review packet for a claim.
pub fn render_review_packet(record: &ClaimRecord) -> String {
    let extracted = record.extracted.clone().unwrap_or_default();
    let mut lines: Vec<String> = Vec::new();

    lines.push("# Warranty Claim Review Packet".to_string());
    lines.push(String::new());
    lines.push(format!("**Claim ID:** {}", record.claim_id));
    lines.push(format!(
        "**Generated:** {}",
        Utc::now().format("%Y-%m-%d %H:%M:%S")
    ));
    lines.push(String::new());
    lines.push("---".to_string());
    lines.push(String::new());

    // Recommendation summary
    lines.push("## Recommendation Summary".to_string());
    lines.push(String::new());
    lines.push("| Field | Value |".to_string());
    lines.push("|-------|-------|".to_string());
    if let Some(analysis) = &record.analysis {
        lines.push(format!(
            "| **Recommendation** | **{}** |",
            analysis.recommendation
        ));
        lines.push(format!(
            "| **Confidence** | {:.0}% |",
            analysis.confidence * 100.0
        ));
        lines.push(format!(
            "| **Warranty Valid** | {} |",
            match analysis.warranty_valid {
                Some(true) => "Yes",
                Some(false) => "No",
                None => "Undetermined",
            }
        ));
    } else {
        lines.push("| **Recommendation** | N/A |".to_string());
    }
    lines.push(String::new());

    // Customer
    lines.push("## Customer Information".to_string());
    lines.push(String::new());
    lines.push("| Field | Value |".to_string());
    lines.push("|-------|-------|".to_string());
    lines.push(format!("| Name | {} |", opt(&extracted.customer_name)));
    lines.push(format!("| Email | {} |", opt(&extracted.customer_email)));
    lines.push(format!("| Phone | {} |", opt(&extracted.customer_phone)));
    lines.push(format!("| Address | {} |", opt(&extracted.customer_address)));
    lines.push(String::new());

    // Product & purchase
    lines.push("## Product & Purchase".to_string());
    lines.push(String::new());
    lines.push("| Field | Value |".to_string());
    lines.push("|-------|-------|".to_string());
    let resolution = record.resolution.as_ref();
    lines.push(format!(
        "| Product | {} |",
        resolution
            .and_then(|r| r.product_name.as_deref())
            .unwrap_or("Unknown")
    ));
    lines.push(format!(
        "| Product ID | {} |",
        resolution
            .and_then(|r| r.product_id.as_deref())
            .unwrap_or("Not matched")
    ));
    lines.push(format!(
        "| Category | {} |",
        resolution
            .and_then(|r| r.product_category.as_deref())
            .unwrap_or("N/A")
    ));
    lines.push(format!("| Serial | {} |", opt(&extracted.product_serial)));
    lines.push(format!(
        "| Purchase Date | {} |",
        extracted
            .purchase_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "Not provided".to_string())
    ));
    lines.push(format!(
        "| Purchase Location | {} |",
        opt(&extracted.purchase_location)
    ));
    lines.push(format!("| Order Number | {} |", opt(&extracted.order_number)));
    lines.push(format!(
        "| Proof of Purchase | {} |",
        if extracted.has_proof_of_purchase {
            "Yes"
        } else {
            "No"
        }
    ));
    lines.push(String::new());

    // Policy resolution
    if let Some(resolution) = resolution {
        lines.push("## Policy Resolution".to_string());
        lines.push(String::new());
        lines.push(format!(
            "- Policy: {} (version {}, effective {})",
            resolution.policy_id.as_deref().unwrap_or("none"),
            resolution.policy_version.as_deref().unwrap_or("?"),
            resolution
                .policy_effective_date
                .map(|d| d.to_string())
                .unwrap_or_else(|| "?".to_string()),
        ));
        lines.push(format!(
            "- Match confidence: {:.0}%",
            resolution.match_confidence * 100.0
        ));
        lines.push(format!("- {}", resolution.reason));
        lines.push(String::new());
    }

    // Issue
    lines.push("## Issue Description".to_string());
    lines.push(String::new());
    lines.push("```".to_string());
    lines.push(
        extracted
            .issue_description
            .clone()
            .unwrap_or_else(|| "No description provided".to_string()),
    );
    lines.push("```".to_string());
    lines.push(String::new());

    // Warranty window
    lines.push("## Warranty Window Analysis".to_string());
    lines.push(String::new());
    lines.push(
        record
            .analysis
            .as_ref()
            .map(|a| a.warranty_details.clone())
            .unwrap_or_else(|| "Warranty window not checked".to_string()),
    );
    lines.push(String::new());

    // Analysis detail
    if let Some(analysis) = &record.analysis {
        lines.push("## Analysis".to_string());
        lines.push(String::new());
        lines.push(analysis.reasoning.clone());
        lines.push(String::new());
        if !analysis.facts.is_empty() {
            lines.push("**Facts:**".to_string());
            for fact in &analysis.facts {
                lines.push(format!("- {fact}"));
            }
            lines.push(String::new());
        }
        if !analysis.assumptions.is_empty() {
            lines.push("**Assumptions:**".to_string());
            for assumption in &analysis.assumptions {
                lines.push(format!("- {assumption}"));
            }
            lines.push(String::new());
        }
        if !analysis.exclusions_triggered.is_empty() {
            lines.push("**Exclusions triggered:**".to_string());
            for exclusion in &analysis.exclusions_triggered {
                lines.push(format!("- {exclusion}"));
            }
            lines.push(String::new());
        }
    }

    // Missing information
    if !extracted.missing_fields.is_empty() {
        lines.push("## Missing Information".to_string());
        lines.push(String::new());
        for field in &extracted.missing_fields {
            lines.push(format!("- {field}"));
        }
        lines.push(String::new());
    }

    // Policy excerpts with provenance
    if !record.excerpts.is_empty() {
        lines.push("## Policy Excerpts".to_string());
        lines.push(String::new());
        for excerpt in &record.excerpts {
            lines.push(format!(
                "### {} (chunk {}, distance {:.3}, query: {})",
                excerpt.section, excerpt.chunk_index, excerpt.distance, excerpt.query
            ));
            lines.push(String::new());
            lines.push(format!("> {}", excerpt.content.replace('\n', "\n> ")));
            lines.push(String::new());
        }
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claim::{AnalysisResult, ExtractedFields, PolicyExcerpt, Recommendation};
    use crate::intake::RawMessage;

    fn record() -> ClaimRecord {
        let mut record = ClaimRecord::new(RawMessage {
            id: "m-1".into(),
            from: "pat@example.com".into(),
            to: String::new(),
            subject: "Claim".into(),
            date: None,
            body: "no heat".into(),
            attachments: vec![],
            attachment_text: None,
        });
        record.extracted = Some(ExtractedFields {
            customer_name: Some("Pat Doyle".into()),
            issue_description: Some("heating element dead".into()),
            missing_fields: vec!["purchase_date".into()],
            ..Default::default()
        });
        record.analysis = Some(AnalysisResult {
            recommendation: Recommendation::NeedInfo,
            confidence: 0.9,
            facts: vec!["fact one".into()],
            assumptions: vec![],
            reasoning: "Needs a purchase date.".into(),
            policy_references: vec![],
            warranty_valid: None,
            warranty_details: "Purchase date not provided".into(),
            exclusions_triggered: vec![],
        });
        record.excerpts = vec![PolicyExcerpt {
            section: "Excerpt from policy_a.txt".into(),
            content: "Coverage details here.".into(),
            policy_id: "POL-A".into(),
            policy_file: "policy_a.txt".into(),
            chunk_index: 0,
            distance: 0.12,
            query: "issue".into(),
        }];
        record
    }

    #[test]
    fn packet_has_all_sections() {
        let packet = render_review_packet(&record());
        assert!(packet.contains("# Warranty Claim Review Packet"));
        assert!(packet.contains("**NEED_INFO**"));
        assert!(packet.contains("| **Warranty Valid** | Undetermined |"));
        assert!(packet.contains("Pat Doyle"));
        assert!(packet.contains("heating element dead"));
        assert!(packet.contains("- purchase_date"));
        assert!(packet.contains("query: issue"));
    }

    #[test]
    fn packet_without_analysis_still_renders() {
        let mut record = record();
        record.analysis = None;
        let packet = render_review_packet(&record);
        assert!(packet.contains("| **Recommendation** | N/A |"));
        assert!(packet.contains("Warranty window not checked"));
    }
}

//! Artifact rendering — review packets, customer responses, return labels.
//!
//! The pipeline only needs references (paths) back from these operations,
//! so they sit behind a trait; `TextArtifacts` is the bundled text/markdown
//! implementation writing under the outbox directory.

mod packet;
mod responses;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use std::path::PathBuf;
use tokio::fs;
use tracing::info;

use crate::catalog::ReturnAddress;
use crate::claim::{ClaimRecord, Recommendation};
use crate::config::CompanyIdentity;
use crate::error::RenderError;

pub use packet::render_review_packet;
pub use responses::render_customer_response;

/// A rendered artifact: its content and where it was stored.
#[derive(Debug, Clone)]
pub struct RenderedDoc {
    pub content: String,
    pub path: String,
}

/// Render collaborators used by the pipeline.
#[async_trait]
pub trait Artifacts: Send + Sync {
    /// Build the human review packet for a claim.
    async fn review_packet(&self, record: &ClaimRecord) -> Result<RenderedDoc, RenderError>;

    /// Draft the customer response for a decision.
    async fn customer_response(
        &self,
        record: &ClaimRecord,
        decision: Recommendation,
    ) -> Result<RenderedDoc, RenderError>;

    /// Produce a return shipping label artifact, returning its path.
    async fn return_label(&self, record: &ClaimRecord) -> Result<String, RenderError>;

    /// Write the end-of-pipeline summary for a completed claim.
    async fn claim_summary(&self, record: &ClaimRecord) -> Result<String, RenderError>;
}

/// Text/markdown artifact renderer writing under the outbox directory.
pub struct TextArtifacts {
    outbox: PathBuf,
    company: CompanyIdentity,
    return_address: ReturnAddress,
}

impl TextArtifacts {
    pub fn new(outbox: PathBuf, company: CompanyIdentity, return_address: ReturnAddress) -> Self {
        Self {
            outbox,
            company,
            return_address,
        }
    }

    async fn write(&self, subdir: &str, file: &str, content: &str) -> Result<String, RenderError> {
        let dir = self.outbox.join(subdir);
        fs::create_dir_all(&dir).await?;
        let path = dir.join(file);
        fs::write(&path, content).await?;
        Ok(path.to_string_lossy().to_string())
    }
}

#[async_trait]
impl Artifacts for TextArtifacts {
    async fn review_packet(&self, record: &ClaimRecord) -> Result<RenderedDoc, RenderError> {
        let content = render_review_packet(record);
        let path = self
            .write("review_packets", &format!("{}.md", record.claim_id), &content)
            .await?;
        info!(claim_id = %record.claim_id, path = %path, "Review packet written");
        Ok(RenderedDoc { content, path })
    }

    async fn customer_response(
        &self,
        record: &ClaimRecord,
        decision: Recommendation,
    ) -> Result<RenderedDoc, RenderError> {
        let content = render_customer_response(record, decision, &self.company);
        let path = self
            .write("emails", &format!("{}.txt", record.claim_id), &content)
            .await?;
        info!(claim_id = %record.claim_id, path = %path, "Customer response drafted");
        Ok(RenderedDoc { content, path })
    }

    async fn return_label(&self, record: &ClaimRecord) -> Result<String, RenderError> {
        let content = render_text_label(record, &self.return_address, &self.company);
        let path = self
            .write("labels", &format!("{}_label.txt", record.claim_id), &content)
            .await?;
        info!(claim_id = %record.claim_id, path = %path, "Return label generated");
        Ok(path)
    }

    async fn claim_summary(&self, record: &ClaimRecord) -> Result<String, RenderError> {
        let mut lines = vec![
            format!("Claim Processing Summary: {}", record.claim_id),
            "=".repeat(50),
            String::new(),
            format!("Status: {}", record.status),
            format!(
                "Decision: {}",
                record
                    .decision
                    .as_ref()
                    .map(|d| d.decision.to_string())
                    .unwrap_or_else(|| "N/A".to_string())
            ),
            String::new(),
            "Generated Files:".to_string(),
        ];
        if let Some(path) = &record.outputs.review_packet_path {
            lines.push(format!("  - Review Packet: {path}"));
        }
        if let Some(path) = &record.outputs.response_path {
            lines.push(format!("  - Customer Email: {path}"));
        }
        if let Some(path) = &record.outputs.return_label_path {
            lines.push(format!("  - Return Label: {path}"));
        }
        lines.push(String::new());
        lines.push(format!(
            "Processed: {}",
            Utc::now().format("%Y-%m-%d %H:%M:%S")
        ));

        self.write(
            "",
            &format!("{}_summary.txt", record.claim_id),
            &lines.join("\n"),
        )
        .await
    }
}

/// Generate a mock tracking number.
fn tracking_number() -> String {
    let suffix: u32 = rand::thread_rng().gen_range(100_000..1_000_000);
    format!("MRD{}{}", Utc::now().format("%Y%m%d"), suffix)
}

/// Render a text-based return shipping label.
fn render_text_label(
    record: &ClaimRecord,
    company_address: &ReturnAddress,
    company: &CompanyIdentity,
) -> String {
    let extracted = record.extracted.clone().unwrap_or_default();
    let customer_block = match (
        extracted.customer_name.as_deref(),
        extracted.customer_address.as_deref(),
    ) {
        (Some(name), Some(addr)) => format!("{name}\n  {addr}"),
        (None, Some(addr)) => addr.to_string(),
        (Some(name), None) => name.to_string(),
        (None, None) => "Customer Address Not Provided".to_string(),
    };
    let tracking = tracking_number();
    let rma = format!("RMA-{}", record.claim_id);

    format!(
        r#"+------------------------------------------------------------------+
|                    PREPAID RETURN LABEL                          |
|                    {company_name}
|                    Warranty Return Service                       |
+------------------------------------------------------------------+
|
|  FROM:
|  {customer_block}
|
|  TO:
|  {to_name}
|  {to_street}
|  {to_city}, {to_state} {to_zip}
|  {to_country}
|
+------------------------------------------------------------------+
|
|  RMA Number: {rma}
|  Tracking:   {tracking}
|
|                    PRIORITY MAIL                                 |
|              PREPAID - NO POSTAGE REQUIRED                       |
|
+------------------------------------------------------------------+
|  INSTRUCTIONS:                                                   |
|  1. Pack the product securely in original packaging              |
|  2. Include a copy of your warranty claim email                  |
|  3. Affix this label to the outside of the package               |
|  4. Drop off at any postal service location                      |
+------------------------------------------------------------------+
|  Generated: {generated} | Claim: {claim_id} | Valid: 30 days
|  Questions? {support_email} | {support_phone}
+------------------------------------------------------------------+
"#,
        company_name = company.name,
        customer_block = customer_block,
        to_name = company_address.name,
        to_street = company_address.street,
        to_city = company_address.city,
        to_state = company_address.state,
        to_zip = company_address.zip,
        to_country = company_address.country,
        rma = rma,
        tracking = tracking,
        generated = Utc::now().format("%Y-%m-%d %H:%M"),
        claim_id = record.claim_id,
        support_email = company.support_email,
        support_phone = company.support_phone,
    )
}

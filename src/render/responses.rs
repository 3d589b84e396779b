//! Customer response drafts, one template per decision.
//!
//! The first line carries the subject (`Subject: ...`); the dispatch layer
//! splits it off before sending.

use crate::claim::{ClaimRecord, Recommendation, TriageLabel};
use crate::config::CompanyIdentity;

/// Render the customer response draft for a decision.
///
/// NON_CLAIM and SPAM messages get the redirect template regardless of the
/// decision value.
pub fn render_customer_response(
    record: &ClaimRecord,
    decision: Recommendation,
    company: &CompanyIdentity,
) -> String {
    let extracted = record.extracted.clone().unwrap_or_default();
    let customer_name = extracted
        .customer_name
        .clone()
        .unwrap_or_else(|| "Valued Customer".to_string());
    let product_name = record.product_display_name();
    let issue_summary: String = extracted
        .issue_description
        .as_deref()
        .unwrap_or("Product issue")
        .chars()
        .take(100)
        .collect();

    let is_claim = record
        .triage
        .as_ref()
        .map(|t| t.label == TriageLabel::Claim)
        .unwrap_or(true);
    if !is_claim {
        return non_claim_response(record, &customer_name, company);
    }

    match decision {
        Recommendation::Approve => approval_response(
            record,
            &customer_name,
            &product_name,
            &issue_summary,
            company,
        ),
        Recommendation::Reject => rejection_response(
            record,
            &customer_name,
            &product_name,
            &issue_summary,
            company,
        ),
        Recommendation::NeedInfo => need_info_response(
            record,
            &customer_name,
            &product_name,
            &issue_summary,
            company,
        ),
    }
}

fn approval_response(
    record: &ClaimRecord,
    customer_name: &str,
    product_name: &str,
    issue_summary: &str,
    company: &CompanyIdentity,
) -> String {
    format!(
        r#"Subject: Your Warranty Claim Has Been Approved - {claim_id}

Dear {customer_name},

Thank you for contacting {company_name} regarding your warranty claim for the {product_name}.

We are pleased to inform you that your warranty claim has been APPROVED.

CLAIM DETAILS:
- Claim ID: {claim_id}
- Product: {product_name}
- Issue: {issue_summary}

NEXT STEPS:
1. A prepaid return shipping label is attached to this email
2. Please pack your {product_name} securely in its original packaging if available
3. Drop off the package at any authorized shipping location
4. Once we receive your product, we will process your replacement within 5-7 business days

IMPORTANT:
- Please include a copy of this email in your package
- Keep your tracking number for reference
- Do not include any accessories unless specifically requested

If you have any questions, please reply to this email or call us at {support_phone}.

Thank you for choosing {company_name}!

Best regards,
{company_name} Customer Support Team
{support_email}
"#,
        claim_id = record.claim_id,
        customer_name = customer_name,
        company_name = company.name,
        product_name = product_name,
        issue_summary = issue_summary,
        support_phone = company.support_phone,
        support_email = company.support_email,
    )
}

fn rejection_response(
    record: &ClaimRecord,
    customer_name: &str,
    product_name: &str,
    issue_summary: &str,
    company: &CompanyIdentity,
) -> String {
    let analysis = record.analysis.as_ref();
    let mut rejection_reason = analysis
        .map(|a| a.reasoning.clone())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| "Based on our warranty policy review.".to_string());
    let exclusions = analysis
        .map(|a| a.exclusions_triggered.clone())
        .unwrap_or_default();
    if !exclusions.is_empty() {
        rejection_reason.push_str("\n\nExclusions that apply:\n- ");
        rejection_reason.push_str(&exclusions.join("\n- "));
    }
    let policy_refs = analysis
        .map(|a| a.policy_references.clone())
        .unwrap_or_default();
    let policy_reference = if policy_refs.is_empty() {
        "Standard warranty terms".to_string()
    } else {
        policy_refs.join(", ")
    };

    format!(
        r#"Subject: Regarding Your Warranty Claim - {claim_id}

Dear {customer_name},

Thank you for contacting {company_name} regarding your warranty claim for the {product_name}.

After careful review, we regret to inform you that your warranty claim cannot be approved at this time.

CLAIM DETAILS:
- Claim ID: {claim_id}
- Product: {product_name}
- Issue: {issue_summary}

REASON FOR DECISION:
{rejection_reason}

POLICY REFERENCE:
{policy_reference}

YOUR OPTIONS:
1. Out-of-Warranty Repair: We offer repair services at a reduced cost. Contact us for a quote.
2. Replacement Discount: Use code LOYAL20 for 20% off a new {product_name}.
3. Appeal: If you believe this decision was made in error, you may submit additional documentation.

To appeal this decision, please reply to this email with any additional evidence or clarification within 14 days.

We value your business and hope to serve you again in the future.

Best regards,
{company_name} Customer Support Team
{support_email}
"#,
        claim_id = record.claim_id,
        customer_name = customer_name,
        company_name = company.name,
        product_name = product_name,
        issue_summary = issue_summary,
        rejection_reason = rejection_reason,
        policy_reference = policy_reference,
        support_email = company.support_email,
    )
}

fn need_info_response(
    record: &ClaimRecord,
    customer_name: &str,
    product_name: &str,
    issue_summary: &str,
    company: &CompanyIdentity,
) -> String {
    let mut missing = record
        .extracted
        .as_ref()
        .map(|e| e.missing_fields.clone())
        .unwrap_or_default();
    if missing.is_empty() {
        missing = vec![
            "Additional details about the issue".to_string(),
            "Proof of purchase".to_string(),
        ];
    }
    let missing_items = missing
        .iter()
        .map(|item| format!("- {item}"))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Subject: Additional Information Needed for Your Warranty Claim - {claim_id}

Dear {customer_name},

Thank you for contacting {company_name} regarding your warranty claim.

To process your claim, we need some additional information:

MISSING INFORMATION:
{missing_items}

WHAT YOU'VE PROVIDED:
- Product: {product_name}
- Issue: {issue_summary}

HOW TO RESPOND:
Please reply to this email with the missing information listed above. You can also attach any relevant documents such as:
- Proof of purchase (receipt, order confirmation, credit card statement)
- Photos of the product defect
- Product serial number (usually found on the handle or base)

Once we receive the complete information, we will process your claim within 2-3 business days.

If you have any questions, please don't hesitate to reach out.

Best regards,
{company_name} Customer Support Team
{support_email}
"#,
        claim_id = record.claim_id,
        customer_name = customer_name,
        company_name = company.name,
        product_name = product_name,
        issue_summary = if issue_summary.is_empty() {
            "Not yet provided"
        } else {
            issue_summary
        },
        missing_items = missing_items,
        support_email = company.support_email,
    )
}

fn non_claim_response(
    record: &ClaimRecord,
    customer_name: &str,
    company: &CompanyIdentity,
) -> String {
    let subject_summary: String = if record.message.subject.is_empty() {
        "your inquiry".to_string()
    } else {
        record.message.subject.chars().take(50).collect()
    };

    format!(
        r#"Subject: Thank You for Contacting {company_name} - {claim_id}

Dear {customer_name},

Thank you for reaching out to {company_name}!

We've received your inquiry regarding {subject_summary}. Since this doesn't appear to be a warranty-related request, we'd like to direct you to the appropriate team who can best assist you.

FOR PRODUCT INQUIRIES:
- Email our sales team for product recommendations
- Call {support_phone} (option 2)

FOR WARRANTY CLAIMS:
If you do have a warranty-related issue with a {company_name} product, please reply to this email with:
- Your product name and serial number
- Date and place of purchase
- Description of the issue you're experiencing

We're here to help and appreciate your interest in our products!

Best regards,
{company_name} Customer Support Team
{support_email}
"#,
        company_name = company.name,
        claim_id = record.claim_id,
        customer_name = customer_name,
        subject_summary = subject_summary,
        support_phone = company.support_phone,
        support_email = company.support_email,
    )
}

//! Prompt builders for the three reasoning calls.
//!
//! Every prompt demands a bare JSON object; `strip_code_fences` cleans up
//! models that wrap it in markdown anyway.

use crate::intake::RawMessage;
use crate::llm::AnalysisContext;

/// Cap on message body length fed to the triage call.
const TRIAGE_BODY_LIMIT: usize = 2000;
/// Cap on combined body + attachment text fed to the extraction call.
const EXTRACTION_BODY_LIMIT: usize = 4500;

/// Strip a leading/trailing markdown code fence from a model response.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag (e.g. "json") up to the first newline.
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn attachments_line(attachments: &[String]) -> String {
    if attachments.is_empty() {
        "None".to_string()
    } else {
        attachments.join(", ")
    }
}

/// Prompt for classifying a message as CLAIM / NON_CLAIM / SPAM.
pub fn triage_prompt(company: &str, message: &RawMessage) -> String {
    format!(
        r#"You are a warranty claims email classifier for {company}.

Analyze the following email and classify it into one of these categories:
1. CLAIM - A warranty claim or request for warranty service for a product defect
2. NON_CLAIM - A legitimate email but not a warranty claim (product inquiry, general question, feedback)
3. SPAM - Promotional, phishing, or irrelevant email

Email details:
From: {from}
Subject: {subject}
Date: {date}

Body:
{body}

Attachments: {attachments}

Respond with ONLY a JSON object in this exact format:
{{
    "classification": "CLAIM" or "NON_CLAIM" or "SPAM",
    "confidence": 0.0 to 1.0,
    "reason": "Brief explanation of classification"
}}"#,
        company = company,
        from = message.from,
        subject = message.subject,
        date = message
            .date
            .map(|d| d.to_rfc3339())
            .unwrap_or_default(),
        body = truncate(&message.body, TRIAGE_BODY_LIMIT),
        attachments = attachments_line(&message.attachments),
    )
}

/// Prompt for extracting structured claim fields.
pub fn extraction_prompt(company: &str, message: &RawMessage) -> String {
    format!(
        r#"You are extracting warranty claim information from an email for {company}.

Extract the following fields from the email.
- Look for the customer name in the email signature (e.g. "Sincerely, [Name]" or "Thanks, [Name]").
- Look for address/phone in the signature block.
- If a field is not clearly stated, set it to null.
- Do NOT infer the purchase date from the email 'Date' header. Only use dates explicitly mentioned in the body as the purchase date.

Email:
From: {from}
Subject: {subject}
Date: {date}

Body:
{body}

Attachments mentioned: {attachments}

Extract and respond with ONLY a JSON object in this exact format:
{{
    "customer_name": "Full name (check signature) or null",
    "customer_email": "Email address or null",
    "customer_phone": "Phone number or null",
    "customer_address": "Full address or null",
    "product_name": "Product name/model mentioned or null",
    "product_serial": "Serial number or null",
    "purchase_date": "YYYY-MM-DD format or null",
    "purchase_location": "Where purchased or null",
    "order_number": "Order/confirmation number or null",
    "issue_description": "Description of the problem or null",
    "has_proof_of_purchase": true or false
}}"#,
        company = company,
        from = message.from,
        subject = message.subject,
        date = message
            .date
            .map(|d| d.to_rfc3339())
            .unwrap_or_default(),
        body = truncate(&message.combined_text(), EXTRACTION_BODY_LIMIT).to_string(),
        attachments = attachments_line(&message.attachments),
    )
}

/// Prompt for the final analysis recommendation.
pub fn analysis_prompt(company: &str, ctx: &AnalysisContext) -> String {
    format!(
        r#"You are a warranty claims analyst for {company}.

Analyze this warranty claim and provide a recommendation.

## Claim Details
- Customer: {customer}
- Product: {product} ({product_id})
- Purchase Date: {purchase_date}
- Issue: {issue}
- Has Proof of Purchase: {has_proof}
- Serial Number: {serial}

## Warranty Window Check
{warranty_check}

## Relevant Policy Excerpts

{excerpts}

## Missing Information
{missing}

---

Analyze this claim carefully.
1. Is the purchase within the warranty window? (See Warranty Window Check)
2. Is the issue a product defect? (Examples: stopped working, no heat, bad switch, won't turn on).
3. Do any exclusions apply? (Damage, misuse, water, commercial use).

IMPORTANT RULES:
- If the warranty is VALID and the issue is a DEFECT, you MUST recommend **APPROVE**.
- Do NOT reject for lack of detail if the customer states the product stopped working.
- Only REJECT if there is a clear policy violation (e.g. warranty expired, water damage, misuse).
- If unsure, use NEED_INFO.

Respond with ONLY a JSON object:
{{
    "recommendation": "APPROVE" or "REJECT" or "NEED_INFO",
    "confidence": 0.0 to 1.0,
    "facts": ["list of verified facts"],
    "assumptions": ["list of assumptions made"],
    "reasoning": "Detailed explanation of the recommendation",
    "policy_references": ["list of policy sections that apply"],
    "exclusions_triggered": ["list of any exclusions that apply, empty if none"]
}}"#,
        company = company,
        customer = ctx.customer_name,
        product = ctx.product_name,
        product_id = ctx.product_id,
        purchase_date = ctx.purchase_date,
        issue = ctx.issue_description,
        has_proof = ctx.has_proof_of_purchase,
        serial = ctx.serial_number,
        warranty_check = ctx.warranty_check,
        excerpts = ctx.policy_excerpts,
        missing = ctx.missing_fields,
    )
}

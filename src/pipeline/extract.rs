//! Field extraction: normalizers, regex fallbacks, and the deterministic
//! extractor used when no model is available (or its response is unusable).
//!
//! The model's extraction payload also passes through here — every field is
//! normalized and regex fallbacks fill gaps the model left, so downstream
//! stages see one consistent shape either way.

use chrono::NaiveDate;
use regex::Regex;
use std::sync::OnceLock;

use crate::catalog::{Product, normalize};
use crate::claim::ExtractedFields;
use crate::intake::RawMessage;
use crate::llm::ExtractionWire;

/// Label used when no contact method is present.
pub const CONTACT_INFO_LABEL: &str = "contact_info (email, phone, or address)";

fn phone_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\+?1[\s.\-]?)?\(?\d{3}\)?[\s.\-]?\d{3}[\s.\-]?\d{4}").unwrap()
    })
}

fn serial_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(serial number|serial|s/n|sn)\s*[:#]?\s*([A-Za-z0-9\-]{4,})").unwrap()
    })
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}\b").unwrap()
    })
}

fn proof_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(receipt|order|confirmation|invoice|proof of purchase)\b").unwrap()
    })
}

// ── Normalizers ─────────────────────────────────────────────────────

/// Normalize a date string to a `NaiveDate`, trying common formats and
/// falling back to pattern extraction.
pub fn normalize_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    const FORMATS: &[&str] = &[
        "%Y-%m-%d",
        "%m/%d/%Y",
        "%m-%d-%Y",
        "%B %d, %Y",
        "%b %d, %Y",
        "%B %d %Y",
        "%b %d %Y",
        "%d %B %Y",
        "%d %b %Y",
        "%Y/%m/%d",
    ];
    for format in FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(date);
        }
    }

    // Pull a date-shaped substring out of longer text and retry.
    extract_date_from_text(trimmed)
}

/// Normalize a phone number to `###-###-####` when possible.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let mut digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 11 && digits.starts_with('1') {
        digits.remove(0);
    }
    if digits.len() == 10 {
        return Some(format!(
            "{}-{}-{}",
            &digits[0..3],
            &digits[3..6],
            &digits[6..]
        ));
    }
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Normalize serial numbers to uppercase alphanumerics with hyphens.
pub fn normalize_serial(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect::<String>()
        .to_uppercase();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Normalize address spacing and line breaks into a single line.
pub fn normalize_address(raw: &str) -> Option<String> {
    let parts: Vec<&str> = raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if parts.is_empty() {
        return None;
    }
    let joined = parts.join(", ");
    let collapsed = joined.split_whitespace().collect::<Vec<_>>().join(" ");
    let cleaned = collapsed.trim_matches(|c| c == ' ' || c == ',').to_string();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

// ── Regex extractors ────────────────────────────────────────────────

/// Extract a phone number from free-form text.
pub fn extract_phone_from_text(text: &str) -> Option<String> {
    phone_re()
        .find(text)
        .and_then(|m| normalize_phone(m.as_str()))
}

/// Extract a serial number from free-form text.
pub fn extract_serial_from_text(text: &str) -> Option<String> {
    serial_re()
        .captures(text)
        .and_then(|caps| caps.get(2))
        .and_then(|m| normalize_serial(m.as_str()))
}

/// Extract a date from free-form text.
pub fn extract_date_from_text(text: &str) -> Option<NaiveDate> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r"\b\d{4}-\d{1,2}-\d{1,2}\b").unwrap(),
            Regex::new(r"\b\d{1,2}/\d{1,2}/\d{4}\b").unwrap(),
            Regex::new(r"\b\d{1,2}-\d{1,2}-\d{4}\b").unwrap(),
            Regex::new(
                r"(?i)\b(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)[a-z]*\s+\d{1,2},?\s+\d{4}\b",
            )
            .unwrap(),
        ]
    });

    for pattern in patterns {
        if let Some(m) = pattern.find(text) {
            let candidate = m.as_str().replace(',', ", ").replace(",  ", ", ");
            const FORMATS: &[&str] = &[
                "%Y-%m-%d",
                "%m/%d/%Y",
                "%m-%d-%Y",
                "%B %d, %Y",
                "%b %d, %Y",
                "%B %d %Y",
                "%b %d %Y",
            ];
            for format in FORMATS {
                if let Ok(date) = NaiveDate::parse_from_str(candidate.trim(), format) {
                    return Some(date);
                }
            }
        }
    }
    None
}

/// Extract a likely street address from free-form text.
pub fn extract_address_from_text(text: &str) -> Option<String> {
    static STREET_RE: OnceLock<Regex> = OnceLock::new();
    static CITY_STATE_RE: OnceLock<Regex> = OnceLock::new();
    let street_re = STREET_RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b\d{1,6}\s+\w+.*\b(street|st|avenue|ave|road|rd|blvd|boulevard|lane|ln|drive|dr|court|ct|way|circle|cir|parkway|pkwy)\b",
        )
        .unwrap()
    });
    let city_state_re = CITY_STATE_RE
        .get_or_init(|| Regex::new(r"\b[A-Z]{2}\b\s+\d{5}(-\d{4})?\b").unwrap());

    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    for (idx, line) in lines.iter().enumerate() {
        if street_re.is_match(line) {
            let mut parts = vec![*line];
            if let Some(next) = lines.get(idx + 1) {
                if city_state_re.is_match(&next.to_uppercase()) {
                    parts.push(next);
                }
            }
            return normalize_address(&parts.join(", "));
        }
    }

    lines
        .iter()
        .find(|line| city_state_re.is_match(&line.to_uppercase()))
        .and_then(|line| normalize_address(line))
}

/// Extract an order/confirmation number from free-form text.
pub fn extract_order_number(text: &str) -> Option<String> {
    static LABELED_RE: OnceLock<Regex> = OnceLock::new();
    static AMAZON_RE: OnceLock<Regex> = OnceLock::new();
    let labeled = LABELED_RE.get_or_init(|| {
        Regex::new(r"(?i)\b(order number|order|confirmation)\s*[:#]?\s*([A-Za-z0-9\-]{6,})\b")
            .unwrap()
    });
    let amazon = AMAZON_RE.get_or_init(|| Regex::new(r"\b\d{3}-\d{7}-\d{7}\b").unwrap());

    if let Some(caps) = labeled.captures(text) {
        if let Some(m) = caps.get(2) {
            return Some(m.as_str().trim().to_string());
        }
    }
    amazon.find(text).map(|m| m.as_str().to_string())
}

/// Pull a customer name from the signature block.
pub fn extract_name_from_signature(body: &str) -> Option<String> {
    let lines: Vec<&str> = body
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if lines.is_empty() {
        return None;
    }

    let looks_like_name = |candidate: &str| {
        let candidate = candidate.trim_matches(|c| c == ' ' || c == ',');
        (1..=60).contains(&candidate.len())
            && !candidate.contains('@')
            && !candidate.chars().any(|c| c.is_ascii_digit())
    };

    let markers = ["thanks", "thank you", "sincerely", "regards", "best", "cheers"];
    for (idx, line) in lines.iter().enumerate() {
        let low = line.to_lowercase();
        let low = low.trim_matches(|c| c == ' ' || c == ':' || c == ',');
        if markers.iter().any(|m| low.starts_with(m) || low == *m) {
            if let Some(next) = lines.get(idx + 1) {
                if looks_like_name(next) {
                    return Some(next.trim_matches(|c| c == ' ' || c == ',').to_string());
                }
            }
        }
    }

    // Fallback: last line if it looks like a bare name.
    let tail = lines[lines.len() - 1];
    if looks_like_name(tail) {
        return Some(tail.trim_matches(|c| c == ' ' || c == ',').to_string());
    }
    None
}

/// Best-effort product detection against the catalog: longest normalized
/// name or alias contained in the text wins.
pub fn find_product_in_text(text: &str, products: &[Product]) -> Option<String> {
    let haystack = normalize(text);
    if haystack.is_empty() {
        return None;
    }

    let mut best: Option<(&str, usize)> = None;
    for product in products {
        let mut names: Vec<&str> = vec![&product.name];
        names.extend(product.aliases.iter().map(String::as_str));
        for name in names {
            let needle = normalize(name);
            if needle.is_empty() || !haystack.contains(&needle) {
                continue;
            }
            if best.map(|(_, len)| needle.len() > len).unwrap_or(true) {
                best = Some((&product.name, needle.len()));
            }
        }
    }
    best.map(|(name, _)| name.to_string())
}

fn detect_proof_of_purchase(message: &RawMessage) -> bool {
    let proof_keywords = ["receipt", "order", "confirmation", "invoice"];
    let in_attachments = message.attachments.iter().any(|att| {
        let att = att.to_lowercase();
        proof_keywords.iter().any(|kw| att.contains(kw))
    });
    in_attachments || proof_re().is_match(&message.combined_text().to_lowercase())
}

fn detect_issue_description(message: &RawMessage) -> Option<String> {
    let keywords = [
        "stopped working",
        "not working",
        "won't",
        "doesn't",
        "no heat",
        "no power",
        "broken",
        "defect",
    ];
    for line in message.body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let low = line.to_lowercase();
        if keywords.iter().any(|kw| low.contains(kw)) {
            return Some(line.to_string());
        }
    }
    let body = message.body.trim();
    if body.is_empty() {
        None
    } else {
        Some(body.chars().take(400).collect())
    }
}

// ── Missing fields ──────────────────────────────────────────────────

/// Identify which required fields are missing from an extraction.
pub fn identify_missing_fields(fields: &ExtractedFields) -> Vec<String> {
    let mut missing = Vec::new();
    if fields.customer_name.is_none() {
        missing.push("customer_name".to_string());
    }
    if fields.product_name.is_none() {
        missing.push("product_name".to_string());
    }
    if fields.purchase_date.is_none() {
        missing.push("purchase_date".to_string());
    }
    if fields.issue_description.is_none() {
        missing.push("issue_description".to_string());
    }
    if !fields.has_contact_method() {
        missing.push(CONTACT_INFO_LABEL.to_string());
    }
    missing
}

// ── Extractors ──────────────────────────────────────────────────────

/// Deterministic extraction from the raw message, used when no model is
/// available or its response was unusable.
pub fn deterministic_extract(message: &RawMessage, products: &[Product]) -> ExtractedFields {
    let source = message.combined_text();

    let customer_email = if message.from.contains('@') {
        Some(message.from.trim().to_string())
    } else {
        email_re().find(&source).map(|m| m.as_str().to_string())
    };

    let mut fields = ExtractedFields {
        customer_name: extract_name_from_signature(&message.body),
        customer_email,
        customer_phone: extract_phone_from_text(&source),
        customer_address: extract_address_from_text(&source),
        product_name: find_product_in_text(&source, products),
        product_serial: extract_serial_from_text(&source),
        purchase_date: extract_date_from_text(&source),
        purchase_location: None,
        order_number: extract_order_number(&source),
        issue_description: detect_issue_description(message),
        has_proof_of_purchase: detect_proof_of_purchase(message),
        missing_fields: Vec::new(),
    };
    fields.missing_fields = identify_missing_fields(&fields);
    fields
}

/// Normalize a model extraction payload and fill its gaps with the regex
/// fallbacks, producing the same shape as `deterministic_extract`.
pub fn refine_wire_extraction(
    wire: ExtractionWire,
    message: &RawMessage,
    products: &[Product],
) -> ExtractedFields {
    let source = message.combined_text();
    let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

    let customer_email = non_empty(wire.customer_email).or_else(|| {
        if message.from.contains('@') {
            Some(message.from.trim().to_string())
        } else {
            None
        }
    });
    let customer_phone = non_empty(wire.customer_phone)
        .and_then(|p| normalize_phone(&p))
        .or_else(|| extract_phone_from_text(&source));
    let product_serial = non_empty(wire.product_serial)
        .and_then(|s| normalize_serial(&s))
        .or_else(|| extract_serial_from_text(&source));
    let customer_address = non_empty(wire.customer_address)
        .and_then(|a| normalize_address(&a))
        .or_else(|| extract_address_from_text(&source));
    let purchase_date = non_empty(wire.purchase_date)
        .and_then(|d| normalize_date(&d))
        .or_else(|| extract_date_from_text(&source));

    let has_proof = wire.has_proof_of_purchase || detect_proof_of_purchase(message);

    let mut fields = ExtractedFields {
        customer_name: non_empty(wire.customer_name),
        customer_email,
        customer_phone,
        customer_address,
        product_name: non_empty(wire.product_name)
            .or_else(|| find_product_in_text(&source, products)),
        product_serial,
        purchase_date,
        purchase_location: non_empty(wire.purchase_location),
        order_number: non_empty(wire.order_number).or_else(|| extract_order_number(&source)),
        issue_description: non_empty(wire.issue_description),
        has_proof_of_purchase: has_proof,
        missing_fields: Vec::new(),
    };
    fields.missing_fields = identify_missing_fields(&fields);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    fn products() -> Vec<Product> {
        vec![Product {
            product_id: "MD-PRO-001".into(),
            name: "ProDry 3000".into(),
            category: None,
            aliases: vec!["prodry".into()],
            policy_file: None,
        }]
    }

    fn message(body: &str) -> RawMessage {
        RawMessage {
            id: "m".into(),
            from: "pat.doyle@example.com".into(),
            to: String::new(),
            subject: "Warranty claim".into(),
            date: None,
            body: body.into(),
            attachments: vec![],
            attachment_text: None,
        }
    }

    #[test]
    fn normalizes_common_date_formats() {
        for raw in [
            "2025-05-01",
            "05/01/2025",
            "05-01-2025",
            "May 1, 2025",
            "May 1 2025",
            "1 May 2025",
            "2025/05/01",
        ] {
            assert_eq!(
                normalize_date(raw),
                Some("2025-05-01".parse().unwrap()),
                "failed for {raw}"
            );
        }
        assert_eq!(normalize_date("no date here"), None);
        assert_eq!(normalize_date(""), None);
    }

    #[test]
    fn date_extracted_from_sentence() {
        let date = normalize_date("I bought it on May 1, 2025 at the outlet");
        assert_eq!(date, Some("2025-05-01".parse().unwrap()));
    }

    #[test]
    fn normalizes_phone_variants() {
        assert_eq!(normalize_phone("(555) 201-3344").as_deref(), Some("555-201-3344"));
        assert_eq!(normalize_phone("1-555-201-3344").as_deref(), Some("555-201-3344"));
        assert_eq!(normalize_phone("+1 555.201.3344").as_deref(), Some("555-201-3344"));
        // Unrecognized shapes pass through trimmed.
        assert_eq!(normalize_phone(" 12345 ").as_deref(), Some("12345"));
        assert_eq!(normalize_phone(""), None);
    }

    #[test]
    fn normalizes_serial() {
        assert_eq!(normalize_serial("pd3k-99812 ").as_deref(), Some("PD3K-99812"));
        assert_eq!(normalize_serial("s/n: pd3k").as_deref(), Some("SNPD3K"));
        assert_eq!(normalize_serial("  "), None);
    }

    #[test]
    fn normalizes_multiline_address() {
        let addr = normalize_address("123 Oak St\nColumbus,  OH 43085\n");
        assert_eq!(addr.as_deref(), Some("123 Oak St, Columbus, OH 43085"));
    }

    #[test]
    fn extracts_serial_with_label() {
        assert_eq!(
            extract_serial_from_text("Serial Number: PD3K-99812, purchased in May"),
            Some("PD3K-99812".to_string())
        );
        assert_eq!(
            extract_serial_from_text("s/n pd3k-100").as_deref(),
            Some("PD3K-100")
        );
        assert_eq!(extract_serial_from_text("no serial mentioned here at all"), None);
    }

    #[test]
    fn extracts_address_with_city_line() {
        let text = "Please ship a replacement.\n123 Oak Street\nColumbus, OH 43085\nThanks";
        let addr = extract_address_from_text(text).unwrap();
        assert!(addr.contains("123 Oak Street"));
        assert!(addr.contains("OH 43085"));
    }

    #[test]
    fn extracts_order_number() {
        assert_eq!(
            extract_order_number("My order #A1B2C3D4 from last month"),
            Some("A1B2C3D4".to_string())
        );
        assert_eq!(
            extract_order_number("Confirmation: 118-2203944-1123456"),
            Some("118-2203944-1123456".to_string())
        );
        assert_eq!(extract_order_number("nothing here"), None);
    }

    #[test]
    fn extracts_name_after_signoff() {
        let body = "My dryer broke.\n\nThanks,\nPat Doyle";
        assert_eq!(extract_name_from_signature(body).as_deref(), Some("Pat Doyle"));
    }

    #[test]
    fn signature_skips_lines_with_digits_or_email() {
        let body = "It broke.\n\nRegards,\npat@example.com";
        // The line after the marker has an @, the fallback (last line) does
        // too, so no name is found.
        assert_eq!(extract_name_from_signature(body), None);
    }

    #[test]
    fn finds_product_by_alias() {
        let found = find_product_in_text("my prodry quit on me", &products());
        assert_eq!(found.as_deref(), Some("ProDry 3000"));
        assert_eq!(find_product_in_text("my toaster quit", &products()), None);
    }

    #[test]
    fn missing_fields_include_contact_label() {
        let fields = ExtractedFields::default();
        let missing = identify_missing_fields(&fields);
        assert!(missing.contains(&"customer_name".to_string()));
        assert!(missing.contains(&CONTACT_INFO_LABEL.to_string()));

        let with_contact = ExtractedFields {
            customer_phone: Some("555-201-3344".into()),
            ..Default::default()
        };
        assert!(!identify_missing_fields(&with_contact).contains(&CONTACT_INFO_LABEL.to_string()));
    }

    #[test]
    fn deterministic_extract_pulls_everything_available() {
        let body = "Hello,\n\nMy ProDry 3000 stopped working after two weeks.\n\
                    Serial: PD3K-99812\nBought on 2025-05-01, receipt attached.\n\
                    You can reach me at (555) 201-3344.\n123 Oak Street\nColumbus, OH 43085\n\n\
                    Thanks,\nPat Doyle";
        let fields = deterministic_extract(&message(body), &products());
        assert_eq!(fields.customer_name.as_deref(), Some("Pat Doyle"));
        assert_eq!(fields.customer_email.as_deref(), Some("pat.doyle@example.com"));
        assert_eq!(fields.customer_phone.as_deref(), Some("555-201-3344"));
        assert_eq!(fields.product_name.as_deref(), Some("ProDry 3000"));
        assert_eq!(fields.product_serial.as_deref(), Some("PD3K-99812"));
        assert_eq!(fields.purchase_date, Some("2025-05-01".parse().unwrap()));
        assert!(fields.customer_address.as_deref().unwrap().contains("Oak Street"));
        assert!(fields.has_proof_of_purchase);
        assert!(fields
            .issue_description
            .as_deref()
            .unwrap()
            .contains("stopped working"));
        assert!(fields.missing_fields.is_empty());
    }

    #[test]
    fn refine_wire_fills_gaps_and_normalizes() {
        let wire = ExtractionWire {
            customer_name: Some("Pat Doyle".into()),
            customer_phone: Some("(555) 201 3344".into()),
            purchase_date: Some("May 1, 2025".into()),
            issue_description: Some("heating element stopped producing heat".into()),
            ..Default::default()
        };
        let body = "Serial: PD3K-99812. Receipt attached.";
        let fields = refine_wire_extraction(wire, &message(body), &products());
        assert_eq!(fields.customer_phone.as_deref(), Some("555-201-3344"));
        assert_eq!(fields.purchase_date, Some("2025-05-01".parse().unwrap()));
        // Serial comes from the regex fallback, email from the sender.
        assert_eq!(fields.product_serial.as_deref(), Some("PD3K-99812"));
        assert_eq!(fields.customer_email.as_deref(), Some("pat.doyle@example.com"));
        assert!(fields.has_proof_of_purchase);
    }

    #[test]
    fn refine_wire_treats_empty_strings_as_missing() {
        let wire = ExtractionWire {
            customer_name: Some("  ".into()),
            ..Default::default()
        };
        let fields = refine_wire_extraction(wire, &message("nothing useful"), &products());
        assert!(fields.customer_name.is_none());
        assert!(fields.missing_fields.contains(&"customer_name".to_string()));
    }
}

//! Policy-specific requirement predicates.
//!
//! Each requirement token attached to a policy maps to a predicate over
//! the extracted fields, attachments, and message body. Tokens without a
//! predicate are ignored rather than failed.

use regex::Regex;
use std::sync::OnceLock;

use crate::claim::ExtractedFields;

const US_STATES: &[&str] = &[
    "AL", "AK", "AZ", "AR", "CA", "CO", "CT", "DE", "FL", "GA", "HI", "ID", "IL", "IN", "IA",
    "KS", "KY", "LA", "ME", "MD", "MA", "MI", "MN", "MS", "MO", "MT", "NE", "NV", "NH", "NJ",
    "NM", "NY", "NC", "ND", "OH", "OK", "OR", "PA", "RI", "SC", "SD", "TN", "TX", "UT", "VT",
    "VA", "WA", "WV", "WI", "WY",
];

const CA_PROVINCES: &[&str] = &[
    "ON", "QC", "BC", "AB", "MB", "NB", "NL", "NS", "NT", "NU", "PE", "SK", "YT",
];

fn zip_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{5}(-\d{4})?\b").unwrap())
}

fn postal_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[A-Z]\d[A-Z]\s?\d[A-Z]\d\b").unwrap())
}

fn word_present(haystack: &str, word: &str) -> bool {
    let pattern = format!(r"\b{}\b", regex::escape(word));
    Regex::new(&pattern)
        .map(|re| re.is_match(haystack))
        .unwrap_or(false)
}

/// Human-readable label for a requirement token.
pub fn requirement_label(token: &str) -> &str {
    match token {
        "proof_of_purchase" => "proof_of_purchase",
        "serial_number" => "serial_number",
        "contact_info" => "contact_info (email, phone, or address)",
        "photos" => "photos of the product issue",
        "business_license" => "business license (salon models)",
        "maintenance_description" => "maintenance description",
        "adult_supervision" => "adult supervision confirmation",
        "recycling_confirmation" => "recycling confirmation",
        "us_address" => "US return address",
        "us_ca_address" => "US or Canada return address",
        other => other,
    }
}

/// Does the address look like a US address (state + ZIP, or says so)?
pub fn address_in_us(address: &str) -> bool {
    if address.is_empty() {
        return false;
    }
    let addr = address.to_uppercase();
    if addr.contains("USA") || addr.contains("UNITED STATES") {
        return true;
    }
    if zip_re().is_match(&addr) {
        return US_STATES.iter().any(|state| word_present(&addr, state));
    }
    false
}

/// US address, or a Canadian one (province + postal code, or says so).
pub fn address_in_us_or_canada(address: &str) -> bool {
    if address_in_us(address) {
        return true;
    }
    let addr = address.to_uppercase();
    if addr.contains("CANADA") {
        return true;
    }
    if postal_re().is_match(&addr) {
        return CA_PROVINCES.iter().any(|prov| word_present(&addr, prov));
    }
    false
}

fn has_photos(attachments: &[String], body_lower: &str) -> bool {
    let photo_exts = [".jpg", ".jpeg", ".png", ".heic"];
    if attachments.iter().any(|att| {
        let att = att.to_lowercase();
        photo_exts.iter().any(|ext| att.ends_with(ext))
    }) {
        return true;
    }
    ["photo", "picture", "image"]
        .iter()
        .any(|w| word_present(body_lower, w))
}

fn has_business_license(body_lower: &str) -> bool {
    ["business license", "salon license", "license number"]
        .iter()
        .any(|w| word_present(body_lower, w))
}

fn has_maintenance_description(body_lower: &str) -> bool {
    ["clean", "filter", "maintenance", "wipe"]
        .iter()
        .any(|w| word_present(body_lower, w))
}

fn has_adult_supervision(body_lower: &str) -> bool {
    ["supervision", "supervised", "adult present"]
        .iter()
        .any(|w| word_present(body_lower, w))
}

fn has_recycling_confirmation(body_lower: &str) -> bool {
    ["recycle", "recycling", "return for recycling"]
        .iter()
        .any(|w| word_present(body_lower, w))
}

/// Evaluate every policy requirement, returning the labels of missing ones.
pub fn missing_requirements(
    requirements: &[String],
    extracted: &ExtractedFields,
    body: &str,
    attachments: &[String],
) -> Vec<String> {
    let body_lower = body.to_lowercase();
    let address = extracted.customer_address.as_deref().unwrap_or("");
    let mut missing = Vec::new();

    for requirement in requirements {
        let unmet = match requirement.as_str() {
            "proof_of_purchase" => !extracted.has_proof_of_purchase,
            "serial_number" => extracted.product_serial.is_none(),
            "contact_info" => !extracted.has_contact_method(),
            "photos" => !has_photos(attachments, &body_lower),
            "business_license" => !has_business_license(&body_lower),
            "maintenance_description" => !has_maintenance_description(&body_lower),
            "adult_supervision" => !has_adult_supervision(&body_lower),
            "recycling_confirmation" => !has_recycling_confirmation(&body_lower),
            "us_address" => !address_in_us(address),
            "us_ca_address" => !address_in_us_or_canada(address),
            _ => false,
        };
        if unmet {
            missing.push(requirement_label(requirement).to_string());
        }
    }

    missing
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reqs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn us_address_by_state_and_zip() {
        assert!(address_in_us("123 Oak St, Columbus, OH 43085"));
        assert!(address_in_us("somewhere in the United States"));
        assert!(!address_in_us("10 Downing Street, London SW1A 2AA"));
        assert!(!address_in_us(""));
        // ZIP without a state abbreviation is not enough.
        assert!(!address_in_us("PO Box 12345, Somewhereville 90210"));
    }

    #[test]
    fn canadian_address_by_province_and_postal() {
        assert!(address_in_us_or_canada("44 King St W, Toronto, ON M5H 1A1"));
        assert!(address_in_us_or_canada("Vancouver, Canada"));
        assert!(address_in_us_or_canada("123 Oak St, Columbus, OH 43085"));
        assert!(!address_in_us_or_canada("Paris, France 75001"));
    }

    #[test]
    fn proof_and_serial_requirements() {
        let extracted = ExtractedFields {
            product_serial: Some("PD3K-1".into()),
            has_proof_of_purchase: false,
            ..Default::default()
        };
        let missing = missing_requirements(
            &reqs(&["proof_of_purchase", "serial_number"]),
            &extracted,
            "",
            &[],
        );
        assert_eq!(missing, vec!["proof_of_purchase".to_string()]);
    }

    #[test]
    fn contact_info_requirement() {
        let missing = missing_requirements(
            &reqs(&["contact_info"]),
            &ExtractedFields::default(),
            "",
            &[],
        );
        assert_eq!(missing, vec!["contact_info (email, phone, or address)".to_string()]);

        let with_phone = ExtractedFields {
            customer_phone: Some("555-123-4567".into()),
            ..Default::default()
        };
        assert!(missing_requirements(&reqs(&["contact_info"]), &with_phone, "", &[]).is_empty());
    }

    #[test]
    fn photos_satisfied_by_attachment_or_mention() {
        let extracted = ExtractedFields::default();
        let attachments = vec!["defect.JPG".to_string()];
        assert!(missing_requirements(&reqs(&["photos"]), &extracted, "", &attachments).is_empty());
        assert!(
            missing_requirements(&reqs(&["photos"]), &extracted, "photo attached below", &[])
                .is_empty()
        );
        assert_eq!(
            missing_requirements(&reqs(&["photos"]), &extracted, "it broke", &[]),
            vec!["photos of the product issue".to_string()]
        );
    }

    #[test]
    fn body_keyword_requirements() {
        let extracted = ExtractedFields::default();
        assert!(missing_requirements(
            &reqs(&["maintenance_description"]),
            &extracted,
            "I clean the filter weekly",
            &[],
        )
        .is_empty());
        assert!(missing_requirements(
            &reqs(&["business_license"]),
            &extracted,
            "my salon license number is 8812",
            &[],
        )
        .is_empty());
        assert!(missing_requirements(
            &reqs(&["adult_supervision"]),
            &extracted,
            "always supervised by an adult",
            &[],
        )
        .is_empty());
        assert!(missing_requirements(
            &reqs(&["recycling_confirmation"]),
            &extracted,
            "happy to recycle the unit",
            &[],
        )
        .is_empty());
    }

    #[test]
    fn unknown_requirement_is_ignored() {
        let missing = missing_requirements(
            &reqs(&["notarized_statement"]),
            &ExtractedFields::default(),
            "",
            &[],
        );
        assert!(missing.is_empty());
    }

    #[test]
    fn address_requirements() {
        let us = ExtractedFields {
            customer_address: Some("123 Oak St, Columbus, OH 43085".into()),
            ..Default::default()
        };
        assert!(missing_requirements(&reqs(&["us_address"]), &us, "", &[]).is_empty());

        let ca = ExtractedFields {
            customer_address: Some("44 King St W, Toronto, ON M5H 1A1".into()),
            ..Default::default()
        };
        assert_eq!(
            missing_requirements(&reqs(&["us_address"]), &ca, "", &[]),
            vec!["US return address".to_string()]
        );
        assert!(missing_requirements(&reqs(&["us_ca_address"]), &ca, "", &[]).is_empty());
    }
}

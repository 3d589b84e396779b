//! Rule-based spam pre-filter for the triage stage.
//!
//! Runs before the classifier so obvious junk never costs a model call.
//! Two or more indicators mark a message as spam outright.

use crate::intake::RawMessage;

/// Number of indicators that must fire for the fast spam path.
pub const SPAM_THRESHOLD: usize = 2;

/// Count cheap spam signals in a message.
pub fn spam_indicator_count(message: &RawMessage) -> usize {
    let body = message.body.to_lowercase();
    let from = message.from.to_lowercase();

    let indicators = [
        body.contains("unsubscribe"),
        body.contains("click here") && body.contains("http"),
        body.contains("act now") || body.contains("act fast"),
        body.contains("wholesale") && body.contains("price"),
        body.contains("credit card") && body.contains("verify"),
        from.contains(".scam") || from.contains("fake"),
        message.body.matches('!').count() > 10,
    ];

    indicators.iter().filter(|hit| **hit).count()
}

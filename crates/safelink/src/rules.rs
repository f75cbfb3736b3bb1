//! Access-rule evaluation: maps request attributes and enable flags to a
//! pass/fail routing decision with per-gate reasons.
//!
//! Every gate is checked — there is no short-circuit — so the caller sees
//! every reason a request failed, not just the first.

use serde::Serialize;

/// Tokens that mark a user agent as mobile. Case-insensitive substring match.
const MOBILE_UA_TOKENS: &[&str] = &[
    "android",
    "iphone",
    "ipod",
    "ipad",
    "mobile",
    "iemobile",
    "blackberry",
    "opera mini",
    "opera mobi",
    "webos",
];

/// Inputs to a single rule evaluation.
///
/// `allowed_countries` and `request_country` are lowercase ISO-2 codes; an
/// empty allow-list permits every country. The four `flag_*` fields enable
/// their gate independently: a disabled gate never fails.
#[derive(Debug, Clone, Default)]
pub struct AccessConditions {
    pub system_on: bool,
    pub allowed_countries: Vec<String>,
    pub request_country: String,
    pub is_mobile: bool,
    pub is_vpn: bool,
    pub is_proxy: bool,
    pub is_bot: bool,
    pub flag_wap: bool,
    pub flag_vpn: bool,
    pub flag_proxy: bool,
    pub flag_bot: bool,
}

/// Routing decision label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Decision {
    #[serde(rename = "REDIRECT")]
    Redirect,
    #[serde(rename = "NORMAL FLOW")]
    NormalFlow,
}

/// Result of evaluating all gates.
#[derive(Debug, Clone, Serialize)]
pub struct RuleOutcome {
    pub pass: bool,
    pub decision: Decision,
    pub reasons: Vec<String>,
}

/// Evaluate every gate and accumulate a reason per failing gate.
pub fn evaluate(conditions: &AccessConditions) -> RuleOutcome {
    let mut reasons = Vec::new();

    if !conditions.system_on {
        reasons.push("System OFF".to_string());
    }

    if !conditions.allowed_countries.is_empty()
        && !conditions
            .allowed_countries
            .iter()
            .any(|c| c == &conditions.request_country)
    {
        reasons.push("Country not in allowlist".to_string());
    }

    if conditions.flag_wap && !conditions.is_mobile {
        reasons.push("Not WAP/mobile".to_string());
    }

    if conditions.flag_vpn && conditions.is_vpn {
        reasons.push("VPN must be false".to_string());
    }

    if conditions.flag_proxy && conditions.is_proxy {
        reasons.push("Proxy must be false".to_string());
    }

    if conditions.flag_bot && conditions.is_bot {
        reasons.push("Bot/Crawler must be false".to_string());
    }

    let pass = reasons.is_empty();
    RuleOutcome {
        pass,
        decision: if pass {
            Decision::Redirect
        } else {
            Decision::NormalFlow
        },
        reasons: if pass {
            vec!["All conditions met".to_string()]
        } else {
            reasons
        },
    }
}

/// Classify a user agent as mobile by token scan. Pure, no external lookup.
pub fn is_mobile_user_agent(user_agent: &str) -> bool {
    let ua = user_agent.to_lowercase();
    MOBILE_UA_TOKENS.iter().any(|token| ua.contains(token))
}

//! Risk scoring: a pure function of one pass's findings.

use crate::models::{
    BreachRecord, DiscoveredAccount, EmailValidation, PhoneLineType, PhoneValidation,
    RiskAssessment, RiskFactor, RiskLevel,
};

const SOCIAL_PRESENCE_WEIGHT: f64 = 0.20;
const PER_ACCOUNT_WEIGHT: f64 = 0.08;
const ACCOUNT_CAP: f64 = 0.40;
const PER_BREACH_WEIGHT: f64 = 0.15;
const BREACH_CAP: f64 = 0.40;
const DISPOSABLE_EMAIL_WEIGHT: f64 = 0.30;
const SUSPICIOUS_EMAIL_WEIGHT: f64 = 0.20;
const PHONE_WEIGHT: f64 = 0.5;

const INVALID_PHONE_SUBSCORE: f64 = 0.3;
const VOIP_SUBSCORE: f64 = 0.2;
const UNKNOWN_TYPE_SUBSCORE: f64 = 0.1;
const TRUST_INDICATOR_CREDIT: f64 = 0.1;

/// More breaches than this force `critical` regardless of score.
pub const CRITICAL_BREACH_COUNT: usize = 3;

/// Phone sub-score in [0, 0.3], with the factor tags it raised.
pub fn phone_subscore(phone: &PhoneValidation) -> (f64, Vec<RiskFactor>) {
    if !phone.valid {
        return (INVALID_PHONE_SUBSCORE, vec![RiskFactor::InvalidPhone]);
    }

    let mut sub = 0.0;
    let mut factors = Vec::new();
    match phone.line_type {
        PhoneLineType::Voip => {
            sub += VOIP_SUBSCORE;
            factors.push(RiskFactor::VoipPhone);
        }
        PhoneLineType::Unknown => {
            sub += UNKNOWN_TYPE_SUBSCORE;
            factors.push(RiskFactor::UnknownPhoneType);
        }
        _ => {}
    }

    let trust_indicators = [
        phone.line_type == PhoneLineType::Mobile,
        phone.has_known_carrier(),
        phone.has_resolvable_geography(),
    ]
    .iter()
    .filter(|present| **present)
    .count();

    sub -= TRUST_INDICATOR_CREDIT * trust_indicators as f64;
    (sub.max(0.0), factors)
}

pub fn level_for(score: f64, breach_count: usize) -> RiskLevel {
    if breach_count > CRITICAL_BREACH_COUNT {
        return RiskLevel::Critical;
    }
    if score >= 0.70 {
        RiskLevel::High
    } else if score >= 0.30 {
        RiskLevel::Medium
    } else if score >= 0.20 {
        RiskLevel::Low
    } else {
        RiskLevel::Minimal
    }
}

fn recommendation(factor: RiskFactor) -> &'static str {
    match factor {
        RiskFactor::SocialPresence => "Review discovered social accounts for ownership",
        RiskFactor::SocialFootprint => "Cross-check identity details across linked profiles",
        RiskFactor::DataBreaches => "Assume exposed credentials; require a password reset",
        RiskFactor::DisposableEmail => "Verify identity through alternative means",
        RiskFactor::SuspiciousEmail => "Confirm email ownership with a verification link",
        RiskFactor::InvalidPhone => "Request a corrected phone number",
        RiskFactor::VoipPhone => "Verify the phone number with a call to a non-VOIP line",
        RiskFactor::UnknownPhoneType => "Confirm the phone number's line type",
        RiskFactor::ExcessiveBreaches => "Escalate for manual review before approval",
    }
}

/// Round to 4 decimals so equal inputs store and compare identically.
fn round_score(score: f64) -> f64 {
    (score * 10_000.0).round() / 10_000.0
}

/// Score one pass.
///
/// Factors are listed in evaluation order; recommendations follow the same
/// order with duplicates removed.
pub fn score(
    breaches: &[BreachRecord],
    accounts: &[DiscoveredAccount],
    phone: Option<&PhoneValidation>,
    email: Option<&EmailValidation>,
) -> RiskAssessment {
    let mut total = 0.0;
    let mut factors = Vec::new();

    if !accounts.is_empty() {
        total += SOCIAL_PRESENCE_WEIGHT;
        factors.push(RiskFactor::SocialPresence);
        total += (PER_ACCOUNT_WEIGHT * accounts.len() as f64).min(ACCOUNT_CAP);
        if accounts.len() > 1 {
            factors.push(RiskFactor::SocialFootprint);
        }
    }

    if !breaches.is_empty() {
        total += (PER_BREACH_WEIGHT * breaches.len() as f64).min(BREACH_CAP);
        factors.push(RiskFactor::DataBreaches);
    }

    if let Some(email) = email {
        if email.is_disposable() {
            total += DISPOSABLE_EMAIL_WEIGHT;
            factors.push(RiskFactor::DisposableEmail);
        }
        if email.is_suspicious() {
            total += SUSPICIOUS_EMAIL_WEIGHT;
            factors.push(RiskFactor::SuspiciousEmail);
        }
    }

    if let Some(phone) = phone {
        let (sub, phone_factors) = phone_subscore(phone);
        total += sub * PHONE_WEIGHT;
        factors.extend(phone_factors);
    }

    if breaches.len() > CRITICAL_BREACH_COUNT {
        factors.push(RiskFactor::ExcessiveBreaches);
    }

    let score = round_score(total.clamp(0.0, 1.0));
    let level = level_for(score, breaches.len());

    let mut recommendations: Vec<String> = Vec::new();
    for factor in &factors {
        let text = recommendation(*factor);
        if !recommendations.iter().any(|r| r == text) {
            recommendations.push(text.to_string());
        }
    }

    RiskAssessment {
        score,
        level,
        factors,
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccountPayload, ProviderClass, SuspiciousPattern};
    use std::collections::BTreeSet;
    use uuid::Uuid;

    fn account(username: &str) -> DiscoveredAccount {
        DiscoveredAccount {
            account_id: Uuid::new_v4(),
            profile_id: None,
            source: "github".to_string(),
            username: username.to_string(),
            profile_url: format!("https://github.com/{}", username),
            display_name: None,
            bio: None,
            followers: None,
            following: None,
            verified: false,
            payload: AccountPayload::SocialProbe {
                platform: "github".to_string(),
                http_status: 200,
                final_url: format!("https://github.com/{}", username),
            },
            confidence: 0.8,
        }
    }

    fn breach(name: &str) -> BreachRecord {
        BreachRecord {
            name: name.to_string(),
            breach_date: None,
            data_classes: BTreeSet::new(),
            verified: true,
        }
    }

    fn email(provider: ProviderClass, patterns: Vec<SuspiciousPattern>) -> EmailValidation {
        EmailValidation {
            email: "someone@example.com".to_string(),
            domain: "example.com".to_string(),
            valid_format: true,
            provider,
            suspicious_patterns: patterns,
            registrar: None,
            domain_created: None,
        }
    }

    fn phone(line_type: PhoneLineType, carrier: Option<&str>, region: Option<&str>) -> PhoneValidation {
        PhoneValidation {
            input: "+15555550100".to_string(),
            valid: true,
            e164: Some("+15555550100".to_string()),
            country_code: Some(1),
            national_number: Some("5555550100".to_string()),
            region: region.map(str::to_string),
            line_type,
            carrier: carrier.map(str::to_string),
            location: None,
            suggestion: None,
        }
    }

    #[test]
    fn test_empty_findings_are_minimal() {
        let assessment = score(&[], &[], None, None);
        assert_eq!(assessment.score, 0.0);
        assert_eq!(assessment.level, RiskLevel::Minimal);
        assert!(assessment.factors.is_empty());
        assert!(assessment.recommendations.is_empty());
    }

    #[test]
    fn test_single_account_on_free_mail() {
        let gmail = email(ProviderClass::FreeMail("Gmail".to_string()), vec![]);
        let assessment = score(&[], &[account("janedoe")], None, Some(&gmail));

        assert_eq!(assessment.score, 0.28);
        assert_eq!(assessment.level, RiskLevel::Low);
        assert_eq!(assessment.factors, vec![RiskFactor::SocialPresence]);
    }

    #[test]
    fn test_disposable_with_four_breaches_is_critical() {
        let disposable = email(ProviderClass::Disposable, vec![]);
        let breaches: Vec<_> = ["A", "B", "C", "D"].iter().map(|n| breach(n)).collect();

        let assessment = score(&breaches, &[], None, Some(&disposable));
        assert_eq!(assessment.score, 0.7);
        assert_eq!(assessment.level, RiskLevel::Critical);
        assert!(assessment.factors.contains(&RiskFactor::ExcessiveBreaches));
        assert!(assessment
            .recommendations
            .contains(&"Verify identity through alternative means".to_string()));
    }

    #[test]
    fn test_score_clamps_at_one() {
        let bad = email(
            ProviderClass::Disposable,
            vec![SuspiciousPattern::AllDigits],
        );
        let accounts: Vec<_> = (0..10).map(|i| account(&format!("user{}", i))).collect();
        let breaches: Vec<_> = (0..10).map(|i| breach(&format!("B{}", i))).collect();

        let assessment = score(&breaches, &accounts, None, Some(&bad));
        assert_eq!(assessment.score, 1.0);
        assert_eq!(assessment.level, RiskLevel::Critical);
    }

    #[test]
    fn test_invalid_phone_contributes_fifteen_hundredths() {
        let invalid = PhoneValidation::unparsed("12", None);
        let assessment = score(&[], &[], Some(&invalid), None);
        assert_eq!(assessment.score, 0.15);
        assert_eq!(assessment.factors, vec![RiskFactor::InvalidPhone]);
    }

    #[test]
    fn test_phone_trust_indicators_floor_at_zero() {
        let trusted = phone(PhoneLineType::Mobile, Some("Vivo"), Some("BR"));
        assert_eq!(phone_subscore(&trusted).0, 0.0);

        let voip = phone(PhoneLineType::Voip, None, None);
        let (sub, factors) = phone_subscore(&voip);
        assert_eq!(sub, 0.2);
        assert_eq!(factors, vec![RiskFactor::VoipPhone]);

        let voip_known = phone(PhoneLineType::Voip, Some("Twilio"), Some("US"));
        assert!(phone_subscore(&voip_known).0.abs() < 1e-9);
    }

    #[test]
    fn test_level_bands() {
        assert_eq!(level_for(0.19, 0), RiskLevel::Minimal);
        assert_eq!(level_for(0.20, 0), RiskLevel::Low);
        assert_eq!(level_for(0.29, 0), RiskLevel::Low);
        assert_eq!(level_for(0.30, 0), RiskLevel::Medium);
        assert_eq!(level_for(0.69, 0), RiskLevel::Medium);
        assert_eq!(level_for(0.70, 0), RiskLevel::High);
        assert_eq!(level_for(0.0, 4), RiskLevel::Critical);
    }
}

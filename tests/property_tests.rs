/// Property-based tests for the pure parts of the pipeline
/// Classifiers and parsers must never panic; scoring and correlation must be
/// deterministic and order independent
use proptest::prelude::*;
use std::collections::BTreeSet;
use uuid::Uuid;

use rust_subject_enrichment::adapters::domain::classify_provider;
use rust_subject_enrichment::correlation::{correlate, normalize_username};
use rust_subject_enrichment::models::{
    AccountPayload, BreachRecord, DiscoveredAccount, EmailValidation, PhoneLineType,
    PhoneValidation, ProviderClass, RiskLevel, SuspiciousPattern,
};
use rust_subject_enrichment::scoring::score;
use rust_subject_enrichment::validation::{
    analyze_local_part, is_valid_email, parse_phone, parse_region, shannon_entropy,
};

fn account(index: usize, username: &str, display_name: Option<&str>) -> DiscoveredAccount {
    DiscoveredAccount {
        account_id: Uuid::from_u128(index as u128 + 1),
        profile_id: None,
        source: format!("site{}", index % 3),
        username: username.to_string(),
        profile_url: format!("https://site.example/{}", username),
        display_name: display_name.map(str::to_string),
        bio: None,
        followers: None,
        following: None,
        verified: false,
        payload: AccountPayload::Opaque {
            adapter: "test".to_string(),
            data: serde_json::Value::Null,
        },
        confidence: 0.8,
    }
}

fn breaches(count: usize) -> Vec<BreachRecord> {
    (0..count)
        .map(|i| BreachRecord {
            name: format!("Breach{}", i),
            breach_date: None,
            data_classes: BTreeSet::new(),
            verified: true,
        })
        .collect()
}

fn email_finding(disposable: bool, suspicious: bool) -> EmailValidation {
    EmailValidation {
        email: "someone@example.com".to_string(),
        domain: "example.com".to_string(),
        valid_format: true,
        provider: if disposable {
            ProviderClass::Disposable
        } else {
            ProviderClass::CustomDomain
        },
        suspicious_patterns: if suspicious {
            vec![SuspiciousPattern::AllDigits]
        } else {
            Vec::new()
        },
        registrar: None,
        domain_created: None,
    }
}

fn phone_finding(valid: bool, line_type: PhoneLineType, carrier: bool) -> PhoneValidation {
    PhoneValidation {
        input: "+16502530000".to_string(),
        valid,
        e164: valid.then(|| "+16502530000".to_string()),
        country_code: valid.then_some(1),
        national_number: None,
        region: None,
        line_type,
        carrier: carrier.then(|| "Carrier".to_string()),
        location: None,
        suggestion: None,
    }
}

fn line_type() -> impl Strategy<Value = PhoneLineType> {
    prop_oneof![
        Just(PhoneLineType::Mobile),
        Just(PhoneLineType::Landline),
        Just(PhoneLineType::Voip),
        Just(PhoneLineType::TollFree),
        Just(PhoneLineType::Unknown),
    ]
}

fn accounts_strategy() -> impl Strategy<Value = Vec<DiscoveredAccount>> {
    // Small alphabets so collisions, and therefore clusters, are common
    prop::collection::vec(
        ("[ab][._-]?[ab]", prop::option::of("(Ann|Bob) (Lee|Kim)")),
        0..8,
    )
    .prop_map(|items| {
        items
            .iter()
            .enumerate()
            .map(|(i, (username, name))| account(i, username, name.as_deref()))
            .collect()
    })
}

proptest! {
    #[test]
    fn email_validation_never_panics(s in "\\PC*") {
        let _ = is_valid_email(&s);
    }

    #[test]
    fn local_part_classifier_never_panics(s in "\\PC{0,64}") {
        let patterns = analyze_local_part(&s);
        let unique: BTreeSet<_> = patterns.iter().map(|p| format!("{:?}", p)).collect();
        prop_assert_eq!(unique.len(), patterns.len());
    }

    #[test]
    fn entropy_is_bounded(s in "[a-z0-9]{1,40}") {
        let entropy = shannon_entropy(&s);
        let distinct = s.chars().collect::<BTreeSet<_>>().len() as f64;
        prop_assert!(entropy >= 0.0);
        prop_assert!(entropy <= distinct.log2() + 1e-9);
    }

    #[test]
    fn provider_classification_never_panics(domain in "[a-z0-9.-]{0,30}") {
        let _ = classify_provider(&domain);
    }

    #[test]
    fn phone_parsing_never_panics(raw in "[+0-9 ()-]{0,24}") {
        if let Ok(parsed) = parse_phone(&raw, parse_region("US")) {
            prop_assert!(parsed.e164.starts_with('+'));
        }
    }

    #[test]
    fn very_short_phones_are_rejected_with_a_hint(raw in "[0-9]{0,3}") {
        let rejection = parse_phone(&raw, parse_region("US")).unwrap_err();
        prop_assert!(rejection.suggestion.is_some(), "no hint for {:?}", raw);
    }

    #[test]
    fn normalized_usernames_are_stable(username in "[A-Za-z0-9@._-]{0,20}") {
        let once = normalize_username(&username);
        prop_assert_eq!(normalize_username(&once), once.clone());
        prop_assert!(!once.contains(['@', '_', '.', '-']));
    }

    #[test]
    fn score_is_bounded_and_deterministic(
        n_accounts in 0usize..12,
        n_breaches in 0usize..12,
        disposable in any::<bool>(),
        suspicious in any::<bool>(),
        phone in prop::option::of((any::<bool>(), line_type(), any::<bool>())),
    ) {
        let accounts: Vec<_> = (0..n_accounts).map(|i| account(i, &format!("user{}", i), None)).collect();
        let breaches = breaches(n_breaches);
        let email = email_finding(disposable, suspicious);
        let phone = phone.map(|(valid, lt, carrier)| phone_finding(valid, lt, carrier));

        let first = score(&breaches, &accounts, phone.as_ref(), Some(&email));
        let second = score(&breaches, &accounts, phone.as_ref(), Some(&email));

        prop_assert!((0.0..=1.0).contains(&first.score));
        prop_assert_eq!(first.score.to_bits(), second.score.to_bits());
        prop_assert_eq!(&first.factors, &second.factors);
        prop_assert_eq!(first.level, second.level);
        if n_breaches > 3 {
            prop_assert_eq!(first.level, RiskLevel::Critical);
        }
    }

    #[test]
    fn score_never_drops_with_more_breaches(
        n_accounts in 0usize..8,
        n_breaches in 0usize..8,
        disposable in any::<bool>(),
    ) {
        let accounts: Vec<_> = (0..n_accounts).map(|i| account(i, &format!("user{}", i), None)).collect();
        let email = email_finding(disposable, false);

        let fewer = score(&breaches(n_breaches), &accounts, None, Some(&email));
        let more = score(&breaches(n_breaches + 1), &accounts, None, Some(&email));
        prop_assert!(more.score >= fewer.score);
        prop_assert!(more.level >= fewer.level);
    }

    #[test]
    fn correlation_ignores_account_order(
        (accounts, shuffled) in accounts_strategy()
            .prop_flat_map(|accounts| (Just(accounts.clone()), Just(accounts).prop_shuffle()))
    ) {
        prop_assert_eq!(correlate(&accounts), correlate(&shuffled));
    }

    #[test]
    fn clusters_have_sorted_distinct_members(accounts in accounts_strategy()) {
        for cluster in correlate(&accounts) {
            prop_assert!(cluster.members.len() >= 2);
            prop_assert!(cluster.members.windows(2).all(|w| w[0] < w[1]));
        }
    }
}

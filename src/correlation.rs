//! Groups discovered accounts that look like the same actor.
//!
//! Two independent rules, each producing its own clusters. Output depends
//! only on the set of input accounts, not on their order.

use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::models::{CorrelationCluster, CorrelationRule, DiscoveredAccount};

/// Display names this short are too generic to match on.
const MIN_DISPLAY_NAME_LEN: usize = 4;

/// Lower-cased username with `@ _ . -` removed.
pub fn normalize_username(username: &str) -> String {
    username
        .chars()
        .filter(|c| !matches!(c, '@' | '_' | '.' | '-'))
        .flat_map(char::to_lowercase)
        .collect()
}

fn normalize_display_name(name: &str) -> Option<String> {
    let name = name.trim().to_lowercase();
    (name.chars().count() >= MIN_DISPLAY_NAME_LEN).then_some(name)
}

fn clusters_for(
    rule: CorrelationRule,
    accounts: &[DiscoveredAccount],
    key_of: impl Fn(&DiscoveredAccount) -> Option<String>,
) -> Vec<CorrelationCluster> {
    let mut groups: BTreeMap<String, BTreeSet<Uuid>> = BTreeMap::new();
    for account in accounts {
        if let Some(key) = key_of(account) {
            groups.entry(key).or_default().insert(account.account_id);
        }
    }

    groups
        .into_iter()
        .filter(|(_, members)| members.len() >= 2)
        .map(|(match_key, members)| CorrelationCluster {
            rule,
            match_key,
            confidence: rule.confidence(),
            members: members.into_iter().collect(),
        })
        .collect()
}

/// Recompute all clusters for one pass.
///
/// Clusters come out ordered by rule, then match key; members are sorted.
pub fn correlate(accounts: &[DiscoveredAccount]) -> Vec<CorrelationCluster> {
    let mut clusters = clusters_for(CorrelationRule::UsernameSimilarity, accounts, |a| {
        Some(normalize_username(&a.username)).filter(|k| !k.is_empty())
    });

    clusters.extend(clusters_for(CorrelationRule::DisplayNameMatch, accounts, |a| {
        a.display_name.as_deref().and_then(normalize_display_name)
    }));

    tracing::debug!(
        "Correlated {} account(s) into {} cluster(s)",
        accounts.len(),
        clusters.len()
    );
    clusters
}

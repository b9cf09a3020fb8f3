//! Case catalog lookup. The upstream catalog service is out of scope (§1);
//! this crate carries a small static reference implementation loaded at
//! startup from configuration, shared read-only by invoice issuance,
//! pre-checkout validation, and award resolution.

use std::collections::HashMap;

use crate::types::CaseConfig;

pub trait CaseStore: Send + Sync {
    fn get(&self, case_id: &str) -> Option<CaseConfig>;
}

/// Immutable, in-memory catalog keyed by case id.
pub struct StaticCaseStore {
    cases: HashMap<String, CaseConfig>,
}

impl StaticCaseStore {
    pub fn new(cases: Vec<CaseConfig>) -> Self {
        Self { cases: cases.into_iter().map(|c| (c.id.clone(), c)).collect() }
    }
}

impl CaseStore for StaticCaseStore {
    fn get(&self, case_id: &str) -> Option<CaseConfig> {
        self.cases.get(case_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PrizeItem, PrizeKind};

    fn sample() -> CaseConfig {
        CaseConfig {
            id: "c1".into(),
            title: "Case One".into(),
            price_stars: 700,
            items: vec![PrizeItem {
                id: "p1".into(),
                kind: PrizeKind::Gift,
                star_cost: Some(700),
                probability_ppm: 1_000_000,
            }],
        }
    }

    #[test]
    fn looks_up_known_case() {
        let store = StaticCaseStore::new(vec![sample()]);
        assert_eq!(store.get("c1").unwrap().price_stars, 700);
    }

    #[test]
    fn unknown_case_returns_none() {
        let store = StaticCaseStore::new(vec![sample()]);
        assert!(store.get("missing").is_none());
    }
}

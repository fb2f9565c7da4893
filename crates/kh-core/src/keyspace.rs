use crate::error::{KhError, Result};
use crate::types::AttackMode;

/// Inputs the keyspace calculator needs for one attack (spec.md §4.1).
/// `wordlist_counts`/`rule_counts` are word/line counts already resolved by
/// the (out-of-scope) wordlist/rule storage layer.
pub struct KeyspaceInputs<'a> {
    pub attack_mode: AttackMode,
    pub wordlist_counts: &'a [u64],
    pub rule_counts: &'a [u64],
    pub mask_keyspace: Option<u64>,
    /// Association-mode benchmark, required only for that mode.
    pub association_benchmark: Option<u64>,
    pub rule_split_enabled: bool,
    pub rule_split_min_rules: u64,
    pub rule_split_threshold_ratio: f64,
    pub eligible_agent_count: u64,
    pub chunk_target_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyspaceResult {
    pub base_keyspace: u64,
    pub effective_keyspace: u64,
    pub multiplication_factor: u64,
    pub uses_rule_splitting: bool,
}

pub fn calculate(inputs: &KeyspaceInputs) -> Result<KeyspaceResult> {
    let (base, multiplier) = match inputs.attack_mode {
        AttackMode::Straight => {
            let base: u64 = inputs.wordlist_counts.iter().sum();
            let multiplier: u64 = inputs.rule_counts.iter().product::<u64>().max(1);
            (base, multiplier)
        }
        AttackMode::BruteForce => {
            let base = inputs.mask_keyspace.ok_or_else(|| {
                KhError::KeyspaceUnknown("brute-force job missing mask keyspace".into())
            })?;
            (base, 1)
        }
        AttackMode::Combination => {
            let a = *inputs.wordlist_counts.first().unwrap_or(&0);
            let b = *inputs.wordlist_counts.get(1).unwrap_or(&0);
            (a.saturating_mul(b), 1)
        }
        AttackMode::HybridWm => {
            let words: u64 = inputs.wordlist_counts.iter().sum();
            let mask = inputs.mask_keyspace.ok_or_else(|| {
                KhError::KeyspaceUnknown("hybrid wordlist+mask job missing mask keyspace".into())
            })?;
            (words.saturating_mul(mask), 1)
        }
        AttackMode::HybridMw => {
            let words: u64 = inputs.wordlist_counts.iter().sum();
            let mask = inputs.mask_keyspace.ok_or_else(|| {
                KhError::KeyspaceUnknown("hybrid mask+wordlist job missing mask keyspace".into())
            })?;
            (mask.saturating_mul(words), 1)
        }
        AttackMode::Association => {
            let base = inputs.association_benchmark.ok_or_else(|| {
                KhError::KeyspaceUnknown("association job has no prior benchmark".into())
            })?;
            (base, 1)
        }
    };

    let effective = base.saturating_mul(multiplier);

    let uses_rule_splitting = inputs.rule_split_enabled
        && multiplier >= inputs.rule_split_min_rules
        && inputs.eligible_agent_count > 0
        && (multiplier / inputs.eligible_agent_count.max(1)) as f64
            >= inputs.rule_split_threshold_ratio * inputs.chunk_target_size as f64;

    Ok(KeyspaceResult {
        base_keyspace: base,
        effective_keyspace: effective,
        multiplication_factor: multiplier,
        uses_rule_splitting,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_inputs() -> KeyspaceInputs<'static> {
        KeyspaceInputs {
            attack_mode: AttackMode::Straight,
            wordlist_counts: &[],
            rule_counts: &[],
            mask_keyspace: None,
            association_benchmark: None,
            rule_split_enabled: true,
            rule_split_min_rules: 10_000,
            rule_split_threshold_ratio: 2.0,
            eligible_agent_count: 4,
            chunk_target_size: 1_000_000,
        }
    }

    #[test]
    fn straight_multiplies_words_by_rule_product() {
        let wordlists = [3u64];
        let rules = [1u64];
        let mut inputs = base_inputs();
        inputs.wordlist_counts = &wordlists;
        inputs.rule_counts = &rules;
        let r = calculate(&inputs).unwrap();
        assert_eq!(r.base_keyspace, 3);
        assert_eq!(r.multiplication_factor, 1);
        assert_eq!(r.effective_keyspace, 3);
        assert!(!r.uses_rule_splitting);
    }

    #[test]
    fn brute_force_uses_mask_keyspace_with_multiplier_one() {
        let mut inputs = base_inputs();
        inputs.attack_mode = AttackMode::BruteForce;
        inputs.mask_keyspace = Some(95u64.pow(8));
        let r = calculate(&inputs).unwrap();
        assert_eq!(r.base_keyspace, 95u64.pow(8));
        assert_eq!(r.multiplication_factor, 1);
        assert_eq!(r.effective_keyspace, r.base_keyspace);
    }

    #[test]
    fn combination_multiplies_two_wordlists() {
        let wordlists = [10u64, 20u64];
        let mut inputs = base_inputs();
        inputs.attack_mode = AttackMode::Combination;
        inputs.wordlist_counts = &wordlists;
        let r = calculate(&inputs).unwrap();
        assert_eq!(r.base_keyspace, 200);
    }

    #[test]
    fn association_without_benchmark_is_unknown() {
        let mut inputs = base_inputs();
        inputs.attack_mode = AttackMode::Association;
        let err = calculate(&inputs).unwrap_err();
        assert!(matches!(err, KhError::KeyspaceUnknown(_)));
    }

    #[test]
    fn rule_splitting_triggers_above_threshold() {
        let wordlists = [1_000u64];
        let rules = [1_000_000u64];
        let mut inputs = base_inputs();
        inputs.wordlist_counts = &wordlists;
        inputs.rule_counts = &rules;
        inputs.eligible_agent_count = 4;
        inputs.chunk_target_size = 1_000;
        let r = calculate(&inputs).unwrap();
        assert!(r.uses_rule_splitting);
    }
}

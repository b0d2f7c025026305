use rand::Rng;

use crate::record::Key;

/// spec.md §4.5 — pure function `(provider_keys, model) -> key`.
///
/// Candidates are filtered per spec.md §3's "Key Selection Invariant": if
/// any key explicitly lists `model`, only such keys are eligible; otherwise
/// keys with an empty model list are eligible. Selection within the
/// candidate set is weighted random using weights in `(0, 1]` — zero-weight
/// keys never win. Randomness is process-local (spec.md §4.5: "not a
/// deterministic seed"), so this takes an `Rng` rather than hard-coding
/// `rand::thread_rng()`, which also makes the weighting distribution
/// testable without flakiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoKeyAvailable;

impl std::fmt::Display for NoKeyAvailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("no_key_available")
    }
}

impl std::error::Error for NoKeyAvailable {}

pub fn candidates<'a>(keys: &'a [Key], model: &str) -> Vec<&'a Key> {
    let explicit: Vec<&Key> = keys.iter().filter(|k| k.matches_model(model)).collect();
    if !explicit.is_empty() {
        return explicit;
    }
    keys.iter().filter(|k| k.models.is_empty()).collect()
}

/// Selects one key for `model` out of `keys` using `rng` for the weighted
/// draw. Returns [`NoKeyAvailable`] when the candidate set is empty
/// (spec.md §4.5/§7).
pub fn select_key<'a, R: Rng + ?Sized>(
    keys: &'a [Key],
    model: &str,
    rng: &mut R,
) -> Result<&'a Key, NoKeyAvailable> {
    let mut pool = candidates(keys, model);
    pool.retain(|k| k.weight > 0.0);
    if pool.is_empty() {
        return Err(NoKeyAvailable);
    }
    // spec.md §9: "if only one candidate remains ... weights are moot; skip
    // the random draw."
    if pool.len() == 1 {
        return Ok(pool[0]);
    }

    let total: f64 = pool.iter().map(|k| k.weight).sum();
    let draw = rng.random_range(0.0..total);
    let mut cumulative = 0.0;
    for key in &pool {
        cumulative += key.weight;
        if cumulative >= draw {
            return Ok(key);
        }
    }
    // Floating-point edge case: rounding may leave `draw` fractionally above
    // every prefix sum. Fall back to the last candidate rather than panic.
    Ok(pool[pool.len() - 1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn key(value: &str, models: &[&str], weight: f64) -> Key {
        Key {
            value: value.to_string(),
            models: models.iter().map(|s| s.to_string()).collect(),
            weight,
            azure_deployments: Default::default(),
            azure_api_version: None,
            vertex_credentials: None,
            region: None,
        }
    }

    #[test]
    fn explicit_model_match_excludes_wildcard_keys() {
        let keys = vec![key("a", &["gpt-4o"], 1.0), key("b", &[], 1.0)];
        let found = candidates(&keys, "gpt-4o");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].value, "a");
    }

    #[test]
    fn wildcard_keys_used_when_no_explicit_match() {
        let keys = vec![key("a", &["other-model"], 1.0), key("b", &[], 1.0)];
        let found = candidates(&keys, "gpt-4o");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].value, "b");
    }

    #[test]
    fn zero_weight_keys_are_never_selected() {
        let keys = vec![key("a", &[], 0.0), key("b", &[], 1.0)];
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..50 {
            let chosen = select_key(&keys, "any", &mut rng).unwrap();
            assert_eq!(chosen.value, "b");
        }
    }

    #[test]
    fn empty_candidate_set_errors() {
        let keys: Vec<Key> = vec![key("a", &["other"], 1.0)];
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(select_key(&keys, "gpt-4o", &mut rng), Err(NoKeyAvailable));
    }

    #[test]
    fn single_candidate_skips_draw_even_with_zero_total_weight_edge() {
        let keys = vec![key("a", &[], 1.0)];
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(select_key(&keys, "any", &mut rng).unwrap().value, "a");
    }

    #[test]
    fn weighted_distribution_favors_heavier_key() {
        let keys = vec![key("a", &[], 9.0), key("b", &[], 1.0)];
        let mut rng = StdRng::seed_from_u64(42);
        let mut a_count = 0;
        let trials = 2000;
        for _ in 0..trials {
            if select_key(&keys, "any", &mut rng).unwrap().value == "a" {
                a_count += 1;
            }
        }
        let ratio = a_count as f64 / trials as f64;
        assert!(ratio > 0.8 && ratio < 1.0, "ratio was {ratio}");
    }
}

//! Per-turn strain scoring.
//!
//! Strain is stateless: it depends only on the turn's signal and resonance
//! tags. History lives in the session, never in the scorer.

use lattice_proto::Role;

const BASE: f64 = 0.30;
const NON_PRIME_DECREMENT: f64 = 0.02;
const ROLE_MARKER_DECREMENT: f64 = 0.06;
const FLOOR: f64 = 0.01;

/// Signals treated as prime. Anything else present is "composite".
const PRIME_SIGNALS: [i64; 8] = [2, 3, 5, 7, 11, 13, 17, 19];

/// Scores one turn.
///
/// Starts from 0.30, drops 0.02 for a present non-prime signal and 0.06 for
/// each role whose tag prefix appears in `resonance`, never going below 0.01.
/// An absent signal takes no decrement.
pub fn strain_score(signal: Option<i64>, resonance: &[String]) -> f64 {
    let mut score = BASE;

    if signal.is_some_and(|s| !PRIME_SIGNALS.contains(&s)) {
        score -= NON_PRIME_DECREMENT;
    }
    for role in [Role::A, Role::B] {
        if resonance.iter().any(|tag| tag.starts_with(role.tag_prefix())) {
            score -= ROLE_MARKER_DECREMENT;
        }
    }

    score.max(FLOOR)
}

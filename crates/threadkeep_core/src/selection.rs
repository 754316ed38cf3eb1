//! Least-frequently-used picking over a history of values
//!
//! Features that post "something new" each time (a fact, a prompt, a track)
//! use this to keep picks evenly spread: values never seen win outright, and
//! once the pool is exhausted the least-repeated values are preferred.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use rand::Rng;
use rand::seq::IteratorRandom;

use crate::cache::StreamCache;
use crate::id::StreamId;
use crate::store::Record;

/// The distinct values that occur least often in `values`.
///
/// Empty input gives an empty set. Ties are all returned.
pub fn least_frequent<T, I>(values: I) -> HashSet<T>
where
    T: Eq + Hash,
    I: IntoIterator<Item = T>,
{
    let mut counts: HashMap<T, usize> = HashMap::new();
    for value in values {
        *counts.entry(value).or_insert(0) += 1;
    }
    let Some(min) = counts.values().copied().min() else {
        return HashSet::new();
    };
    counts
        .into_iter()
        .filter(|(_, count)| *count == min)
        .map(|(value, _)| value)
        .collect()
}

/// Candidates for the next pick: unseen pool values, or failing that the
/// least frequent values of `seen`.
pub fn candidates<T>(pool: impl IntoIterator<Item = T>, seen: &[T]) -> HashSet<T>
where
    T: Eq + Hash + Clone,
{
    let seen_set: HashSet<&T> = seen.iter().collect();
    let potential: HashSet<T> = pool
        .into_iter()
        .filter(|value| !seen_set.contains(value))
        .collect();
    if potential.is_empty() {
        least_frequent(seen.iter().cloned())
    } else {
        potential
    }
}

/// Pick one candidate uniformly at random. `None` when there are no
/// candidates at all (empty pool and empty history).
pub fn pick_next<T, R>(pool: impl IntoIterator<Item = T>, seen: &[T], rng: &mut R) -> Option<T>
where
    T: Eq + Hash + Clone,
    R: Rng + ?Sized,
{
    candidates(pool, seen).into_iter().choose(rng)
}

/// [`pick_next`] with the history read from a cached stream.
///
/// `extract` maps each record to the value it represents; records that map to
/// `None` are not part of the history.
pub async fn pick_from_history<T, F, R>(
    cache: &StreamCache,
    stream_id: StreamId,
    pool: impl IntoIterator<Item = T>,
    extract: F,
    rng: &mut R,
) -> Option<T>
where
    T: Eq + Hash + Clone,
    F: Fn(&Record) -> Option<T>,
    R: Rng + ?Sized,
{
    let seen: Vec<T> = cache
        .get_records(stream_id)
        .await
        .iter()
        .filter_map(|r| extract(r))
        .collect();
    pick_next(pool, &seen, rng)
}

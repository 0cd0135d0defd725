//! Deterministic token-range assignment.
//!
//! Every node partitions the fixed token space `[0, max_tokens)` over the
//! current membership view without talking to anyone: members are ordered by
//! the FNV-1a hash of their ID and each gets a contiguous slice. Nodes seeing
//! the same membership compute the same partition.

use serde::{Deserialize, Serialize};
use std::fmt;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a hash.
pub fn fnv1a(data: &[u8]) -> u64 {
    data.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// An inclusive, non-empty slice of the token space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRange {
    /// First token owned.
    pub start: u32,
    /// Last token owned (inclusive).
    pub end: u32,
}

impl TokenRange {
    /// Number of tokens in the range.
    pub fn size(&self) -> u32 {
        self.end - self.start + 1
    }

    /// Whether `token` falls in this range.
    pub fn contains(&self, token: u32) -> bool {
        (self.start..=self.end).contains(&token)
    }
}

impl fmt::Display for TokenRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Sort member IDs into the canonical assignment order.
fn ordered<'a>(members: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
    let mut ids: Vec<&str> = members.into_iter().collect();
    ids.sort_by(|a, b| {
        fnv1a(a.as_bytes())
            .cmp(&fnv1a(b.as_bytes()))
            .then_with(|| a.cmp(b))
    });
    ids.dedup();
    ids
}

fn range_at(index: usize, count: usize, max_tokens: u32) -> Option<TokenRange> {
    let (i, n, total) = (index as u64, count as u64, u64::from(max_tokens));
    if i >= total {
        return None;
    }
    if n > total {
        return Some(TokenRange {
            start: i as u32,
            end: i as u32,
        });
    }

    let per_member = total.div_ceil(n);
    let (start, end) = if per_member * (n - 1) >= total {
        // The ceil layout would leave the tail members without tokens.
        (i * total / n, (i + 1) * total / n - 1)
    } else {
        let start = per_member * i;
        (start, (start + per_member - 1).min(total - 1))
    };

    Some(TokenRange {
        start: start as u32,
        end: end as u32,
    })
}

/// Compute the token range owned by `local` among `members`.
///
/// Returns `None` if `local` is not in `members`, if `max_tokens` is zero,
/// or if there are more members than tokens and `local` sorts past the end.
pub fn assign_tokens<'a>(
    members: impl IntoIterator<Item = &'a str>,
    local: &str,
    max_tokens: u32,
) -> Option<TokenRange> {
    let ids = ordered(members);
    let index = ids.iter().position(|id| *id == local)?;
    range_at(index, ids.len(), max_tokens)
}

/// Compute the full partition for every member, in assignment order.
pub fn token_layout<'a>(
    members: impl IntoIterator<Item = &'a str>,
    max_tokens: u32,
) -> Vec<(String, Option<TokenRange>)> {
    let ids = ordered(members);
    let count = ids.len();
    ids.iter()
        .enumerate()
        .map(|(i, id)| (id.to_string(), range_at(i, count, max_tokens)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn members(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("10.0.0.{}:4235", i)).collect()
    }

    #[test]
    fn test_fnv1a_reference_values() {
        assert_eq!(fnv1a(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a(b"a"), 0xaf63_dc4c_8601_ec8c);
        assert_eq!(fnv1a(b"foobar"), 0x8594_4171_f739_67e8);
    }

    #[test]
    fn test_single_member_owns_everything() {
        let range = assign_tokens(["node-a"], "node-a", 100).unwrap();
        assert_eq!(range, TokenRange { start: 0, end: 99 });
    }

    #[test]
    fn test_three_members_ceil_layout() {
        let ids = members(3);
        let layout = token_layout(ids.iter().map(String::as_str), 100);
        let ranges: Vec<_> = layout.iter().map(|(_, r)| r.unwrap()).collect();
        assert_eq!(
            ranges,
            vec![
                TokenRange { start: 0, end: 33 },
                TokenRange { start: 34, end: 67 },
                TokenRange { start: 68, end: 99 },
            ]
        );
    }

    #[test]
    fn test_unknown_local_member() {
        assert!(assign_tokens(["a", "b"], "c", 100).is_none());
    }

    #[test]
    fn test_order_independent_of_input_order() {
        let ids = members(5);
        let mut reversed = ids.clone();
        reversed.reverse();
        for id in &ids {
            assert_eq!(
                assign_tokens(ids.iter().map(String::as_str), id, 100),
                assign_tokens(reversed.iter().map(String::as_str), id, 100),
            );
        }
    }

    #[test]
    fn test_more_members_than_tokens() {
        let ids = members(7);
        let layout = token_layout(ids.iter().map(String::as_str), 4);
        let assigned: Vec<_> = layout.iter().filter_map(|(_, r)| *r).collect();
        assert_eq!(assigned.len(), 4);
        assert!(assigned.iter().all(|r| r.size() == 1));
    }

    #[test]
    fn test_eleven_members_nobody_starves() {
        let ids = members(11);
        let layout = token_layout(ids.iter().map(String::as_str), 100);
        assert!(layout.iter().all(|(_, r)| r.is_some()));
    }

    proptest! {
        #[test]
        fn layout_covers_token_space(n in 1usize..150, max_tokens in 1u32..200) {
            let ids = members(n);
            let layout = token_layout(ids.iter().map(String::as_str), max_tokens);

            let mut owned = vec![0u32; max_tokens as usize];
            for (_, range) in &layout {
                match range {
                    Some(range) => {
                        for token in range.start..=range.end {
                            owned[token as usize] += 1;
                        }
                    }
                    None => prop_assert!(n > max_tokens as usize),
                }
            }
            prop_assert!(owned.iter().all(|count| *count == 1));
        }

        #[test]
        fn assign_matches_layout(n in 1usize..40, max_tokens in 1u32..120) {
            let ids = members(n);
            let layout = token_layout(ids.iter().map(String::as_str), max_tokens);
            for (id, range) in layout {
                prop_assert_eq!(
                    assign_tokens(ids.iter().map(String::as_str), &id, max_tokens),
                    range
                );
            }
        }
    }
}

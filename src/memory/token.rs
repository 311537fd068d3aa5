//! Lease tokens and the per-owner live token set.

use std::collections::HashSet;
use std::fmt;

/// Opaque id of one live lease or lifetime handle.
///
/// Tokens are unique among the currently-live leases of a single owner.
/// [`OwnerToken::NONE`] is reserved and is never handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerToken(u64);

impl OwnerToken {
    /// Reserved sentinel; never a valid live token.
    pub const NONE: OwnerToken = OwnerToken(0);

    /// Raw token value.
    pub const fn value(self) -> u64 {
        self.0
    }

    /// True for the reserved sentinel.
    pub const fn is_none(self) -> bool {
        self.0 == Self::NONE.0
    }
}

impl fmt::Display for OwnerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic token allocator plus the set of tokens currently live.
///
/// Allocation wraps around on overflow and skips both the sentinel and any
/// token that is still live, so a long-lived lease never collides with a new
/// one.
#[derive(Debug, Default)]
pub(crate) struct TokenSet {
    last: u64,
    live: HashSet<OwnerToken>,
}

impl TokenSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn starting_after(last: u64) -> Self {
        Self { last, live: HashSet::new() }
    }

    /// Allocates a fresh token and records it as live.
    pub(crate) fn issue(&mut self) -> OwnerToken {
        loop {
            self.last = self.last.wrapping_add(1);
            let candidate = OwnerToken(self.last);
            if candidate.is_none() || self.live.contains(&candidate) {
                continue;
            }
            self.live.insert(candidate);
            return candidate;
        }
    }

    /// Removes a live token. Returns false when the token was not live.
    pub(crate) fn remove(&mut self, token: OwnerToken) -> bool {
        self.live.remove(&token)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.live.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn first_token_is_not_the_sentinel() {
        let mut tokens = TokenSet::new();
        let first = tokens.issue();
        assert!(!first.is_none());
        assert_eq!(first.value(), 1);
    }

    #[test]
    fn wraparound_skips_sentinel() {
        let mut tokens = TokenSet::starting_after(u64::MAX - 1);
        assert_eq!(tokens.issue().value(), u64::MAX);
        // Next candidate wraps to 0, which is reserved.
        assert_eq!(tokens.issue().value(), 1);
    }

    #[test]
    fn wraparound_skips_live_tokens() {
        let mut tokens = TokenSet::new();
        let long_lived = tokens.issue();
        assert_eq!(long_lived.value(), 1);

        let mut wrapped = TokenSet { last: u64::MAX, live: tokens.live.clone() };
        let next = wrapped.issue();
        assert_eq!(next.value(), 2, "token 1 is still live and must be skipped");
    }

    #[test]
    fn removing_unknown_token_reports_false() {
        let mut tokens = TokenSet::new();
        let token = tokens.issue();
        assert!(tokens.remove(token));
        assert!(!tokens.remove(token));
        assert!(!tokens.remove(OwnerToken::NONE));
        assert!(tokens.is_empty());
    }

    proptest! {
        #[test]
        fn live_tokens_are_unique_and_never_sentinel(
            start in prop::sample::select(vec![0u64, 1, u64::MAX - 3, u64::MAX - 1, u64::MAX]),
            operations in prop::collection::vec(any::<bool>(), 1..200),
        ) {
            let mut tokens = TokenSet::starting_after(start);
            let mut live: Vec<OwnerToken> = Vec::new();

            for issue in operations {
                if issue || live.is_empty() {
                    let token = tokens.issue();
                    prop_assert!(!token.is_none());
                    prop_assert!(!live.contains(&token));
                    live.push(token);
                } else {
                    let token = live.swap_remove(0);
                    prop_assert!(tokens.remove(token));
                }
                prop_assert_eq!(tokens.len(), live.len());
            }
        }
    }
}

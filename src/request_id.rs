//! Correlation-id minting for requests that arrive without one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use crate::env;

/// Mints identifiers of the form `<hostname>-<pid>-<counter>`, with the
/// counter zero-padded to 8 digits.
///
/// Identifiers are strictly increasing and collision-free within one
/// process lifetime. The increment is a single atomic add, so a minter can
/// be shared freely across threads.
pub struct RequestIdMinter {
    prefix: String,
    counter: AtomicU64,
}

impl RequestIdMinter {
    pub fn new() -> Self {
        RequestIdMinter {
            prefix: format!("{}-{}", env::hostname(), std::process::id()),
            counter: AtomicU64::new(0),
        }
    }

    /// Produce the next identifier.
    pub fn mint(&self) -> String {
        let value = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{:08}", self.prefix, value)
    }
}

impl Default for RequestIdMinter {
    fn default() -> Self {
        Self::new()
    }
}

/// Mint an identifier from the process-wide minter.
pub fn mint_request_id() -> String {
    static MINTER: OnceLock<RequestIdMinter> = OnceLock::new();
    MINTER.get_or_init(RequestIdMinter::new).mint()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn first_identifier_is_counter_one() {
        let minter = RequestIdMinter::new();
        let id = minter.mint();
        assert!(id.ends_with("-00000001"), "unexpected id {id}");
        assert!(id.starts_with(env::hostname()));
    }

    #[test]
    fn counter_is_zero_padded_to_eight_digits() {
        let minter = RequestIdMinter::new();
        let id = minter.mint();
        let counter = id.rsplit('-').next().unwrap();
        assert_eq!(counter.len(), 8);
        assert!(counter.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn identifiers_are_unique_across_threads() {
        let minter = Arc::new(RequestIdMinter::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let minter = Arc::clone(&minter);
            handles.push(std::thread::spawn(move || {
                (0..100).map(|_| minter.mint()).collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 800);
    }

    #[test]
    fn global_minter_is_monotonic() {
        let first = mint_request_id();
        let second = mint_request_id();
        assert_ne!(first, second);
        assert!(second > first, "{second} should sort after {first}");
    }
}

//! Seed derivation for reproducible randomness
//!
//! A run has at most one master seed. Every component that draws random
//! numbers (user-agent choice, follow-up tokens) derives its own seed from it
//! with SHA-256 so the streams are independent yet reproducible.
//!
//! # Example
//!
//! ```
//! use sloth_core::seed::derive_seed;
//!
//! assert_eq!(derive_seed(42, "followup_tokens"), derive_seed(42, "followup_tokens"));
//! assert_ne!(derive_seed(42, "followup_tokens"), derive_seed(42, "user_agent"));
//! ```

use rand::rngs::SmallRng;
use rand::SeedableRng;
use sha2::{Digest, Sha256};

/// Derive a component-specific seed from a master seed using SHA-256
pub fn derive_seed(master_seed: u64, component: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(master_seed.to_be_bytes());
    hasher.update(component.as_bytes());
    let result = hasher.finalize();

    let mut head = [0u8; 8];
    head.copy_from_slice(&result[..8]);
    u64::from_be_bytes(head)
}

/// RNG for `component`: derived from `master` when set, from OS entropy otherwise
pub fn component_rng(master: Option<u64>, component: &str) -> SmallRng {
    match master {
        Some(seed) => SmallRng::seed_from_u64(derive_seed(seed, component)),
        None => SmallRng::from_entropy(),
    }
}

/// Component names for seed derivation
pub mod components {
    pub const FOLLOWUP_TOKENS: &str = "followup_tokens";
    pub const USER_AGENT: &str = "user_agent";
}

//! Random follow-up fragments
//!
//! Header mode fragments look like `X-<token>: <token>\r\n`; body mode
//! fragments look like `&<token>=<token>`. Token lengths are drawn
//! independently from `1..=max(1, max_len / 2)` so the whole fragment never
//! needs more random characters than `max_len`.

use crate::config::AttackMode;
use rand::distributions::Alphanumeric;
use rand::rngs::SmallRng;
use rand::Rng;

/// Generates follow-up fragments for one attack mode
#[derive(Debug)]
pub struct FollowUpSource {
    prefix: &'static str,
    separator: &'static str,
    postfix: &'static str,
    rng: SmallRng,
}

impl FollowUpSource {
    pub fn new(mode: AttackMode, rng: SmallRng) -> Self {
        let (prefix, separator, postfix) = match mode {
            AttackMode::Headers => ("X-", ": ", "\r\n"),
            AttackMode::Body => ("&", "=", ""),
        };
        Self { prefix, separator, postfix, rng }
    }

    /// Produce one fragment whose two random tokens total at most `max_len` bytes
    pub fn generate(&mut self, max_len: usize) -> Vec<u8> {
        let upper = (max_len / 2).max(1);
        let name_len = self.rng.gen_range(1..=upper);
        let value_len = self.rng.gen_range(1..=upper);

        let mut fragment = String::with_capacity(
            self.prefix.len() + self.separator.len() + self.postfix.len() + name_len + value_len,
        );
        fragment.push_str(self.prefix);
        self.push_token(&mut fragment, name_len);
        fragment.push_str(self.separator);
        self.push_token(&mut fragment, value_len);
        fragment.push_str(self.postfix);
        fragment.into_bytes()
    }

    fn push_token(&mut self, out: &mut String, len: usize) {
        out.extend((&mut self.rng).sample_iter(&Alphanumeric).take(len).map(char::from));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::{component_rng, components};

    fn source(mode: AttackMode) -> FollowUpSource {
        FollowUpSource::new(mode, component_rng(Some(3), components::FOLLOWUP_TOKENS))
    }

    #[test]
    fn test_header_fragments() {
        let mut src = source(AttackMode::Headers);
        for _ in 0..200 {
            let frag = String::from_utf8(src.generate(24)).unwrap();
            assert!(frag.starts_with("X-"), "{frag:?}");
            assert!(frag.ends_with("\r\n"), "{frag:?}");
            let (name, value) = frag[2..frag.len() - 2].split_once(": ").unwrap();
            assert!((1..=12).contains(&name.len()), "{frag:?}");
            assert!((1..=12).contains(&value.len()), "{frag:?}");
            assert!(name.chars().chain(value.chars()).all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn test_body_fragments() {
        let mut src = source(AttackMode::Body);
        for _ in 0..200 {
            let frag = String::from_utf8(src.generate(24)).unwrap();
            assert!(frag.starts_with('&'), "{frag:?}");
            assert_eq!(frag.matches('=').count(), 1, "{frag:?}");
            assert!(!frag.contains("\r\n"));
            assert!(frag.len() <= 1 + 1 + 24);
        }
    }

    #[test]
    fn test_tiny_max_still_emits_tokens() {
        let mut src = source(AttackMode::Body);
        assert_eq!(src.generate(1).len(), "&a=b".len());
        assert_eq!(src.generate(0).len(), "&a=b".len());
    }

    #[test]
    fn test_same_seed_same_fragments() {
        let mut a = source(AttackMode::Headers);
        let mut b = source(AttackMode::Headers);
        for _ in 0..10 {
            assert_eq!(a.generate(24), b.generate(24));
        }
    }
}

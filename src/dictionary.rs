use hashbrown::HashMap;
use rand::Rng;

/// User-supplied dictionary tokens. Kept sorted by length so overwrite
/// stages can restore clobbered bytes without tracking every write.
#[derive(Default)]
pub struct Dictionary {
    tokens: Vec<Vec<u8>>,
}

impl Dictionary {
    /// Add a token, ignoring duplicates and oversized entries. Returns true
    /// if the token was new.
    pub fn add_token(&mut self, token: &[u8], max_len: usize) -> bool {
        if token.is_empty() || token.len() > max_len {
            return false;
        }
        if self.tokens.iter().any(|existing| existing == token) {
            return false;
        }
        let at = self.tokens.partition_point(|existing| existing.len() <= token.len());
        self.tokens.insert(at, token.to_vec());
        true
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &[Vec<u8>] {
        &self.tokens
    }

    pub fn choose<R: Rng>(&self, rng: &mut R) -> Option<&[u8]> {
        if self.tokens.is_empty() {
            return None;
        }
        Some(&self.tokens[rng.gen_range(0..self.tokens.len())])
    }
}

struct AutoToken {
    data: Vec<u8>,
    count: u64,
}

/// Tokens mined from the flip1 stage. Keyed by the first eight bytes so
/// repeated sightings of the same prefix merge into one entry; the longest
/// observed form of the token wins.
#[derive(Default)]
pub struct AutoDictionary {
    entries: HashMap<u64, AutoToken>,
}

impl AutoDictionary {
    /// Record a candidate token. All-zero candidates are dropped since the
    /// interesting-value stages already cover them.
    pub fn maybe_add(&mut self, token: &[u8], cap: usize) -> bool {
        if token.iter().all(|x| *x == 0) {
            return false;
        }

        let key = {
            let mut tmp = [0; 8];
            let len = token.len().min(8);
            tmp[..len].copy_from_slice(&token[..len]);
            u64::from_le_bytes(tmp)
        };

        if let Some(entry) = self.entries.get_mut(&key) {
            entry.count += 1;
            if token.len() > entry.data.len() {
                entry.data.clear();
                entry.data.extend_from_slice(token);
            }
            return false;
        }

        if self.entries.len() >= cap {
            // Full: recycle the least-seen slot.
            let Some(&evict) =
                self.entries.iter().min_by_key(|(_, entry)| entry.count).map(|(k, _)| k)
            else {
                return false;
            };
            self.entries.remove(&evict);
        }

        self.entries.insert(key, AutoToken { data: token.to_vec(), count: 1 });
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The `n` most frequently re-mined tokens, most popular first. Ties are
    /// broken by content so iteration order is stable.
    pub fn top(&self, n: usize) -> Vec<&[u8]> {
        let mut entries: Vec<_> = self.entries.values().collect();
        entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.data.cmp(&b.data)));
        entries.into_iter().take(n).map(|entry| entry.data.as_slice()).collect()
    }

    pub fn choose<R: Rng>(&self, rng: &mut R) -> Option<&[u8]> {
        if self.entries.is_empty() {
            return None;
        }
        let index = rng.gen_range(0..self.entries.len());
        self.entries.values().nth(index).map(|entry| entry.data.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_tokens_sorted_by_length() {
        let mut dict = Dictionary::default();
        assert!(dict.add_token(b"longer", 16));
        assert!(dict.add_token(b"ab", 16));
        assert!(dict.add_token(b"midl", 16));
        assert!(!dict.add_token(b"ab", 16));
        assert!(!dict.add_token(&[1; 32], 16));

        let lens: Vec<_> = dict.tokens().iter().map(|t| t.len()).collect();
        assert_eq!(lens, vec![2, 4, 6]);
    }

    #[test]
    fn auto_tokens_merge_by_prefix() {
        let mut auto = AutoDictionary::default();
        assert!(auto.maybe_add(b"IHDR", 16));
        assert!(!auto.maybe_add(b"IHDR", 16));
        assert!(!auto.maybe_add(b"IHDRxx", 16));
        assert_eq!(auto.len(), 1);
        assert_eq!(auto.top(4), vec![b"IHDRxx".as_slice()]);
    }

    #[test]
    fn auto_rejects_zero_tokens_and_honors_cap() {
        let mut auto = AutoDictionary::default();
        assert!(!auto.maybe_add(&[0, 0, 0], 2));

        assert!(auto.maybe_add(b"aaa", 2));
        assert!(auto.maybe_add(b"bbb", 2));
        // "aaa" is re-mined, so "bbb" is the low-count slot to recycle.
        auto.maybe_add(b"aaa", 2);
        assert!(auto.maybe_add(b"ccc", 2));
        assert_eq!(auto.len(), 2);
        let top = auto.top(2);
        assert!(top.contains(&b"aaa".as_slice()));
        assert!(top.contains(&b"ccc".as_slice()));
    }

    #[test]
    fn top_orders_by_count() {
        let mut auto = AutoDictionary::default();
        auto.maybe_add(b"rare", 8);
        auto.maybe_add(b"common", 8);
        auto.maybe_add(b"common", 8);
        assert_eq!(auto.top(1), vec![b"common".as_slice()]);
    }
}

use std::collections::HashSet;

/// Admits at most one in-flight item per key.
#[derive(Debug, Default)]
pub struct KeyGate {
    active_keys: HashSet<String>,
}

impl KeyGate {
    /// Walks `candidates` in order and admits up to `max_items` whose key is
    /// neither active nor already admitted in this pass. The rest are returned
    /// untouched, in order.
    pub fn admit<T, F>(
        &mut self,
        candidates: Vec<T>,
        max_items: usize,
        key_of: F,
    ) -> (Vec<T>, Vec<T>)
    where
        F: Fn(&T) -> &str,
    {
        let mut selected = Vec::new();
        let mut held = Vec::new();
        for item in candidates {
            let key = key_of(&item);
            if selected.len() < max_items && !self.active_keys.contains(key) {
                self.active_keys.insert(key.to_string());
                selected.push(item);
            } else {
                held.push(item);
            }
        }
        (selected, held)
    }

    pub fn complete(&mut self, key: &str) {
        self.active_keys.remove(key);
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.active_keys.contains(key)
    }

    pub fn active_len(&self) -> usize {
        self.active_keys.len()
    }
}

use std::collections::HashMap;

use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    counters: HashMap<String, u64>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn short_id(&mut self, kind: &str) -> String {
        let counter = self.counters.entry(kind.to_string()).or_insert(0);
        *counter += 1;
        format!("{}-{}", kind, counter)
    }

    pub fn unique_id(prefix: Option<&str>) -> String {
        let id = Uuid::new_v4().simple().to_string();
        match prefix {
            Some(prefix) if !prefix.is_empty() => format!("{}-{}", prefix, id),
            _ => id,
        }
    }

    /// Raises counters so that `short_id` never returns one of `existing`.
    pub fn resync<I, S>(&mut self, existing: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for id in existing {
            if let Some((kind, n)) = split_short_id(id.as_ref()) {
                let counter = self.counters.entry(kind.to_string()).or_insert(0);
                if *counter < n {
                    *counter = n;
                }
            }
        }
    }

    pub fn reset_all(&mut self) {
        self.counters.clear();
    }

    pub fn current(&self, kind: &str) -> u64 {
        self.counters.get(kind).copied().unwrap_or(0)
    }
}

fn split_short_id(id: &str) -> Option<(&str, u64)> {
    let (kind, number) = id.rsplit_once('-')?;
    if kind.is_empty() || number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    number.parse().ok().map(|n| (kind, n))
}

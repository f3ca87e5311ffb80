use serde::Serialize;
use std::collections::BTreeMap;

/// Append-only multimap from entity id to the sub-entities processed under
/// it. Recording a key twice concatenates, it never overwrites.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ResultMap(BTreeMap<String, Vec<String>>);

impl ResultMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record<I, S>(&mut self, key: &str, items: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0
            .entry(key.to_string())
            .or_default()
            .extend(items.into_iter().map(Into::into));
    }

    /// Pure merge of two maps; values of shared keys are concatenated in order.
    pub fn merged(&self, other: &ResultMap) -> ResultMap {
        let mut out = self.clone();
        for (key, items) in &other.0 {
            out.record(key, items.iter().cloned());
        }
        out
    }

    #[cfg(test)]
    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.0.get(key).map(Vec::as_slice)
    }

    #[cfg(test)]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    #[cfg(test)]
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, Vec<V>)> for ResultMap {
    fn from_iter<T: IntoIterator<Item = (K, Vec<V>)>>(iter: T) -> Self {
        let mut map = ResultMap::new();
        for (key, items) in iter {
            let key = key.into();
            map.record(&key, items);
        }
        map
    }
}

/// Outcome of one driver pass over one storage target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub ok: ResultMap,
    pub failed: ResultMap,
}

impl SyncOutcome {
    pub fn merged(&self, other: &SyncOutcome) -> SyncOutcome {
        SyncOutcome {
            ok: self.ok.merged(&other.ok),
            failed: self.failed.merged(&other.failed),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

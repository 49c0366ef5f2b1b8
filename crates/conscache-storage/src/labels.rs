use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::persisted::StorageError;

/// Hard upper bound for a decoded label block.
///
/// Labels are small metadata; a corrupted length prefix must not turn into an
/// enormous allocation while scanning a directory.
pub const LABELS_LIMIT_BYTES: usize = 1024 * 1024;

/// A single key/value label attached to a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label {
    pub key: String,
    pub value: String,
}

impl Label {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// An ordered sequence of labels. Keys may repeat; lookups return the first
/// match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Labels(Vec<Label>);

impl Labels {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push(Label::new(key, value));
    }

    /// Returns the value of the first label whose key is `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|label| label.key == key)
            .map(|label| label.value.as_str())
    }

    /// Returns true if the first label keyed `key` has exactly `value`.
    pub fn matches(&self, key: &str, value: &str) -> bool {
        self.get(key) == Some(value)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Label> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Label] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Zeroes every key and value, then empties the sequence.
    pub fn wipe(&mut self) {
        for label in &mut self.0 {
            wipe_string(&mut label.key);
            wipe_string(&mut label.value);
        }
        self.0.clear();
    }
}

/// Zeroes the bytes of `s` before releasing them, leaving `s` empty.
pub fn wipe_string(s: &mut String) {
    let mut bytes = std::mem::take(s).into_bytes();
    bytes.fill(0);
    std::hint::black_box(&bytes);
}

impl<K, V> FromIterator<(K, V)> for Labels
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| Label::new(key, value))
                .collect(),
        )
    }
}

impl<'a> IntoIterator for &'a Labels {
    type Item = &'a Label;
    type IntoIter = std::slice::Iter<'a, Label>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

fn bincode_options() -> impl bincode::Options + Copy {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
}

pub(crate) fn encode_labels(labels: &Labels) -> Result<Vec<u8>, StorageError> {
    let bytes = bincode_options().serialize(labels)?;
    if bytes.len() > LABELS_LIMIT_BYTES {
        return Err(StorageError::OversizedLabels {
            labels_len: bytes.len() as u64,
        });
    }
    Ok(bytes)
}

pub(crate) fn decode_labels(bytes: &[u8]) -> Result<Labels, StorageError> {
    if bytes.len() > LABELS_LIMIT_BYTES {
        return Err(StorageError::OversizedLabels {
            labels_len: bytes.len() as u64,
        });
    }
    Ok(bincode_options()
        .with_limit(LABELS_LIMIT_BYTES as u64)
        .deserialize(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_match_wins() {
        let labels: Labels = [("flavor", "ns"), ("type", "consensus"), ("flavor", "microdesc")]
            .into_iter()
            .collect();

        assert_eq!(labels.get("flavor"), Some("ns"));
        assert_eq!(labels.get("type"), Some("consensus"));
        assert_eq!(labels.get("missing"), None);
        assert!(labels.matches("flavor", "ns"));
        // The shadowed duplicate never matches.
        assert!(!labels.matches("flavor", "microdesc"));
    }

    #[test]
    fn label_block_round_trips_in_order() {
        let mut labels = Labels::new();
        labels.push("b", "2");
        labels.push("a", "1");
        labels.push("b", "3");

        let bytes = encode_labels(&labels).unwrap();
        let decoded = decode_labels(&bytes).unwrap();
        assert_eq!(decoded, labels);
        let keys: Vec<_> = decoded.iter().map(|l| l.key.as_str()).collect();
        assert_eq!(keys, ["b", "a", "b"]);
    }

    #[test]
    fn garbage_label_block_is_error() {
        // Claims u64::MAX labels; the size limit must reject it without allocating.
        let bytes = u64::MAX.to_le_bytes();
        match decode_labels(&bytes).unwrap_err() {
            StorageError::Labels(_) => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn wipe_empties_labels() {
        let mut labels: Labels = [("type", "consensus"), ("flavor", "ns")].into_iter().collect();
        labels.wipe();
        assert!(labels.is_empty());
        assert_eq!(labels.get("type"), None);

        let mut name = String::from("doc-0000000001");
        wipe_string(&mut name);
        assert!(name.is_empty());
    }
}

//! Grant constraint sets
//!
//! A constraint set is an unordered collection of variants keyed by their
//! structural [`Fingerprint`]. Two declarations that differ only in map
//! ordering collapse into one member, so reordering a configuration never
//! shows up as a change.

use crate::api::GrantConstraints;
use crate::error::ValidationError;
use crate::hash::{self, Fingerprint};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Kind of encryption context constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    /// The request context must equal the mapping exactly
    Equals,
    /// The request context must contain the mapping
    Subset,
}

impl ConstraintKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConstraintKind::Equals => "encryption_context_equals",
            ConstraintKind::Subset => "encryption_context_subset",
        }
    }
}

impl std::fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single constraint: a kind plus its encryption context mapping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintVariant {
    pub kind: ConstraintKind,
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ConstraintVariant {
    pub fn new(kind: ConstraintKind) -> Self {
        Self {
            kind,
            context: HashMap::new(),
        }
    }

    pub fn equals<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(ConstraintKind::Equals).with_pairs(pairs)
    }

    pub fn subset<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(ConstraintKind::Subset).with_pairs(pairs)
    }

    fn with_pairs<K, V>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.context
            .extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn is_populated(&self) -> bool {
        !self.context.is_empty()
    }

    pub fn fingerprint(&self) -> Fingerprint {
        hash::fingerprint(self.kind, &self.context)
    }
}

impl PartialEq for ConstraintVariant {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.context == other.context
    }
}

impl Eq for ConstraintVariant {}

impl std::hash::Hash for ConstraintVariant {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write_u64(self.fingerprint());
    }
}

/// Unordered set of constraint variants, deduplicated by fingerprint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<ConstraintVariant>", into = "Vec<ConstraintVariant>")]
pub struct ConstraintSet {
    members: BTreeMap<Fingerprint, ConstraintVariant>,
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a variant; returns false if a structurally equal one exists
    pub fn insert(&mut self, variant: ConstraintVariant) -> bool {
        let fp = variant.fingerprint();
        if self.members.contains_key(&fp) {
            return false;
        }
        self.members.insert(fp, variant);
        true
    }

    pub fn with(mut self, variant: ConstraintVariant) -> Self {
        self.insert(variant);
        self
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConstraintVariant> {
        self.members.values()
    }

    /// Variants that carry a non-empty mapping
    pub fn populated(&self) -> impl Iterator<Item = &ConstraintVariant> {
        self.iter().filter(|v| v.is_populated())
    }

    /// Order-independent fingerprint of the whole set
    ///
    /// Empty variants are never sent nor reported back, so they do not count.
    pub fn fingerprint(&self) -> Fingerprint {
        hash::combine(self.populated().map(ConstraintVariant::fingerprint))
    }

    /// Build the wire form for a create request
    ///
    /// Returns `None` when no variant is populated. Call [`validate`] first;
    /// with more than one populated variant the later kind wins.
    pub fn to_wire(&self) -> Option<GrantConstraints> {
        let mut wire = GrantConstraints::default();
        let mut populated = false;
        for variant in self.populated() {
            populated = true;
            let context = Some(variant.context.clone());
            match variant.kind {
                ConstraintKind::Equals => wire.encryption_context_equals = context,
                ConstraintKind::Subset => wire.encryption_context_subset = context,
            }
        }
        populated.then_some(wire)
    }

    /// Flatten constraints reported by the remote API
    pub fn from_wire(wire: &GrantConstraints) -> Self {
        let mut set = Self::new();
        let fields = [
            (ConstraintKind::Equals, &wire.encryption_context_equals),
            (ConstraintKind::Subset, &wire.encryption_context_subset),
        ];
        for (kind, context) in fields {
            if let Some(context) = context.as_ref().filter(|c| !c.is_empty()) {
                set.insert(ConstraintVariant {
                    kind,
                    context: context.clone(),
                });
            }
        }
        set
    }
}

impl PartialEq for ConstraintSet {
    fn eq(&self, other: &Self) -> bool {
        let populated = |set: &ConstraintSet| -> Vec<Fingerprint> {
            set.populated().map(ConstraintVariant::fingerprint).collect()
        };
        populated(self) == populated(other)
    }
}

impl Eq for ConstraintSet {}

impl From<Vec<ConstraintVariant>> for ConstraintSet {
    fn from(variants: Vec<ConstraintVariant>) -> Self {
        variants.into_iter().collect()
    }
}

impl From<ConstraintSet> for Vec<ConstraintVariant> {
    fn from(set: ConstraintSet) -> Self {
        set.members.into_values().collect()
    }
}

impl FromIterator<ConstraintVariant> for ConstraintSet {
    fn from_iter<I: IntoIterator<Item = ConstraintVariant>>(iter: I) -> Self {
        let mut set = Self::new();
        for variant in iter {
            set.insert(variant);
        }
        set
    }
}

/// Check the mutual-exclusion rule: at most one populated variant in total
pub fn validate(set: &ConstraintSet) -> Result<(), ValidationError> {
    let mut kinds: Vec<ConstraintKind> = set.populated().map(|v| v.kind).collect();
    if kinds.len() > 1 {
        kinds.sort();
        return Err(ValidationError::ConflictingConstraints { kinds });
    }
    Ok(())
}

pub fn is_valid(set: &ConstraintSet) -> bool {
    validate(set).is_ok()
}

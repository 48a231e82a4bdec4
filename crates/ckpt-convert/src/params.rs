//! Ordered parameter mapping.
//!
//! A checkpoint is a set of named tensors. Each [`Tensor`] carries its own
//! precision tag ([`DType`]) next to its buffer, so a [`ParameterMap`] can
//! hold heterogeneous precisions until [`crate::normalize`] makes them
//! uniform.

use std::collections::{BTreeMap, HashMap};

use candle_core::{DType, Tensor};
use serde::Serialize;

/// Name, precision and shape of one parameter, without its values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TensorSummary {
    pub name: String,
    pub dtype: String,
    pub shape: Vec<usize>,
    pub elem_count: usize,
}

impl TensorSummary {
    fn of(name: &str, tensor: &Tensor) -> Self {
        Self {
            name: name.to_string(),
            dtype: tensor.dtype().as_str().to_string(),
            shape: tensor.dims().to_vec(),
            elem_count: tensor.elem_count(),
        }
    }
}

impl std::fmt::Display for TensorSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {:?}", self.name, self.dtype, self.shape)
    }
}

/// Mapping from parameter name to tensor that remembers insertion order.
///
/// Inserting a name that is already present replaces the value and keeps the
/// original position.
#[derive(Debug, Clone, Default)]
pub struct ParameterMap {
    entries: Vec<(String, Tensor)>,
    index: HashMap<String, usize>,
}

impl ParameterMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, Tensor)>,
    {
        let mut map = Self::new();
        for (name, tensor) in entries {
            map.insert(name, tensor);
        }
        map
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.index.get(name).map(|&i| &self.entries[i].1)
    }

    /// Parameter names in map order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.entries.iter().map(|(name, tensor)| (name.as_str(), tensor))
    }

    /// Entries as a slice, in map order.
    pub fn entries(&self) -> &[(String, Tensor)] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<(String, Tensor)> {
        self.entries
    }

    /// Insert or replace. Returns the previous tensor for `name`, if any.
    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) -> Option<Tensor> {
        let name = name.into();
        match self.index.get(&name) {
            Some(&i) => Some(std::mem::replace(&mut self.entries[i].1, tensor)),
            None => {
                self.index.insert(name.clone(), self.entries.len());
                self.entries.push((name, tensor));
                None
            }
        }
    }

    /// Insert `name` directly after `anchor`.
    ///
    /// An existing `name` is replaced in place; a missing `anchor` appends.
    pub fn insert_after(
        &mut self,
        anchor: &str,
        name: impl Into<String>,
        tensor: Tensor,
    ) -> Option<Tensor> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return self.insert(name, tensor);
        }
        let Some(&anchor_pos) = self.index.get(anchor) else {
            return self.insert(name, tensor);
        };

        let pos = anchor_pos + 1;
        self.entries.insert(pos, (name, tensor));
        for (i, (entry_name, _)) in self.entries.iter().enumerate().skip(pos) {
            self.index.insert(entry_name.clone(), i);
        }
        None
    }

    /// Total number of scalar values across all tensors.
    pub fn parameter_count(&self) -> usize {
        self.entries.iter().map(|(_, t)| t.elem_count()).sum()
    }

    /// Number of tensors per precision, keyed by dtype name.
    pub fn dtype_histogram(&self) -> BTreeMap<String, usize> {
        let mut histogram = BTreeMap::new();
        for (_, tensor) in &self.entries {
            *histogram.entry(tensor.dtype().as_str().to_string()).or_insert(0) += 1;
        }
        histogram
    }

    /// True when every tensor already has precision `dtype`.
    pub fn is_uniform(&self, dtype: DType) -> bool {
        self.entries.iter().all(|(_, t)| t.dtype() == dtype)
    }

    pub fn summaries(&self) -> Vec<TensorSummary> {
        self.entries.iter().map(|(name, tensor)| TensorSummary::of(name, tensor)).collect()
    }
}

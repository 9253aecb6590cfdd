//! Parameter Registry
//!
//! All trainable tensors live in one [`ParamStore`]. Layers register their
//! tensors at construction and keep only the returned [`ParamId`] handles,
//! so the builders can hand those handles back to callers directly instead
//! of re-collecting variables by name.
//!
//! Each parameter is tagged with exactly one [`ParamGroup`]:
//!
//! - `Pretrainable`: embedding table and every recurrent-layer tensor. A
//!   warm-start tool can restore this group on its own.
//! - `OutputOnly`: the output projection matrix and bias.
//!
//! Because the tag is stored per parameter, the two groups always partition
//! the registry.

use crate::error::{LmError, Result};
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};

/// Handle to a tensor registered in a [`ParamStore`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(usize);

impl ParamId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Partition a parameter belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamGroup {
    Pretrainable,
    OutputOnly,
}

/// A named trainable tensor
#[derive(Clone, Debug)]
pub struct Parameter {
    pub name: String,
    pub group: ParamGroup,
    pub value: Tensor,
}

/// Owned registry of every trainable tensor
#[derive(Clone, Debug, Default)]
pub struct ParamStore {
    params: Vec<Parameter>,
}

impl ParamStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tensor and return its handle
    ///
    /// Names must be unique; they are what [`ParamStore::restore_group`]
    /// matches on. A repeated name is a configuration error.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        group: ParamGroup,
        value: Tensor,
    ) -> Result<ParamId> {
        let name = name.into();
        if self.params.iter().any(|p| p.name == name) {
            return Err(LmError::config(format!("duplicate parameter name {}", name)));
        }
        let id = ParamId(self.params.len());
        self.params.push(Parameter { name, group, value });
        Ok(id)
    }

    pub fn get(&self, id: ParamId) -> &Tensor {
        &self.params[id.0].value
    }

    pub fn get_mut(&mut self, id: ParamId) -> &mut Tensor {
        &mut self.params[id.0].value
    }

    pub fn parameter(&self, id: ParamId) -> &Parameter {
        &self.params[id.0]
    }

    pub fn name(&self, id: ParamId) -> &str {
        &self.params[id.0].name
    }

    pub fn group(&self, id: ParamId) -> ParamGroup {
        self.params[id.0].group
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Every handle, in registration order
    pub fn ids(&self) -> impl Iterator<Item = ParamId> + '_ {
        (0..self.params.len()).map(ParamId)
    }

    /// Handles of one group, in registration order
    pub fn group_ids(&self, group: ParamGroup) -> Vec<ParamId> {
        self.ids().filter(|&id| self.group(id) == group).collect()
    }

    /// Total number of scalar weights
    pub fn num_weights(&self) -> usize {
        self.params.iter().map(|p| p.value.len()).sum()
    }

    /// Copy out one group as `(name, tensor)` pairs
    pub fn export_group(&self, group: ParamGroup) -> Vec<(String, Tensor)> {
        self.params
            .iter()
            .filter(|p| p.group == group)
            .map(|p| (p.name.clone(), p.value.clone()))
            .collect()
    }

    /// Overwrite one group from `(name, tensor)` pairs
    ///
    /// Every name must exist in this store, belong to `group`, and carry a
    /// tensor of identical shape. Nothing is written unless every entry
    /// checks out. Returns the number of tensors restored.
    pub fn restore_group(&mut self, group: ParamGroup, values: &[(String, Tensor)]) -> Result<usize> {
        let mut targets = Vec::with_capacity(values.len());
        for (name, tensor) in values {
            let idx = self
                .params
                .iter()
                .position(|p| &p.name == name)
                .ok_or_else(|| LmError::UnknownParameter(name.clone()))?;
            let param = &self.params[idx];
            if param.group != group {
                return Err(LmError::UnknownParameter(format!(
                    "{} belongs to {:?}, not {:?}",
                    name, param.group, group
                )));
            }
            if param.value.shape != tensor.shape {
                return Err(LmError::ShapeMismatch {
                    context: "restore_group",
                    expected: param.value.shape.clone(),
                    actual: tensor.shape.clone(),
                });
            }
            targets.push(idx);
        }

        for (idx, (_, tensor)) in targets.into_iter().zip(values) {
            self.params[idx].value = tensor.clone();
        }
        Ok(values.len())
    }
}

/// One gradient tensor per registered parameter
///
/// Indexed by [`ParamId`]; starts at zero and is accumulated into by the
/// layers' backward passes.
#[derive(Clone, Debug)]
pub struct Gradients {
    grads: Vec<Tensor>,
}

impl Gradients {
    /// Zero gradients shaped like every parameter in `store`
    pub fn zeros_like(store: &ParamStore) -> Self {
        Self {
            grads: store.params.iter().map(|p| p.value.zeros_like()).collect(),
        }
    }

    pub fn get(&self, id: ParamId) -> &Tensor {
        &self.grads[id.0]
    }

    pub fn get_mut(&mut self, id: ParamId) -> &mut Tensor {
        &mut self.grads[id.0]
    }

    /// Add `grad` into the gradient slot for `id`
    pub fn accumulate(&mut self, id: ParamId, grad: &Tensor) {
        self.grads[id.0].add_assign(grad);
    }

    pub fn len(&self) -> usize {
        self.grads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grads.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ParamId, &Tensor)> {
        self.grads.iter().enumerate().map(|(i, g)| (ParamId(i), g))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ParamId, &mut Tensor)> {
        self.grads.iter_mut().enumerate().map(|(i, g)| (ParamId(i), g))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ParamStore {
        let mut store = ParamStore::new();
        store.register("emb", ParamGroup::Pretrainable, Tensor::zeros(vec![4, 2])).unwrap();
        store.register("w", ParamGroup::OutputOnly, Tensor::zeros(vec![2, 4])).unwrap();
        store.register("b", ParamGroup::OutputOnly, Tensor::zeros(vec![4])).unwrap();
        store
    }

    #[test]
    fn test_groups_partition_store() {
        let store = store();
        let pre = store.group_ids(ParamGroup::Pretrainable);
        let out = store.group_ids(ParamGroup::OutputOnly);
        assert_eq!(pre.len() + out.len(), store.len());
        assert!(pre.iter().all(|id| !out.contains(id)));
        assert_eq!(store.num_weights(), 8 + 8 + 4);
    }

    #[test]
    fn test_restore_rejects_wrong_group_without_writing() {
        let mut store = store();
        let values = vec![
            ("emb".to_string(), Tensor::new(vec![1.0; 8], vec![4, 2])),
            ("w".to_string(), Tensor::new(vec![1.0; 8], vec![2, 4])),
        ];
        assert!(store.restore_group(ParamGroup::Pretrainable, &values).is_err());
        assert!(store.get(ParamId(0)).data.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_restore_rejects_shape_mismatch() {
        let mut store = store();
        let values = vec![("emb".to_string(), Tensor::zeros(vec![2, 4]))];
        let err = store.restore_group(ParamGroup::Pretrainable, &values).unwrap_err();
        assert!(matches!(err, LmError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut store = store();
        let err = store
            .register("w", ParamGroup::Pretrainable, Tensor::zeros(vec![1]))
            .unwrap_err();
        assert!(matches!(err, LmError::Config(_)));
        assert_eq!(store.len(), 3);
        assert_eq!(store.group(ParamId(1)), ParamGroup::OutputOnly);
    }

    #[test]
    fn test_gradients_accumulate() {
        let store = store();
        let mut grads = Gradients::zeros_like(&store);
        let id = ParamId(2);
        grads.accumulate(id, &Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![4]));
        grads.accumulate(id, &Tensor::new(vec![1.0, 1.0, 1.0, 1.0], vec![4]));
        assert_eq!(grads.get(id).data, vec![2.0, 3.0, 4.0, 5.0]);
    }
}

//! Tracking of gradient variables that need no computation.

use rustc_hash::FxHashSet;

use crate::naming::{EMPTY_VAR_NAME, GRAD_VAR_SUFFIX, grad_var_name};
use crate::operator::VarNameMap;

/// Gradient-suffixed variable names known to require no computation.
///
/// The set only grows during one backward pass: once a gradient is known to
/// be unneeded it stays unneeded for every operator visited afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoGradSet {
    names: FxHashSet<String>,
}

impl NoGradSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the initial set of a backward pass: the gradient of
    /// [`EMPTY_VAR_NAME`] plus the gradient of every name in `no_grad_vars`.
    pub fn seeded<I, S>(no_grad_vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        set.insert(grad_var_name(EMPTY_VAR_NAME));
        for name in no_grad_vars {
            set.insert(grad_var_name(name.as_ref()));
        }
        set
    }

    /// Inserts an already gradient-suffixed name.
    pub fn insert(&mut self, grad_name: impl Into<String>) -> bool {
        self.names.insert(grad_name.into())
    }

    pub fn contains(&self, grad_name: &str) -> bool {
        self.names.contains(grad_name)
    }

    /// Marks the gradient of every variable bound in `vars` as unneeded.
    pub fn insert_grads_of(&mut self, vars: &VarNameMap) {
        for name in vars.values().flatten() {
            self.names.insert(grad_var_name(name));
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn is_superset(&self, other: &NoGradSet) -> bool {
        self.names.is_superset(&other.names)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

/// Returns true iff every variable in `vars`, with `suffix` appended, is in
/// `set`. Stops at the first variable that is not.
pub fn all_in_set(vars: &VarNameMap, suffix: &str, set: &NoGradSet) -> bool {
    vars.values()
        .flatten()
        .all(|name| set.contains(&format!("{name}{suffix}")))
}

/// [`all_in_set`] with the gradient suffix.
pub fn all_grads_unneeded(vars: &VarNameMap, set: &NoGradSet) -> bool {
    all_in_set(vars, GRAD_VAR_SUFFIX, set)
}

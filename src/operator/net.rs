use std::collections::BTreeSet;

use super::{AttributeMap, Operator, VarNameMap, rename_in};
use crate::error::{BackwardError, Result};

/// Kind of a net built by hand.
pub const PLAIN_NET_KIND: &str = "plain_net";

/// Kind of the sentinel no-op.
pub const NOP_KIND: &str = "@NOP@";

/// Kind of a net produced by the backward builder.
pub const GENERATED_BACKWARD_KIND: &str = "@GENERATED_BACKWARD@";

/// Slot under which a sealed net exposes the aggregate bindings of its
/// children.
pub const ALL_VARS_SLOT: &str = "all";

/// A composite operator owning an ordered list of child operators.
///
/// Children run in list order. The net's own bindings are derived from its
/// children when it is sealed with [`NetOp::complete_add_op`].
#[derive(Debug, Clone, PartialEq)]
pub struct NetOp {
    kind: String,
    pub(super) inputs: VarNameMap,
    pub(super) outputs: VarNameMap,
    attrs: AttributeMap,
    ops: Vec<Operator>,
    intermediate_outputs: BTreeSet<String>,
    sealed: bool,
    calculated: bool,
}

impl NetOp {
    /// Creates an empty, unsealed net of kind [`PLAIN_NET_KIND`].
    pub fn new() -> Self {
        Self::with_kind(PLAIN_NET_KIND)
    }

    pub fn with_kind(kind: impl Into<String>) -> Self {
        NetOp {
            kind: kind.into(),
            inputs: VarNameMap::new(),
            outputs: VarNameMap::new(),
            attrs: AttributeMap::new(),
            ops: Vec::new(),
            intermediate_outputs: BTreeSet::new(),
            sealed: false,
            calculated: false,
        }
    }

    /// The sentinel "no gradient computation needed here": an empty, sealed
    /// net of kind [`NOP_KIND`].
    ///
    /// Each call builds a new value, so a no-op placed in one result can be
    /// renamed or extended without affecting another.
    pub fn nop() -> Self {
        let mut net = Self::with_kind(NOP_KIND);
        net.complete_add_op(true);
        net
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn inputs(&self) -> &VarNameMap {
        &self.inputs
    }

    pub fn outputs(&self) -> &VarNameMap {
        &self.outputs
    }

    pub fn attrs(&self) -> &AttributeMap {
        &self.attrs
    }

    pub fn ops(&self) -> &[Operator] {
        &self.ops
    }

    /// Mutable access to the children. The list itself cannot grow or shrink
    /// through this.
    pub fn ops_mut(&mut self) -> &mut [Operator] {
        &mut self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Whether the net's bindings were derived from its children by
    /// `complete_add_op(true)`.
    pub fn bindings_calculated(&self) -> bool {
        self.calculated
    }

    /// Variables produced by one child and consumed by a later one.
    pub fn intermediate_outputs(&self) -> &BTreeSet<String> {
        &self.intermediate_outputs
    }

    /// Appends `op` after the current last child.
    pub fn append_op(&mut self, op: impl Into<Operator>) -> Result<()> {
        self.ensure_open()?;
        self.ops.push(op.into());
        Ok(())
    }

    /// Inserts `op` at `pos`, shifting every later child by one.
    pub fn insert_op(&mut self, pos: usize, op: impl Into<Operator>) -> Result<()> {
        self.ensure_open()?;
        if pos > self.ops.len() {
            return Err(BackwardError::InsertOutOfRange {
                pos,
                len: self.ops.len(),
            });
        }
        self.ops.insert(pos, op.into());
        Ok(())
    }

    /// Seals the net.
    ///
    /// With `calc`, the net's bindings are recomputed from its children:
    /// outputs are every variable any child produces, inputs are the
    /// variables consumed before any earlier child produced them. Both are
    /// exposed under [`ALL_VARS_SLOT`] in sorted order.
    pub fn complete_add_op(&mut self, calc: bool) {
        self.sealed = true;
        if !calc {
            return;
        }
        self.calculated = true;

        let mut input_set = BTreeSet::new();
        let mut output_set = BTreeSet::new();
        self.intermediate_outputs.clear();

        for op in &self.ops {
            for name in op.inputs().values().flatten() {
                if output_set.contains(name) {
                    self.intermediate_outputs.insert(name.clone());
                } else {
                    input_set.insert(name.clone());
                }
            }
            for name in op.outputs().values().flatten() {
                output_set.insert(name.clone());
            }
        }

        self.inputs.clear();
        self.inputs
            .insert(ALL_VARS_SLOT.to_string(), input_set.into_iter().collect());
        self.outputs.clear();
        self.outputs
            .insert(ALL_VARS_SLOT.to_string(), output_set.into_iter().collect());
    }

    pub(super) fn rename(&mut self, old_name: &str, new_name: &str) {
        rename_in(&mut self.inputs, old_name, new_name);
        rename_in(&mut self.outputs, old_name, new_name);
        if self.intermediate_outputs.remove(old_name) {
            self.intermediate_outputs.insert(new_name.to_string());
        }
        for op in &mut self.ops {
            op.rename(old_name, new_name);
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.sealed {
            return Err(BackwardError::NetSealed(self.kind.clone()));
        }
        Ok(())
    }
}

impl Default for NetOp {
    fn default() -> Self {
        Self::new()
    }
}

//! Operator graph model.
//!
//! An [`Operator`] is either a leaf computation or a [`NetOp`] that owns an
//! ordered list of child operators. Both bind variables by name through
//! argument slots: `inputs["X"] = ["a", "b"]` means slot `X` reads variables
//! `a` and `b`.

mod attribute;
mod net;

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{BackwardError, Result};

pub use attribute::{Attribute, AttributeMap};
pub use net::{ALL_VARS_SLOT, GENERATED_BACKWARD_KIND, NOP_KIND, NetOp, PLAIN_NET_KIND};

/// Mapping from argument slot name to the variables bound to that slot.
///
/// Ordered by slot name so every traversal of the bindings is deterministic.
pub type VarNameMap = BTreeMap<String, Vec<String>>;

/// Builds a [`VarNameMap`] from `slot => [vars...]` pairs.
///
/// ```
/// use netgrad::vars;
///
/// let inputs = vars! { "X" => ["a", "b"], "Y" => ["c"] };
/// assert_eq!(inputs["X"], vec!["a".to_string(), "b".to_string()]);
/// ```
#[macro_export]
macro_rules! vars {
    () => {
        $crate::operator::VarNameMap::new()
    };
    ($($slot:expr => [$($var:expr),* $(,)?]),+ $(,)?) => {{
        let mut map = $crate::operator::VarNameMap::new();
        $(
            map.insert($slot.to_string(), vec![$($var.to_string()),*]);
        )+
        map
    }};
}

/// A single computation with no sub-operators.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafOp {
    kind: String,
    inputs: VarNameMap,
    outputs: VarNameMap,
    attrs: AttributeMap,
}

impl LeafOp {
    pub fn new(
        kind: impl Into<String>,
        inputs: VarNameMap,
        outputs: VarNameMap,
        attrs: AttributeMap,
    ) -> Self {
        LeafOp {
            kind: kind.into(),
            inputs,
            outputs,
            attrs,
        }
    }
}

/// An operator node: either a leaf or a net of child operators.
#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    Leaf(LeafOp),
    Net(NetOp),
}

impl Operator {
    /// Returns a fresh sentinel no-op. See [`NetOp::nop`].
    pub fn nop() -> Self {
        Operator::Net(NetOp::nop())
    }

    /// The type tag of this operator.
    pub fn kind(&self) -> &str {
        match self {
            Operator::Leaf(op) => &op.kind,
            Operator::Net(net) => net.kind(),
        }
    }

    pub fn inputs(&self) -> &VarNameMap {
        match self {
            Operator::Leaf(op) => &op.inputs,
            Operator::Net(net) => net.inputs(),
        }
    }

    pub fn outputs(&self) -> &VarNameMap {
        match self {
            Operator::Leaf(op) => &op.outputs,
            Operator::Net(net) => net.outputs(),
        }
    }

    /// Mutable access to the input bindings.
    ///
    /// For a net this is its aggregate view only; children are untouched.
    pub fn inputs_mut(&mut self) -> &mut VarNameMap {
        match self {
            Operator::Leaf(op) => &mut op.inputs,
            Operator::Net(net) => &mut net.inputs,
        }
    }

    /// Mutable access to the output bindings. See [`Operator::inputs_mut`].
    pub fn outputs_mut(&mut self) -> &mut VarNameMap {
        match self {
            Operator::Leaf(op) => &mut op.outputs,
            Operator::Net(net) => &mut net.outputs,
        }
    }

    pub fn attrs(&self) -> &AttributeMap {
        match self {
            Operator::Leaf(op) => &op.attrs,
            Operator::Net(net) => net.attrs(),
        }
    }

    pub fn is_net_op(&self) -> bool {
        matches!(self, Operator::Net(_))
    }

    pub fn as_net(&self) -> Option<&NetOp> {
        match self {
            Operator::Net(net) => Some(net),
            Operator::Leaf(_) => None,
        }
    }

    /// Returns the single variable bound to input slot `slot`.
    pub fn input(&self, slot: &str) -> Result<&str> {
        single_var(self.kind(), slot, self.inputs())
    }

    /// Returns the single variable bound to output slot `slot`.
    pub fn output(&self, slot: &str) -> Result<&str> {
        single_var(self.kind(), slot, self.outputs())
    }

    /// Returns every variable bound to input slot `slot`.
    pub fn inputs_of(&self, slot: &str) -> Result<&[String]> {
        slot_vars(self.kind(), slot, self.inputs())
    }

    /// Returns every variable bound to output slot `slot`.
    pub fn outputs_of(&self, slot: &str) -> Result<&[String]> {
        slot_vars(self.kind(), slot, self.outputs())
    }

    /// Lists produced variables in slot order.
    ///
    /// For nets, `has_intermediate = false` drops variables that are consumed
    /// again inside the net.
    pub fn output_vars(&self, has_intermediate: bool) -> Vec<String> {
        let all = self.outputs().values().flatten();
        match self {
            Operator::Net(net) if !has_intermediate => all
                .filter(|name| !net.intermediate_outputs().contains(*name))
                .cloned()
                .collect(),
            _ => all.cloned().collect(),
        }
    }

    /// Renames every binding of `old_name` to `new_name`, including those of
    /// all children of a net.
    pub fn rename(&mut self, old_name: &str, new_name: &str) {
        match self {
            Operator::Leaf(op) => {
                rename_in(&mut op.inputs, old_name, new_name);
                rename_in(&mut op.outputs, old_name, new_name);
            }
            Operator::Net(net) => net.rename(old_name, new_name),
        }
    }
}

impl From<LeafOp> for Operator {
    fn from(op: LeafOp) -> Self {
        Operator::Leaf(op)
    }
}

impl From<NetOp> for Operator {
    fn from(net: NetOp) -> Self {
        Operator::Net(net)
    }
}

pub(crate) fn rename_in(map: &mut VarNameMap, old_name: &str, new_name: &str) {
    for name in map.values_mut().flatten() {
        if name == old_name {
            *name = new_name.to_string();
        }
    }
}

fn slot_vars<'a>(kind: &str, slot: &str, map: &'a VarNameMap) -> Result<&'a [String]> {
    map.get(slot)
        .map(Vec::as_slice)
        .ok_or_else(|| BackwardError::SlotNotFound {
            kind: kind.to_string(),
            slot: slot.to_string(),
        })
}

fn single_var<'a>(kind: &str, slot: &str, map: &'a VarNameMap) -> Result<&'a str> {
    match slot_vars(kind, slot, map)? {
        [name] => Ok(name),
        names => Err(BackwardError::ArgumentArity {
            kind: kind.to_string(),
            slot: slot.to_string(),
            got: names.len(),
        }),
    }
}

fn fmt_bindings(f: &mut fmt::Formatter<'_>, map: &VarNameMap) -> fmt::Result {
    for (i, (slot, names)) in map.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{slot}[{}]", names.join(", "))?;
    }
    Ok(())
}

/// One line per operator; children of a net are indented by four spaces.
impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Op({}), inputs:{{", self.kind())?;
        fmt_bindings(f, self.inputs())?;
        write!(f, "}}, outputs:{{")?;
        fmt_bindings(f, self.outputs())?;
        write!(f, "}}.")?;

        if let Operator::Net(net) = self {
            writeln!(f)?;
            for op in net.ops() {
                for line in op.to_string().lines() {
                    writeln!(f, "    {line}")?;
                }
            }
        }
        Ok(())
    }
}

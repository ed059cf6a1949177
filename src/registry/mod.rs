//! Operator registry.
//!
//! The backward builder never constructs operators itself. It asks an
//! [`OpFactory`] for the gradient operator of each leaf and for the synthetic
//! `add` / `fill_zeros_like` operators it inserts. [`OpRegistry`] is the
//! prototype-driven implementation used by default.

mod defaults;
mod proto;

use log::trace;
use rustc_hash::FxHashMap;

use crate::error::{BackwardError, Result};
use crate::naming::grad_var_name;
use crate::operator::{AttributeMap, LeafOp, Operator, VarNameMap};

pub use proto::{ArgProto, OpProto};

/// Constructs operators by kind.
pub trait OpFactory {
    /// Creates an operator of `kind` with the given bindings and attributes.
    fn create_op(
        &self,
        kind: &str,
        inputs: VarNameMap,
        outputs: VarNameMap,
        attrs: AttributeMap,
    ) -> Result<Operator>;

    /// Creates the operator computing the gradient of the leaf `forward`.
    ///
    /// Its bindings follow the gradient naming convention: a slot `S@GRAD`
    /// binds the gradient names of the variables bound to slot `S` of
    /// `forward`.
    fn create_grad_op(&self, forward: &Operator) -> Result<Operator>;
}

/// Registry of operator prototypes.
#[derive(Debug, Clone, Default)]
pub struct OpRegistry {
    protos: FxHashMap<String, OpProto>,
}

impl OpRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in operators: `add`,
    /// `fill_zeros_like`, `mul`, `rowwise_add`, `sigmoid`, `mean` and their
    /// gradients.
    pub fn with_default_ops() -> Self {
        let mut registry = Self::new();
        for proto in defaults::default_protos() {
            registry.insert_proto(proto);
        }
        registry
    }

    /// Registers `proto` and, if it declares one, its gradient prototype.
    pub fn register(&mut self, proto: OpProto) -> Result<()> {
        if self.protos.contains_key(&proto.kind) {
            return Err(BackwardError::DuplicateRegistration(proto.kind));
        }
        if let Some(grad) = proto.grad_kind.as_ref()
            && self.protos.contains_key(grad)
        {
            return Err(BackwardError::DuplicateRegistration(grad.clone()));
        }
        self.insert_proto(proto);
        Ok(())
    }

    pub fn proto(&self, kind: &str) -> Option<&OpProto> {
        self.protos.get(kind)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.protos.contains_key(kind)
    }

    pub fn len(&self) -> usize {
        self.protos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.protos.is_empty()
    }

    fn insert_proto(&mut self, proto: OpProto) {
        if let Some(grad) = proto.grad_proto() {
            trace!("register {} (gradient of {})", grad.kind, proto.kind);
            self.protos.insert(grad.kind.clone(), grad);
        }
        trace!("register {}", proto.kind);
        self.protos.insert(proto.kind.clone(), proto);
    }

    fn lookup(&self, kind: &str) -> Result<&OpProto> {
        self.proto(kind)
            .ok_or_else(|| BackwardError::UnknownOperator(kind.to_string()))
    }
}

impl OpFactory for OpRegistry {
    fn create_op(
        &self,
        kind: &str,
        inputs: VarNameMap,
        outputs: VarNameMap,
        attrs: AttributeMap,
    ) -> Result<Operator> {
        let proto = self.lookup(kind)?;
        check_bindings(kind, &proto.inputs, &inputs)?;
        check_bindings(kind, &proto.outputs, &outputs)?;
        Ok(LeafOp::new(kind, inputs, outputs, attrs).into())
    }

    fn create_grad_op(&self, forward: &Operator) -> Result<Operator> {
        if forward.is_net_op() {
            return Err(BackwardError::NotALeaf(forward.kind().to_string()));
        }
        let proto = self.lookup(forward.kind())?;
        let grad_kind = proto
            .grad_kind
            .as_deref()
            .ok_or_else(|| BackwardError::GradientNotRegistered(forward.kind().to_string()))?;
        self.lookup(grad_kind)?;

        let mut inputs = VarNameMap::new();
        let mut outputs = VarNameMap::new();

        for arg in proto.inputs.iter().filter(|arg| !arg.no_gradient) {
            inputs.insert(arg.name.clone(), forward.inputs_of(&arg.name)?.to_vec());
        }
        for arg in &proto.outputs {
            let names = forward.outputs_of(&arg.name)?;
            inputs.insert(arg.name.clone(), names.to_vec());
            inputs.insert(grad_var_name(&arg.name), grad_names(names));
        }
        for arg in &proto.inputs {
            let names = forward.inputs_of(&arg.name)?;
            outputs.insert(grad_var_name(&arg.name), grad_names(names));
        }

        Ok(LeafOp::new(grad_kind, inputs, outputs, forward.attrs().clone()).into())
    }
}

fn grad_names(names: &[String]) -> Vec<String> {
    names.iter().map(|name| grad_var_name(name)).collect()
}

fn check_bindings(kind: &str, args: &[ArgProto], bindings: &VarNameMap) -> Result<()> {
    for arg in args {
        let names = bindings
            .get(&arg.name)
            .ok_or_else(|| BackwardError::MissingArgument {
                kind: kind.to_string(),
                slot: arg.name.clone(),
            })?;
        if !arg.duplicable && names.len() != 1 {
            return Err(BackwardError::ArgumentArity {
                kind: kind.to_string(),
                slot: arg.name.clone(),
                got: names.len(),
            });
        }
    }
    if let Some(slot) = bindings
        .keys()
        .find(|slot| !args.iter().any(|arg| &arg.name == *slot))
    {
        return Err(BackwardError::UnexpectedArgument {
            kind: kind.to_string(),
            slot: slot.clone(),
        });
    }
    Ok(())
}

use crate::naming::grad_var_name;

/// Declaration of one argument slot of an operator kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgProto {
    pub name: String,
    /// The slot may bind any number of variables instead of exactly one.
    pub duplicable: bool,
    /// The gradient operator does not read this forward input.
    pub no_gradient: bool,
}

impl ArgProto {
    pub fn new(name: impl Into<String>) -> Self {
        ArgProto {
            name: name.into(),
            duplicable: false,
            no_gradient: false,
        }
    }

    pub fn duplicable(mut self) -> Self {
        self.duplicable = true;
        self
    }

    pub fn no_gradient(mut self) -> Self {
        self.no_gradient = true;
        self
    }
}

/// Declaration of an operator kind: its argument slots and the kind of its
/// gradient operator, if any.
///
/// # Example
///
/// ```
/// use netgrad::registry::{ArgProto, OpProto};
///
/// let proto = OpProto::new("mul")
///     .input(ArgProto::new("X"))
///     .input(ArgProto::new("Y"))
///     .output(ArgProto::new("Out"))
///     .grad("mul_grad");
/// assert_eq!(proto.grad_kind.as_deref(), Some("mul_grad"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpProto {
    pub kind: String,
    pub inputs: Vec<ArgProto>,
    pub outputs: Vec<ArgProto>,
    pub grad_kind: Option<String>,
}

impl OpProto {
    pub fn new(kind: impl Into<String>) -> Self {
        OpProto {
            kind: kind.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            grad_kind: None,
        }
    }

    pub fn input(mut self, arg: ArgProto) -> Self {
        self.inputs.push(arg);
        self
    }

    pub fn output(mut self, arg: ArgProto) -> Self {
        self.outputs.push(arg);
        self
    }

    pub fn grad(mut self, grad_kind: impl Into<String>) -> Self {
        self.grad_kind = Some(grad_kind.into());
        self
    }

    /// Derives the prototype of the gradient operator.
    ///
    /// Inputs are the forward inputs not marked `no_gradient`, then the
    /// forward outputs, then the gradients of the forward outputs. Outputs are
    /// the gradients of every forward input.
    pub fn grad_proto(&self) -> Option<OpProto> {
        let grad_kind = self.grad_kind.as_ref()?;
        let mut proto = OpProto::new(grad_kind.clone());

        for arg in self.inputs.iter().filter(|arg| !arg.no_gradient) {
            proto.inputs.push(ArgProto {
                no_gradient: false,
                ..arg.clone()
            });
        }
        for arg in &self.outputs {
            proto.inputs.push(arg.clone());
        }
        for arg in &self.outputs {
            proto.inputs.push(grad_arg(arg));
        }
        for arg in &self.inputs {
            proto.outputs.push(grad_arg(arg));
        }
        Some(proto)
    }
}

fn grad_arg(arg: &ArgProto) -> ArgProto {
    ArgProto {
        name: grad_var_name(&arg.name),
        duplicable: arg.duplicable,
        no_gradient: false,
    }
}

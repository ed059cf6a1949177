use super::{ArgProto, OpProto};

/// Prototypes of the built-in operators.
///
/// `add` and `fill_zeros_like` are required by the backward builder; the rest
/// are the common layers used to assemble forward nets.
pub(super) fn default_protos() -> Vec<OpProto> {
    vec![
        OpProto::new("add")
            .input(ArgProto::new("X").duplicable())
            .output(ArgProto::new("Out"))
            .grad("add_grad"),
        OpProto::new("fill_zeros_like")
            .input(ArgProto::new("Src"))
            .output(ArgProto::new("Dst")),
        OpProto::new("mul")
            .input(ArgProto::new("X"))
            .input(ArgProto::new("Y"))
            .output(ArgProto::new("Out"))
            .grad("mul_grad"),
        OpProto::new("rowwise_add")
            .input(ArgProto::new("X"))
            .input(ArgProto::new("b"))
            .output(ArgProto::new("Out"))
            .grad("rowwise_add_grad"),
        OpProto::new("sigmoid")
            .input(ArgProto::new("X"))
            .output(ArgProto::new("Y"))
            .grad("sigmoid_grad"),
        OpProto::new("mean")
            .input(ArgProto::new("X"))
            .output(ArgProto::new("Out"))
            .grad("mean_grad"),
    ]
}

use crate::utils::{expect_operands, missing_state};
use revgraph_core::{
    checkpoint::{CheckpointId, CheckpointSlots},
    error::{Error, Result},
    result::BackwardResult,
    tensor::Tensor,
    value::GradientValue,
};
use revgraph_graph::{Operation, OperationEntry};

// ────────────────────────────────────────────────────────────────────────────
//  identity
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Identity;

impl Identity {
    pub fn from_entry(_entry: &OperationEntry) -> Result<Self> {
        Ok(Self)
    }
}

impl Operation for Identity {
    fn op_type(&self) -> &str {
        "identity"
    }

    fn forward(&mut self, operands: &[GradientValue]) -> Result<GradientValue> {
        expect_operands(self.op_type(), operands, 1)?;
        Ok(operands[0].clone())
    }

    fn backward(&self, output_gradient: &GradientValue) -> Result<BackwardResult> {
        Ok(BackwardResult::single(output_gradient.clone()))
    }
}

// ────────────────────────────────────────────────────────────────────────────
//  scale
// ────────────────────────────────────────────────────────────────────────────

/// Multiplies its operand by the constant `factor` attribute.
#[derive(Debug)]
pub struct Scale {
    factor: f32,
}

impl Scale {
    pub fn new(factor: f32) -> Self {
        Self { factor }
    }

    pub fn from_entry(entry: &OperationEntry) -> Result<Self> {
        Ok(Self::new(entry.required_attribute("factor")?))
    }

    pub fn factor(&self) -> f32 {
        self.factor
    }
}

impl Operation for Scale {
    fn op_type(&self) -> &str {
        "scale"
    }

    fn forward(&mut self, operands: &[GradientValue]) -> Result<GradientValue> {
        expect_operands(self.op_type(), operands, 1)?;
        Ok(operands[0].scale(self.factor))
    }

    fn backward(&self, output_gradient: &GradientValue) -> Result<BackwardResult> {
        Ok(BackwardResult::single(output_gradient.scale(self.factor)))
    }
}

// ────────────────────────────────────────────────────────────────────────────
//  tanh
// ────────────────────────────────────────────────────────────────────────────

/// Elementwise hyperbolic tangent. Keeps its output for `backward` and can
/// checkpoint it.
#[derive(Default)]
pub struct Tanh {
    output: Option<GradientValue>,
    slots: CheckpointSlots<Option<GradientValue>>,
}

impl Tanh {
    pub fn from_entry(_entry: &OperationEntry) -> Result<Self> {
        Ok(Self::default())
    }
}

fn tanh_of(value: &GradientValue) -> GradientValue {
    match value {
        GradientValue::Scalar(x) => GradientValue::Scalar(x.tanh()),
        GradientValue::Tensor(t) => GradientValue::Tensor(t.map(f32::tanh)),
        GradientValue::TensorList(ts) => GradientValue::TensorList(ts.iter().map(|t| t.map(f32::tanh)).collect()),
    }
}

fn tanh_grad_plane(output: &Tensor, gradient: &Tensor) -> Result<Tensor> {
    output.map(|y| 1.0 - y * y).mul(gradient)
}

impl Operation for Tanh {
    fn op_type(&self) -> &str {
        "tanh"
    }

    fn forward(&mut self, operands: &[GradientValue]) -> Result<GradientValue> {
        expect_operands(self.op_type(), operands, 1)?;
        let output = tanh_of(&operands[0]);
        self.output = Some(output.clone());
        Ok(output)
    }

    fn backward(&self, output_gradient: &GradientValue) -> Result<BackwardResult> {
        let output = self.output.as_ref().ok_or_else(|| missing_state(self.op_type()))?;
        let gradient = match (output, output_gradient) {
            (GradientValue::Scalar(y), GradientValue::Scalar(g)) => GradientValue::Scalar((1.0 - y * y) * g),
            (GradientValue::Tensor(y), GradientValue::Tensor(g)) => GradientValue::Tensor(tanh_grad_plane(y, g)?),
            (GradientValue::TensorList(ys), GradientValue::TensorList(gs)) if ys.len() == gs.len() => {
                GradientValue::TensorList(
                    ys.iter()
                        .zip(gs.iter())
                        .map(|(y, g)| tanh_grad_plane(y, g))
                        .collect::<Result<Vec<_>>>()?,
                )
            },
            (y, g) => {
                return Err(Error::GradientKindMismatch {
                    expected: y.kind(),
                    got: g.kind(),
                })
            },
        };
        Ok(BackwardResult::single(gradient))
    }

    fn store(&mut self, checkpoint: CheckpointId) -> Result<()> {
        self.slots.store(checkpoint, self.output.clone());
        Ok(())
    }

    fn restore(&mut self, checkpoint: CheckpointId) -> Result<()> {
        self.output = self.slots.restore(self.op_type(), checkpoint)?;
        Ok(())
    }

    fn reset(&mut self) {
        self.output = None;
        self.slots.clear();
    }
}

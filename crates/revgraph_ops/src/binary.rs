use crate::utils::{expect_operands, missing_state};
use revgraph_core::{
    accumulate::accumulate_values,
    checkpoint::{CheckpointId, CheckpointSlots},
    error::{Error, Result},
    result::BackwardResult,
    tensor::Tensor,
    value::GradientValue,
};
use revgraph_graph::{Operation, OperationEntry};

// ────────────────────────────────────────────────────────────────────────────
//  add
// ────────────────────────────────────────────────────────────────────────────

/// Sum of any number of operands of one kind and shape.
#[derive(Debug, Default)]
pub struct Add {
    arity: Option<usize>,
}

impl Add {
    pub fn from_entry(entry: &OperationEntry) -> Result<Self> {
        Ok(Self {
            arity: (!entry.inputs.is_empty()).then_some(entry.inputs.len()),
        })
    }
}

impl Operation for Add {
    fn op_type(&self) -> &str {
        "add"
    }

    fn forward(&mut self, operands: &[GradientValue]) -> Result<GradientValue> {
        if operands.is_empty() {
            return Err(Error::OperandCount {
                op: self.op_type().to_string(),
                expected: 1,
                got: 0,
            });
        }
        self.arity = Some(operands.len());
        accumulate_values(operands)
    }

    fn backward(&self, output_gradient: &GradientValue) -> Result<BackwardResult> {
        let arity = self.arity.ok_or_else(|| missing_state(self.op_type()))?;
        Ok(BackwardResult::multiple(vec![output_gradient.clone(); arity]))
    }
}

// ────────────────────────────────────────────────────────────────────────────
//  mul
// ────────────────────────────────────────────────────────────────────────────

fn mul_values(a: &GradientValue, b: &GradientValue) -> Result<GradientValue> {
    match (a, b) {
        (GradientValue::Scalar(x), GradientValue::Scalar(y)) => Ok(GradientValue::Scalar(x * y)),
        (GradientValue::Tensor(x), GradientValue::Tensor(y)) => Ok(GradientValue::Tensor(x.mul(y)?)),
        (GradientValue::TensorList(xs), GradientValue::TensorList(ys)) if xs.len() == ys.len() => Ok(
            GradientValue::TensorList(xs.iter().zip(ys.iter()).map(|(x, y)| x.mul(y)).collect::<Result<_>>()?),
        ),
        (x, y) => Err(Error::GradientKindMismatch {
            expected: x.kind(),
            got: y.kind(),
        }),
    }
}

/// Elementwise product of two operands.
#[derive(Default)]
pub struct Mul {
    operands: Option<(GradientValue, GradientValue)>,
    slots: CheckpointSlots<Option<(GradientValue, GradientValue)>>,
}

impl Mul {
    pub fn from_entry(_entry: &OperationEntry) -> Result<Self> {
        Ok(Self::default())
    }
}

impl Operation for Mul {
    fn op_type(&self) -> &str {
        "mul"
    }

    fn forward(&mut self, operands: &[GradientValue]) -> Result<GradientValue> {
        expect_operands(self.op_type(), operands, 2)?;
        let output = mul_values(&operands[0], &operands[1])?;
        self.operands = Some((operands[0].clone(), operands[1].clone()));
        Ok(output)
    }

    fn backward(&self, output_gradient: &GradientValue) -> Result<BackwardResult> {
        let (a, b) = self.operands.as_ref().ok_or_else(|| missing_state(self.op_type()))?;
        Ok(BackwardResult::multiple(vec![
            mul_values(output_gradient, b)?,
            mul_values(output_gradient, a)?,
        ]))
    }

    fn store(&mut self, checkpoint: CheckpointId) -> Result<()> {
        self.slots.store(checkpoint, self.operands.clone());
        Ok(())
    }

    fn restore(&mut self, checkpoint: CheckpointId) -> Result<()> {
        self.operands = self.slots.restore(self.op_type(), checkpoint)?;
        Ok(())
    }

    fn reset(&mut self) {
        self.operands = None;
        self.slots.clear();
    }
}

// ────────────────────────────────────────────────────────────────────────────
//  matmul
// ────────────────────────────────────────────────────────────────────────────

/// Product of two 2-D tensors.
#[derive(Default)]
pub struct Matmul {
    operands: Option<(Tensor, Tensor)>,
    slots: CheckpointSlots<Option<(Tensor, Tensor)>>,
}

impl Matmul {
    pub fn from_entry(_entry: &OperationEntry) -> Result<Self> {
        Ok(Self::default())
    }
}

impl Operation for Matmul {
    fn op_type(&self) -> &str {
        "matmul"
    }

    fn forward(&mut self, operands: &[GradientValue]) -> Result<GradientValue> {
        expect_operands(self.op_type(), operands, 2)?;
        let lhs = operands[0].as_tensor()?;
        let rhs = operands[1].as_tensor()?;
        let output = lhs.matmul(rhs)?;
        self.operands = Some((lhs.clone(), rhs.clone()));
        Ok(GradientValue::Tensor(output))
    }

    fn backward(&self, output_gradient: &GradientValue) -> Result<BackwardResult> {
        let (lhs, rhs) = self.operands.as_ref().ok_or_else(|| missing_state(self.op_type()))?;
        let g = output_gradient.as_tensor()?;
        let grad_lhs = g.matmul(&rhs.transpose()?)?;
        let grad_rhs = lhs.transpose()?.matmul(g)?;
        Ok(BackwardResult::multiple(vec![grad_lhs.into(), grad_rhs.into()]))
    }

    fn store(&mut self, checkpoint: CheckpointId) -> Result<()> {
        self.slots.store(checkpoint, self.operands.clone());
        Ok(())
    }

    fn restore(&mut self, checkpoint: CheckpointId) -> Result<()> {
        self.operands = self.slots.restore(self.op_type(), checkpoint)?;
        Ok(())
    }

    fn reset(&mut self) {
        self.operands = None;
        self.slots.clear();
    }
}

use crate::utils::{expect_operands, missing_state};
use revgraph_core::{
    checkpoint::{CheckpointId, CheckpointSlots},
    error::{Error, Result},
    result::BackwardResult,
    tensor::Tensor,
    value::GradientValue,
};
use revgraph_graph::{Operation, OperationEntry};

/// Packs tensor operands into one multi-plane value.
#[derive(Debug, Default)]
pub struct Stack {
    planes: Option<usize>,
}

impl Stack {
    pub fn from_entry(_entry: &OperationEntry) -> Result<Self> {
        Ok(Self::default())
    }
}

impl Operation for Stack {
    fn op_type(&self) -> &str {
        "stack"
    }

    fn forward(&mut self, operands: &[GradientValue]) -> Result<GradientValue> {
        let planes = operands
            .iter()
            .map(|operand| operand.as_tensor().cloned())
            .collect::<Result<Vec<Tensor>>>()?;
        self.planes = Some(planes.len());
        Ok(GradientValue::TensorList(planes))
    }

    fn backward(&self, output_gradient: &GradientValue) -> Result<BackwardResult> {
        let planes = self.planes.ok_or_else(|| missing_state(self.op_type()))?;
        let gradients = output_gradient.as_tensor_list()?;
        if gradients.len() != planes {
            return Err(Error::ShapeMismatch {
                expected: vec![planes],
                got: vec![gradients.len()],
                msg: "stack gradient planes".into(),
            });
        }
        Ok(BackwardResult::multiple(
            gradients.iter().cloned().map(GradientValue::Tensor).collect(),
        ))
    }
}

/// Picks plane `index` out of a multi-plane operand.
pub struct Select {
    index: usize,
    shapes: Option<Vec<Vec<usize>>>,
    slots: CheckpointSlots<Option<Vec<Vec<usize>>>>,
}

impl Select {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            shapes: None,
            slots: CheckpointSlots::new(),
        }
    }

    pub fn from_entry(entry: &OperationEntry) -> Result<Self> {
        Ok(Self::new(entry.index_attribute("index")?))
    }
}

impl Operation for Select {
    fn op_type(&self) -> &str {
        "select"
    }

    fn forward(&mut self, operands: &[GradientValue]) -> Result<GradientValue> {
        expect_operands(self.op_type(), operands, 1)?;
        let planes = operands[0].as_tensor_list()?;
        let plane = planes.get(self.index).ok_or_else(|| Error::Operation {
            op: self.op_type().to_string(),
            message: format!("index {} out of {} planes", self.index, planes.len()),
        })?;
        self.shapes = Some(planes.iter().map(|p| p.shape().to_vec()).collect());
        Ok(GradientValue::Tensor(plane.clone()))
    }

    fn backward(&self, output_gradient: &GradientValue) -> Result<BackwardResult> {
        let shapes = self.shapes.as_ref().ok_or_else(|| missing_state(self.op_type()))?;
        let gradient = output_gradient.as_tensor()?;
        let planes = shapes
            .iter()
            .enumerate()
            .map(|(i, shape)| {
                if i == self.index {
                    gradient.clone()
                } else {
                    Tensor::zeros(shape)
                }
            })
            .collect::<Vec<_>>();
        Ok(BackwardResult::single(GradientValue::TensorList(planes)))
    }

    fn store(&mut self, checkpoint: CheckpointId) -> Result<()> {
        self.slots.store(checkpoint, self.shapes.clone());
        Ok(())
    }

    fn restore(&mut self, checkpoint: CheckpointId) -> Result<()> {
        self.shapes = self.slots.restore(self.op_type(), checkpoint)?;
        Ok(())
    }

    fn reset(&mut self) {
        self.shapes = None;
        self.slots.clear();
    }
}

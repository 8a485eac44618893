use crate::{
    error::{Error, Result},
    tensor::Tensor,
};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A value flowing along a graph edge, forward or backward.
///
/// `Tensor` is a single plane, `TensorList` a multi-plane value whose planes
/// are added independently.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum GradientValue {
    Scalar(f32),
    Tensor(Tensor),
    TensorList(Vec<Tensor>),
}

impl GradientValue {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "scalar",
            Self::Tensor(_) => "tensor",
            Self::TensorList(_) => "tensor list",
        }
    }

    pub fn as_scalar(&self) -> Result<f32> {
        match self {
            Self::Scalar(x) => Ok(*x),
            other => Err(Error::GradientKindMismatch {
                expected: "scalar",
                got: other.kind(),
            }),
        }
    }

    pub fn as_tensor(&self) -> Result<&Tensor> {
        match self {
            Self::Tensor(t) => Ok(t),
            other => Err(Error::GradientKindMismatch {
                expected: "tensor",
                got: other.kind(),
            }),
        }
    }

    pub fn as_tensor_list(&self) -> Result<&[Tensor]> {
        match self {
            Self::TensorList(ts) => Ok(ts),
            other => Err(Error::GradientKindMismatch {
                expected: "tensor list",
                got: other.kind(),
            }),
        }
    }

    /// A value of the same kind and shape filled with zeros.
    pub fn zeros_like(&self) -> Self {
        match self {
            Self::Scalar(_) => Self::Scalar(0.0),
            Self::Tensor(t) => Self::Tensor(Tensor::zeros_like(t)),
            Self::TensorList(ts) => Self::TensorList(ts.iter().map(Tensor::zeros_like).collect()),
        }
    }

    /// A value of the same kind and shape filled with ones, used to seed a pass.
    pub fn ones_like(&self) -> Self {
        match self {
            Self::Scalar(_) => Self::Scalar(1.0),
            Self::Tensor(t) => Self::Tensor(Tensor::ones(t.shape())),
            Self::TensorList(ts) => Self::TensorList(ts.iter().map(|t| Tensor::ones(t.shape())).collect()),
        }
    }

    pub fn add(&self, other: &Self) -> Result<Self> {
        let mut out = self.clone();
        out.add_assign(other)?;
        Ok(out)
    }

    pub fn add_assign(&mut self, other: &Self) -> Result<()> {
        match (self, other) {
            (Self::Scalar(a), Self::Scalar(b)) => {
                *a += *b;
                Ok(())
            },
            (Self::Tensor(a), Self::Tensor(b)) => a.add_assign(b),
            (Self::TensorList(a), Self::TensorList(b)) => {
                if a.len() != b.len() {
                    return Err(Error::ShapeMismatch {
                        expected: vec![a.len()],
                        got: vec![b.len()],
                        msg: "tensor list planes".into(),
                    });
                }
                for (x, y) in a.iter_mut().zip(b.iter()) {
                    x.add_assign(y)?;
                }
                Ok(())
            },
            (lhs, rhs) => Err(Error::GradientKindMismatch {
                expected: lhs.kind(),
                got: rhs.kind(),
            }),
        }
    }

    pub fn scale(&self, factor: f32) -> Self {
        match self {
            Self::Scalar(x) => Self::Scalar(x * factor),
            Self::Tensor(t) => Self::Tensor(t.scale(factor)),
            Self::TensorList(ts) => Self::TensorList(ts.iter().map(|t| t.scale(factor)).collect()),
        }
    }

    pub fn approx_eq(&self, other: &Self, tolerance: f32) -> bool {
        match (self, other) {
            (Self::Scalar(a), Self::Scalar(b)) => (a - b).abs() <= tolerance,
            (Self::Tensor(a), Self::Tensor(b)) => a.approx_eq(b, tolerance),
            (Self::TensorList(a), Self::TensorList(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.approx_eq(y, tolerance))
            },
            _ => false,
        }
    }
}

impl From<f32> for GradientValue {
    fn from(x: f32) -> Self {
        Self::Scalar(x)
    }
}

impl From<Tensor> for GradientValue {
    fn from(t: Tensor) -> Self {
        Self::Tensor(t)
    }
}

impl From<Vec<Tensor>> for GradientValue {
    fn from(ts: Vec<Tensor>) -> Self {
        Self::TensorList(ts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_matches_kinds() -> Result<()> {
        let a = GradientValue::Scalar(1.5);
        assert_eq!(a.add(&GradientValue::Scalar(2.0))?, GradientValue::Scalar(3.5));

        let t = GradientValue::Tensor(Tensor::from_vec(vec![1.0, 2.0]));
        let err = t.add(&a).unwrap_err();
        assert_eq!(
            err,
            Error::GradientKindMismatch {
                expected: "tensor",
                got: "scalar"
            }
        );
        Ok(())
    }

    #[test]
    fn tensor_lists_add_per_plane() -> Result<()> {
        let a = GradientValue::TensorList(vec![Tensor::from(1.0), Tensor::from_vec(vec![1.0, 1.0])]);
        let b = GradientValue::TensorList(vec![Tensor::from(2.0), Tensor::from_vec(vec![3.0, 4.0])]);
        let sum = a.add(&b)?;
        let planes = sum.as_tensor_list()?;
        assert_eq!(planes[0].data(), &[3.0]);
        assert_eq!(planes[1].data(), &[4.0, 5.0]);

        let short = GradientValue::TensorList(vec![Tensor::from(2.0)]);
        assert!(a.add(&short).is_err());
        Ok(())
    }
}

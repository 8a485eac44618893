use crate::error::{Error, Result};
use rand_distr::{Distribution, StandardNormal};
use rayon::prelude::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Element count above which elementwise kernels fan out over the rayon pool.
pub const PARALLEL_THRESHOLD: usize = 1 << 14;

/// Dense, row-major `f32` buffer with a shape.
///
/// This is the plane a gradient lives in. Operations own their math; the
/// engine only ever adds tensors of the same shape together.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    pub fn new(data: Vec<f32>, shape: &[usize]) -> Result<Self> {
        let size: usize = shape.iter().product();
        if size != data.len() {
            return Err(Error::ShapeMismatch {
                expected: shape.to_vec(),
                got: vec![data.len()],
                msg: "tensor creation".into(),
            });
        }

        Ok(Self {
            shape: shape.to_vec(),
            data,
        })
    }

    pub fn from_vec(data: Vec<f32>) -> Self {
        let len = data.len();
        Self { shape: vec![len], data }
    }

    pub fn full(shape: &[usize], value: f32) -> Self {
        let size = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            data: vec![value; size],
        }
    }

    pub fn zeros(shape: &[usize]) -> Self {
        Self::full(shape, 0.0)
    }

    pub fn ones(shape: &[usize]) -> Self {
        Self::full(shape, 1.0)
    }

    pub fn zeros_like(other: &Self) -> Self {
        Self::zeros(&other.shape)
    }

    pub fn randn(shape: &[usize]) -> Self {
        let size: usize = shape.iter().product();
        let mut rng = rand::thread_rng();
        let data: Vec<f32> = (0..size).map(|_| StandardNormal.sample(&mut rng)).collect();
        Self {
            shape: shape.to_vec(),
            data,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    fn check_same_shape(&self, other: &Self, msg: &str) -> Result<()> {
        if self.shape != other.shape {
            return Err(Error::ShapeMismatch {
                expected: self.shape.clone(),
                got: other.shape.clone(),
                msg: msg.into(),
            });
        }
        Ok(())
    }

    pub fn add(&self, other: &Self) -> Result<Self> {
        let mut out = self.clone();
        out.add_assign(other)?;
        Ok(out)
    }

    pub fn add_assign(&mut self, other: &Self) -> Result<()> {
        self.check_same_shape(other, "add")?;
        if self.data.len() >= PARALLEL_THRESHOLD {
            self.data
                .par_iter_mut()
                .zip(other.data.par_iter())
                .for_each(|(a, b)| *a += *b);
        } else {
            self.data.iter_mut().zip(other.data.iter()).for_each(|(a, b)| *a += *b);
        }
        Ok(())
    }

    pub fn mul(&self, other: &Self) -> Result<Self> {
        self.check_same_shape(other, "mul")?;
        let data = self.data.iter().zip(other.data.iter()).map(|(a, b)| a * b).collect();
        Ok(Self {
            shape: self.shape.clone(),
            data,
        })
    }

    pub fn scale(&self, factor: f32) -> Self {
        self.map(|x| x * factor)
    }

    pub fn map<F>(&self, f: F) -> Self
    where
        F: Fn(f32) -> f32 + Sync + Send,
    {
        let data = if self.data.len() >= PARALLEL_THRESHOLD {
            self.data.par_iter().map(|&x| f(x)).collect()
        } else {
            self.data.iter().map(|&x| f(x)).collect()
        };
        Self {
            shape: self.shape.clone(),
            data,
        }
    }

    pub fn sum(&self) -> f32 {
        self.data.iter().sum()
    }

    pub fn transpose(&self) -> Result<Self> {
        let (rows, cols) = self.matrix_dims("transpose")?;
        let mut data = vec![0.0; self.data.len()];
        for r in 0..rows {
            for c in 0..cols {
                data[c * rows + r] = self.data[r * cols + c];
            }
        }
        Ok(Self {
            shape: vec![cols, rows],
            data,
        })
    }

    pub fn matmul(&self, rhs: &Self) -> Result<Self> {
        let (m, k) = self.matrix_dims("matmul lhs")?;
        let (k2, n) = rhs.matrix_dims("matmul rhs")?;
        if k != k2 {
            return Err(Error::ShapeMismatch {
                expected: vec![k, n],
                got: rhs.shape.clone(),
                msg: "matmul inner dimension".into(),
            });
        }

        let mut data = vec![0.0; m * n];
        data.par_chunks_mut(n.max(1)).enumerate().for_each(|(i, row)| {
            for (j, out) in row.iter_mut().enumerate() {
                let mut acc = 0.0;
                for p in 0..k {
                    acc += self.data[i * k + p] * rhs.data[p * n + j];
                }
                *out = acc;
            }
        });

        Ok(Self { shape: vec![m, n], data })
    }

    fn matrix_dims(&self, msg: &str) -> Result<(usize, usize)> {
        match self.shape.as_slice() {
            [rows, cols] => Ok((*rows, *cols)),
            other => Err(Error::ShapeMismatch {
                expected: vec![0, 0],
                got: other.to_vec(),
                msg: format!("{} expects a 2-D tensor", msg),
            }),
        }
    }

    /// Elementwise comparison with an absolute tolerance.
    pub fn approx_eq(&self, other: &Self, tolerance: f32) -> bool {
        self.shape == other.shape
            && self
                .data
                .iter()
                .zip(other.data.iter())
                .all(|(a, b)| (a - b).abs() <= tolerance)
    }
}

impl From<f32> for Tensor {
    fn from(value: f32) -> Self {
        Self::from_vec(vec![value])
    }
}

impl From<Vec<f32>> for Tensor {
    fn from(data: Vec<f32>) -> Self {
        Self::from_vec(data)
    }
}

impl TryFrom<Vec<Vec<f32>>> for Tensor {
    type Error = Error;

    fn try_from(rows: Vec<Vec<f32>>) -> Result<Self> {
        let cols = rows.first().map(|r| r.len()).unwrap_or(0);
        if let Some(ragged) = rows.iter().find(|r| r.len() != cols) {
            return Err(Error::ShapeMismatch {
                expected: vec![cols],
                got: vec![ragged.len()],
                msg: "ragged rows".into(),
            });
        }
        let shape = [rows.len(), cols];
        Self::new(rows.into_iter().flatten().collect(), &shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_wrong_length() {
        assert!(Tensor::new(vec![1.0, 2.0, 3.0], &[2, 2]).is_err());
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let err = Tensor::try_from(vec![vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn add_checks_shape() -> Result<()> {
        let a = Tensor::new(vec![1.0, 2.0], &[2])?;
        let b = Tensor::new(vec![3.0, 4.0], &[2])?;
        assert_eq!(a.add(&b)?.data(), &[4.0, 6.0]);
        assert!(a.add(&Tensor::zeros(&[3])).is_err());
        Ok(())
    }

    #[test]
    fn matmul_and_transpose() -> Result<()> {
        let a = Tensor::try_from(vec![vec![1.0, 2.0], vec![3.0, 4.0]])?;
        let b = Tensor::try_from(vec![vec![5.0], vec![6.0]])?;
        let c = a.matmul(&b)?;
        assert_eq!(c.shape(), &[2, 1]);
        assert_eq!(c.data(), &[17.0, 39.0]);
        assert_eq!(a.transpose()?.data(), &[1.0, 3.0, 2.0, 4.0]);
        Ok(())
    }

    #[test]
    fn large_add_uses_same_result() -> Result<()> {
        let a = Tensor::ones(&[PARALLEL_THRESHOLD + 3]);
        let b = Tensor::full(&[PARALLEL_THRESHOLD + 3], 2.0);
        let c = a.add(&b)?;
        assert!(c.data().iter().all(|&x| x == 3.0));
        Ok(())
    }
}

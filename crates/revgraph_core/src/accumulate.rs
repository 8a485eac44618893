//! Gradient accumulation.
//!
//! Partial results are folded left to right, so the caller decides the
//! summation order. Feeding the same parts in the same order always produces
//! bit-identical sums.

use crate::{
    error::{Error, Result},
    result::BackwardResult,
    value::GradientValue,
};

/// Sums partial backward results entry by entry.
pub fn accumulate<'a, I>(parts: I) -> Result<BackwardResult>
where
    I: IntoIterator<Item = &'a BackwardResult>,
{
    let mut iter = parts.into_iter();
    let mut total = iter
        .next()
        .cloned()
        .ok_or_else(|| Error::InvalidState("nothing to accumulate".into()))?;
    for part in iter {
        total.add_assign(part)?;
    }
    Ok(total)
}

/// Sums gradient values of one kind and shape.
pub fn accumulate_values<'a, I>(values: I) -> Result<GradientValue>
where
    I: IntoIterator<Item = &'a GradientValue>,
{
    let mut iter = values.into_iter();
    let mut total = iter
        .next()
        .cloned()
        .ok_or_else(|| Error::InvalidState("nothing to accumulate".into()))?;
    for value in iter {
        total.add_assign(value)?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Tensor;

    #[test]
    fn sums_each_entry() -> Result<()> {
        let a = BackwardResult::multiple(vec![GradientValue::Scalar(1.0), Tensor::from_vec(vec![1.0, 2.0]).into()]);
        let b = BackwardResult::multiple(vec![GradientValue::Scalar(2.0), Tensor::from_vec(vec![3.0, 4.0]).into()]);
        let total = accumulate([&a, &b])?;
        assert!(total.has_multiple_inputs());
        assert_eq!(total.entries()[0], GradientValue::Scalar(3.0));
        assert_eq!(total.entries()[1].as_tensor()?.data(), &[4.0, 6.0]);
        Ok(())
    }

    #[test]
    fn rejects_layout_mismatch() {
        let a = BackwardResult::single(1.0);
        let b = BackwardResult::multiple(vec![GradientValue::Scalar(1.0)]);
        assert!(accumulate([&a, &b]).is_err());
        assert!(accumulate(std::iter::empty::<&BackwardResult>()).is_err());
    }

    #[test]
    fn values_fold_in_order() -> Result<()> {
        let parts = vec![GradientValue::Scalar(0.1), GradientValue::Scalar(0.2), GradientValue::Scalar(0.3)];
        let total = accumulate_values(&parts)?;
        assert_eq!(total, GradientValue::Scalar(0.1 + 0.2 + 0.3));
        Ok(())
    }
}

use revgraph_core::error::{Error, Result};

pub(crate) fn expect_operands<T>(op: &str, operands: &[T], expected: usize) -> Result<()> {
    if operands.len() != expected {
        return Err(Error::OperandCount {
            op: op.to_string(),
            expected,
            got: operands.len(),
        });
    }
    Ok(())
}

pub(crate) fn missing_state(op: &str) -> Error {
    Error::MissingForwardState(op.to_string())
}

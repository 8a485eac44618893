pub mod accumulate;
pub mod checkpoint;
pub mod error;
pub mod mode;
pub mod result;
pub mod tensor;
pub mod value;

//! Dense float tensors exchanged with the model service.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Row-major `f32` tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

/// Pre-computed conditioning-space encoding of one avatar frame.
pub type Latent = Tensor;

/// Audio conditioning chunk driving the generation of one output frame.
pub type AudioFeature = Tensor;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TensorError {
    #[error("Tensor shape {shape:?} expects {expected} values, found {found}")]
    ShapeMismatch {
        shape: Vec<usize>,
        expected: usize,
        found: usize,
    },
}

impl Tensor {
    /// Create a tensor, checking that `values` fills `shape`.
    pub fn new(shape: Vec<usize>, values: Vec<f32>) -> Result<Self, TensorError> {
        let tensor = Self { shape, values };
        tensor.validate()?;
        Ok(tensor)
    }

    /// Number of elements implied by the shape.
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Check that the value buffer matches the shape.
    pub fn validate(&self) -> Result<(), TensorError> {
        let expected = self.numel();
        if expected != self.values.len() {
            return Err(TensorError::ShapeMismatch {
                shape: self.shape.clone(),
                expected,
                found: self.values.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_validates_shape() {
        assert!(Tensor::new(vec![2, 3], vec![0.0; 6]).is_ok());
        let err = Tensor::new(vec![2, 3], vec![0.0; 5]).unwrap_err();
        assert_eq!(
            err,
            TensorError::ShapeMismatch {
                shape: vec![2, 3],
                expected: 6,
                found: 5
            }
        );
    }

    #[test]
    fn test_scalar_shape() {
        let t = Tensor::new(vec![], vec![1.5]).unwrap();
        assert_eq!(t.numel(), 1);
    }
}

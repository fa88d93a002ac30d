use thiserror::Error;

#[derive(Error, Debug)]
pub enum GeometryError {
    #[error("shape mismatch for {what}: expected {expected}, got {actual:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: String,
        actual: Vec<usize>,
    },

    #[error("unknown residue type index {index} (valid range is 0..{valid})")]
    UnknownResidueType { index: i64, valid: usize },

    #[error("residue types must be integer indices, got {0:?}")]
    NonIntegerResidueType(candle_core::DType),

    #[error(transparent)]
    Candle(#[from] candle_core::Error),
}

pub type Result<T> = std::result::Result<T, GeometryError>;

/// Fail with a `ShapeMismatch` unless `actual` equals `expected`.
pub(crate) fn check_dims(what: &'static str, actual: &[usize], expected: &[usize]) -> Result<()> {
    if actual != expected {
        return Err(GeometryError::ShapeMismatch {
            what,
            expected: format!("{:?}", expected),
            actual: actual.to_vec(),
        });
    }
    Ok(())
}

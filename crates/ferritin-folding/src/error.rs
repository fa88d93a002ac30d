use ferritin_geometry::GeometryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FoldingError {
    #[error("shape mismatch for {tensor}: expected {expected}, got {actual:?}")]
    ShapeMismatch {
        tensor: &'static str,
        expected: String,
        actual: Vec<usize>,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Candle(#[from] candle_core::Error),
}

pub type Result<T> = std::result::Result<T, FoldingError>;

pub(crate) fn check_dims(tensor: &'static str, actual: &[usize], expected: &[usize]) -> Result<()> {
    if actual != expected {
        return Err(FoldingError::ShapeMismatch {
            tensor,
            expected: format!("{:?}", expected),
            actual: actual.to_vec(),
        });
    }
    Ok(())
}

//! Loading parameters stored in the AlphaFold layout.
//!
//! Linear layers are stored as `weights [in, out]` and `bias [out]`; candle's
//! [`Linear`] wants `[out, in]`, so weights are transposed on load. Layers that are
//! shared across iterations may be stored stacked along a leading axis.
use crate::error::{FoldingError, Result};
use candle_core::{Tensor, D};
use candle_nn::{Linear, VarBuilder};

/// Where a parameter lives inside its tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamSlot {
    /// The stored tensor is the parameter.
    #[default]
    Sole,
    /// The stored tensor is `[depth, ...]`; use entry `index`.
    Stacked { index: usize, depth: usize },
}

impl ParamSlot {
    pub fn get(&self, vb: &VarBuilder, shape: &[usize], name: &str) -> Result<Tensor> {
        match *self {
            ParamSlot::Sole => Ok(vb.get(shape.to_vec(), name)?),
            ParamSlot::Stacked { index, depth } => {
                if index >= depth {
                    return Err(FoldingError::Config(format!(
                        "stacked parameter index {} out of range for depth {}",
                        index, depth
                    )));
                }
                let mut stacked = Vec::with_capacity(shape.len() + 1);
                stacked.push(depth);
                stacked.extend_from_slice(shape);
                Ok(vb.get(stacked, name)?.get(index)?)
            }
        }
    }
}

pub fn linear(in_dim: usize, out_dim: usize, vb: VarBuilder, slot: ParamSlot) -> Result<Linear> {
    let weight = slot
        .get(&vb, &[in_dim, out_dim], "weights")?
        .t()?
        .contiguous()?;
    let bias = slot.get(&vb, &[out_dim], "bias")?;
    Ok(Linear::new(weight, Some(bias)))
}

/// Apply a linear layer to `[..., in]`, flattening the leading axes.
pub(crate) fn apply_linear(layer: &Linear, x: &Tensor) -> Result<Tensor> {
    use candle_core::Module;
    let dims = x.dims();
    let in_dim = x.dim(D::Minus1)?;
    let rows = x.elem_count() / in_dim.max(1);
    let out = layer.forward(&x.reshape((rows, in_dim))?)?;
    let mut shape = dims[..dims.len() - 1].to_vec();
    shape.push(out.dim(1)?);
    Ok(out.reshape(shape)?)
}

//! Rigid transformations on batched tensors.
//!
//! A [`Rigid`] is a rotation matrix `[..., 3, 3]` together with a translation
//! `[..., 3]`. The leading dimensions are the "frame" axes (usually residues,
//! or residues x rigid-groups). Points handed to [`Rigid::apply`] carry the same
//! leading dimensions followed by any number of extra point axes and a final
//! coordinate axis of size 3.
use crate::error::{check_dims, GeometryError, Result};
use candle_core::{DType, Device, Tensor, D};

/// The capability the attention layers need from a frame: lift local points into the
/// global frame, and bring global points back.
///
/// Points are laid out `[num_residues, ..., 3]`.
pub trait RigidTransform {
    fn num_residues(&self) -> usize;
    fn apply_to_point(&self, points: &Tensor) -> Result<Tensor>;
    fn invert_point(&self, points: &Tensor) -> Result<Tensor>;
}

#[derive(Clone, Debug)]
pub struct Rigid {
    rot: Tensor,
    trans: Tensor,
}

impl Rigid {
    pub fn new(rot: Tensor, trans: Tensor) -> Result<Self> {
        let rot_dims = rot.dims();
        let trans_dims = trans.dims();
        if rot_dims.len() < 2 || rot_dims[rot_dims.len() - 2..] != [3, 3] {
            return Err(GeometryError::ShapeMismatch {
                what: "rotation",
                expected: "[..., 3, 3]".to_string(),
                actual: rot_dims.to_vec(),
            });
        }
        let lead = &rot_dims[..rot_dims.len() - 2];
        let mut expected = lead.to_vec();
        expected.push(3);
        check_dims("translation", trans_dims, &expected)?;
        Ok(Self { rot, trans })
    }

    pub fn identity(shape: &[usize], dtype: DType, device: &Device) -> Result<Self> {
        let mut rot_shape = shape.to_vec();
        rot_shape.extend_from_slice(&[3, 3]);
        let mut trans_shape = shape.to_vec();
        trans_shape.push(3);
        let rot = Tensor::eye(3, dtype, device)?
            .broadcast_as(rot_shape)?
            .contiguous()?;
        let trans = Tensor::zeros(trans_shape, dtype, device)?;
        Ok(Self { rot, trans })
    }

    /// Split a homogeneous `[..., 4, 4]` matrix into rotation and translation.
    pub fn from_tensor4x4(m: &Tensor) -> Result<Self> {
        let dims = m.dims();
        if dims.len() < 2 || dims[dims.len() - 2..] != [4, 4] {
            return Err(GeometryError::ShapeMismatch {
                what: "homogeneous transform",
                expected: "[..., 4, 4]".to_string(),
                actual: dims.to_vec(),
            });
        }
        let top = m.narrow(D::Minus2, 0, 3)?;
        let rot = top.narrow(D::Minus1, 0, 3)?.contiguous()?;
        let trans = top.narrow(D::Minus1, 3, 1)?.squeeze(D::Minus1)?.contiguous()?;
        Self::new(rot, trans)
    }

    pub fn rot(&self) -> &Tensor {
        &self.rot
    }

    pub fn trans(&self) -> &Tensor {
        &self.trans
    }

    /// The frame axes, i.e. every dimension except the trailing coordinate axis.
    pub fn lead_dims(&self) -> &[usize] {
        let dims = self.trans.dims();
        &dims[..dims.len() - 1]
    }

    pub fn dtype(&self) -> DType {
        self.trans.dtype()
    }

    pub fn device(&self) -> &Device {
        self.trans.device()
    }

    pub fn to_dtype(&self, dtype: DType) -> Result<Self> {
        Ok(Self {
            rot: self.rot.to_dtype(dtype)?,
            trans: self.trans.to_dtype(dtype)?,
        })
    }

    /// `self ∘ other`: first `other`, then `self`. Leading dimensions broadcast.
    pub fn compose(&self, other: &Rigid) -> Result<Self> {
        let rot = broadcast_bmm(&self.rot, &other.rot)?;
        let trans = broadcast_bmm(&self.rot, &other.trans.unsqueeze(D::Minus1)?)?
            .squeeze(D::Minus1)?
            .broadcast_add(&self.trans)?;
        Self::new(rot, trans)
    }

    /// Right-multiply the rotation by `rots` and keep the translation.
    pub fn mul_rots(&self, rots: &Tensor) -> Result<Self> {
        let rot = broadcast_bmm(&self.rot, rots)?;
        Self::new(rot, self.trans.clone())
    }

    pub fn invert(&self) -> Result<Self> {
        let rot = self.rot.t()?.contiguous()?;
        let trans = rot
            .matmul(&self.trans.unsqueeze(D::Minus1)?.contiguous()?)?
            .squeeze(D::Minus1)?
            .neg()?;
        Self::new(rot, trans)
    }

    pub fn apply(&self, points: &Tensor) -> Result<Tensor> {
        let (rot, trans, p) = self.flatten_points(points)?;
        if points.elem_count() == 0 {
            return Ok(points.clone());
        }
        let out = p.matmul(&rot.t()?)?.broadcast_add(&trans)?;
        Ok(out.reshape(points.dims())?)
    }

    pub fn invert_apply(&self, points: &Tensor) -> Result<Tensor> {
        let (rot, trans, p) = self.flatten_points(points)?;
        if points.elem_count() == 0 {
            return Ok(points.clone());
        }
        let out = p.broadcast_sub(&trans)?.matmul(&rot)?;
        Ok(out.reshape(points.dims())?)
    }

    /// Select one entry along a frame axis, dropping that axis.
    pub fn select(&self, dim: usize, index: usize) -> Result<Self> {
        Self::new(
            self.rot.narrow(dim, index, 1)?.squeeze(dim)?,
            self.trans.narrow(dim, index, 1)?.squeeze(dim)?,
        )
    }

    pub fn narrow(&self, dim: usize, start: usize, len: usize) -> Result<Self> {
        Self::new(
            self.rot.narrow(dim, start, len)?,
            self.trans.narrow(dim, start, len)?,
        )
    }

    pub fn unsqueeze(&self, dim: usize) -> Result<Self> {
        Self::new(self.rot.unsqueeze(dim)?, self.trans.unsqueeze(dim)?)
    }

    pub fn cat(rigids: &[&Rigid], dim: usize) -> Result<Self> {
        let rots: Vec<&Tensor> = rigids.iter().map(|r| &r.rot).collect();
        let trans: Vec<&Tensor> = rigids.iter().map(|r| &r.trans).collect();
        Self::new(Tensor::cat(&rots, dim)?, Tensor::cat(&trans, dim)?)
    }

    // [L, 3, 3], [L, 1, 3] and [L, M, 3] views where L is the product of the frame axes.
    fn flatten_points(&self, points: &Tensor) -> Result<(Tensor, Tensor, Tensor)> {
        let lead = self.lead_dims();
        let dims = points.dims();
        if dims.len() < lead.len() + 1 || dims[..lead.len()] != *lead || dims[dims.len() - 1] != 3
        {
            return Err(GeometryError::ShapeMismatch {
                what: "points",
                expected: format!("{:?} + [..., 3]", lead),
                actual: dims.to_vec(),
            });
        }
        let l: usize = lead.iter().product();
        let m: usize = dims[lead.len()..dims.len() - 1].iter().product();
        let rot = self.rot.reshape((l, 3, 3))?;
        let trans = self.trans.reshape((l, 1, 3))?;
        let p = points.reshape((l, m, 3))?;
        Ok((rot, trans, p))
    }
}

impl RigidTransform for Rigid {
    fn num_residues(&self) -> usize {
        self.lead_dims().first().copied().unwrap_or(1)
    }

    fn apply_to_point(&self, points: &Tensor) -> Result<Tensor> {
        self.apply(points)
    }

    fn invert_point(&self, points: &Tensor) -> Result<Tensor> {
        self.invert_apply(points)
    }
}

// Batched matmul over the last two axes; leading axes of equal rank broadcast.
fn broadcast_bmm(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let (ad, bd) = (a.dims(), b.dims());
    if ad.len() != bd.len() {
        return Err(GeometryError::ShapeMismatch {
            what: "frame axes",
            expected: format!("rank {}", ad.len()),
            actual: bd.to_vec(),
        });
    }
    let split = ad.len() - 2;
    let mut lead = Vec::with_capacity(split);
    for (&x, &y) in ad[..split].iter().zip(&bd[..split]) {
        match (x, y) {
            (x, y) if x == y => lead.push(x),
            (1, y) => lead.push(y),
            (x, 1) => lead.push(x),
            _ => {
                return Err(GeometryError::ShapeMismatch {
                    what: "frame axes",
                    expected: format!("{:?}", &ad[..split]),
                    actual: bd.to_vec(),
                })
            }
        }
    }
    let a_shape = [lead.as_slice(), &ad[split..]].concat();
    let b_shape = [lead.as_slice(), &bd[split..]].concat();
    let a = a.broadcast_as(a_shape)?.contiguous()?;
    let b = b.broadcast_as(b_shape)?.contiguous()?;
    Ok(a.matmul(&b)?)
}

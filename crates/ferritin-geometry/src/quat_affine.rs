//! Quaternion-parameterised affine frames.
//!
//! This is the representation the structure module iterates on: a unit quaternion
//! `[N, 4]` (`w, x, y, z`) and a translation `[N, 3]`. The rotation matrix is derived
//! from the quaternion once per frame and cached in a [`Rigid`].
use crate::error::{check_dims, GeometryError, Result};
use crate::rigid::{Rigid, RigidTransform};
use candle_core::{DType, Device, Tensor, D};

#[derive(Clone, Debug)]
pub struct QuatAffine {
    quaternion: Tensor,
    translation: Tensor,
    rigid: Rigid,
}

impl QuatAffine {
    pub fn new(quaternion: Tensor, translation: Tensor, normalize: bool) -> Result<Self> {
        let (n, four) = quaternion.dims2()?;
        check_dims("quaternion", &[n, four], &[n, 4])?;
        check_dims("translation", translation.dims(), &[n, 3])?;
        let quaternion = if normalize {
            let norm = quaternion.sqr()?.sum_keepdim(D::Minus1)?.sqrt()?;
            quaternion.broadcast_div(&norm)?
        } else {
            quaternion
        };
        let rigid = Rigid::new(quat_to_rot(&quaternion)?, translation.clone())?;
        Ok(Self {
            quaternion,
            translation,
            rigid,
        })
    }

    pub fn identity(num_residues: usize, dtype: DType, device: &Device) -> Result<Self> {
        let w = Tensor::ones((num_residues, 1), dtype, device)?;
        let xyz = Tensor::zeros((num_residues, 3), dtype, device)?;
        let quaternion = Tensor::cat(&[&w, &xyz], D::Minus1)?;
        Self::new(quaternion, xyz, false)
    }

    /// Build from the packed `[N, 7]` layout (quaternion followed by translation).
    pub fn from_tensor(tensor: &Tensor, normalize: bool) -> Result<Self> {
        let (n, width) = tensor.dims2()?;
        if width != 7 {
            return Err(GeometryError::ShapeMismatch {
                what: "packed affine",
                expected: format!("[{}, 7]", n),
                actual: vec![n, width],
            });
        }
        Self::new(
            tensor.narrow(D::Minus1, 0, 4)?,
            tensor.narrow(D::Minus1, 4, 3)?,
            normalize,
        )
    }

    pub fn to_tensor(&self) -> Result<Tensor> {
        Ok(Tensor::cat(&[&self.quaternion, &self.translation], D::Minus1)?)
    }

    pub fn quaternion(&self) -> &Tensor {
        &self.quaternion
    }

    pub fn translation(&self) -> &Tensor {
        &self.translation
    }

    pub fn rotation(&self) -> &Tensor {
        self.rigid.rot()
    }

    /// Matrix form of this frame (`rigids_from_quataffine`).
    pub fn to_rigid(&self) -> Rigid {
        self.rigid.clone()
    }

    pub fn scale_translation(&self, scale: f64) -> Result<Self> {
        Ok(Self {
            quaternion: self.quaternion.clone(),
            translation: self.translation.affine(scale, 0.0)?,
            rigid: Rigid::new(self.rigid.rot().clone(), self.rigid.trans().affine(scale, 0.0)?)?,
        })
    }

    /// Apply a backbone update `[N, 6]` in the local frame: the first three entries are
    /// the vector part of a (non-unit) quaternion update, the last three a translation
    /// expressed in the current frame. The result is renormalised.
    pub fn pre_compose(&self, update: &Tensor) -> Result<Self> {
        let n = self.translation.dim(0)?;
        check_dims("affine update", update.dims(), &[n, 6])?;
        let vector_quaternion_update = update.narrow(D::Minus1, 0, 3)?;
        let trans_update = update.narrow(D::Minus1, 3, 3)?;

        let new_quaternion = self
            .quaternion
            .add(&quat_multiply_by_vec(&self.quaternion, &vector_quaternion_update)?)?;
        let trans_update = self
            .rotation()
            .matmul(&trans_update.unsqueeze(D::Minus1)?.contiguous()?)?
            .squeeze(D::Minus1)?;
        let new_translation = self.translation.add(&trans_update)?;
        Self::new(new_quaternion, new_translation, true)
    }
}

impl RigidTransform for QuatAffine {
    fn num_residues(&self) -> usize {
        self.rigid.num_residues()
    }

    fn apply_to_point(&self, points: &Tensor) -> Result<Tensor> {
        self.rigid.apply(points)
    }

    fn invert_point(&self, points: &Tensor) -> Result<Tensor> {
        self.rigid.invert_apply(points)
    }
}

fn quat_components(q: &Tensor) -> Result<[Tensor; 4]> {
    Ok([
        q.narrow(D::Minus1, 0, 1)?,
        q.narrow(D::Minus1, 1, 1)?,
        q.narrow(D::Minus1, 2, 1)?,
        q.narrow(D::Minus1, 3, 1)?,
    ])
}

/// Rotation matrix `[..., 3, 3]` of a (unit) quaternion `[..., 4]`.
pub fn quat_to_rot(q: &Tensor) -> Result<Tensor> {
    let [w, x, y, z] = quat_components(q)?;
    let (ww, xx, yy, zz) = (w.sqr()?, x.sqr()?, y.sqr()?, z.sqr()?);
    let two = |t: Tensor| t.affine(2.0, 0.0);
    let xy = x.mul(&y)?;
    let xz = x.mul(&z)?;
    let yz = y.mul(&z)?;
    let wx = w.mul(&x)?;
    let wy = w.mul(&y)?;
    let wz = w.mul(&z)?;

    #[rustfmt::skip]
    let entries = [
        ww.add(&xx)?.sub(&yy)?.sub(&zz)?, two(xy.sub(&wz)?)?,              two(xz.add(&wy)?)?,
        two(xy.add(&wz)?)?,              ww.sub(&xx)?.add(&yy)?.sub(&zz)?, two(yz.sub(&wx)?)?,
        two(xz.sub(&wy)?)?,              two(yz.add(&wx)?)?,              ww.sub(&xx)?.sub(&yy)?.add(&zz)?,
    ];
    let flat = Tensor::cat(&entries, D::Minus1)?;
    let mut shape = q.dims()[..q.rank() - 1].to_vec();
    shape.extend_from_slice(&[3, 3]);
    Ok(flat.reshape(shape)?)
}

/// Hamilton product `q ⊗ (0, v)`.
pub fn quat_multiply_by_vec(q: &Tensor, v: &Tensor) -> Result<Tensor> {
    let [a, b, c, d] = quat_components(q)?;
    let x = v.narrow(D::Minus1, 0, 1)?;
    let y = v.narrow(D::Minus1, 1, 1)?;
    let z = v.narrow(D::Minus1, 2, 1)?;

    let w_out = b.mul(&x)?.add(&c.mul(&y)?)?.add(&d.mul(&z)?)?.neg()?;
    let x_out = a.mul(&x)?.add(&c.mul(&z)?)?.sub(&d.mul(&y)?)?;
    let y_out = a.mul(&y)?.sub(&b.mul(&z)?)?.add(&d.mul(&x)?)?;
    let z_out = a.mul(&z)?.add(&b.mul(&y)?)?.sub(&c.mul(&x)?)?;
    Ok(Tensor::cat(&[w_out, x_out, y_out, z_out], D::Minus1)?)
}

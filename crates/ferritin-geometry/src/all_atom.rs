//! From torsion angles to atom coordinates.
//!
//! The side chain is modelled as 8 rigid groups per residue. Each group's frame is
//! its literature default frame rotated about the x-axis by the predicted torsion,
//! chained onto its parent, and finally placed by the backbone frame. Atoms are
//! then put at their literature positions inside their group's frame.
use crate::error::{check_dims, GeometryError, Result};
use crate::residue_constants::{
    restype_atom14_group_one_hot, restype_atom14_mask, restype_atom14_rigid_group_positions,
    restype_rigid_group_default_frame, ResidueType, ATOM14_NUM, NUM_RIGID_GROUPS, NUM_TORSIONS,
};
use crate::rigid::Rigid;
use candle_core::{DType, Tensor, D};
use tracing::{instrument, trace};

/// Validate residue-type indices and return them as a `u32` index tensor `[N]`.
///
/// Indices outside `0..=20` are rejected, never clamped, and so are float tensors.
pub fn residue_indices(aatype: &Tensor) -> Result<Tensor> {
    if !matches!(aatype.dtype(), DType::U8 | DType::U32 | DType::I64) {
        return Err(GeometryError::NonIntegerResidueType(aatype.dtype()));
    }
    let n = aatype.dims1()?;
    let values = aatype.to_dtype(DType::I64)?.to_vec1::<i64>()?;
    let indices = values
        .into_iter()
        .map(|v| ResidueType::from_index(v).map(|r| r.index() as u32))
        .collect::<Result<Vec<u32>>>()?;
    Ok(Tensor::from_vec(indices, n, aatype.device())?)
}

/// Global frames of all 8 rigid groups, shape `[N, 8]`.
///
/// `torsion_angles_sin_cos` is `[N, 7, 2]` in the order omega, phi, psi, chi1..chi4;
/// the backbone group receives the identity rotation.
#[instrument(skip_all)]
pub fn torsion_angles_to_frames(
    aatype: &Tensor,
    backb_to_global: &Rigid,
    torsion_angles_sin_cos: &Tensor,
) -> Result<Rigid> {
    let idx = residue_indices(aatype)?;
    let n = idx.dim(0)?;
    check_dims(
        "torsion angles",
        torsion_angles_sin_cos.dims(),
        &[n, NUM_TORSIONS, 2],
    )?;
    check_dims("backbone frames", backb_to_global.lead_dims(), &[n])?;

    let device = torsion_angles_sin_cos.device();
    let dtype = torsion_angles_sin_cos.dtype();

    let m = restype_rigid_group_default_frame(device)?
        .to_dtype(dtype)?
        .index_select(&idx, 0)?;
    let default_frames = Rigid::from_tensor4x4(&m)?;

    let sin_angles = torsion_angles_sin_cos.narrow(D::Minus1, 0, 1)?.squeeze(D::Minus1)?;
    let cos_angles = torsion_angles_sin_cos.narrow(D::Minus1, 1, 1)?.squeeze(D::Minus1)?;
    let sin_angles = Tensor::cat(&[&Tensor::zeros((n, 1), dtype, device)?, &sin_angles], 1)?;
    let cos_angles = Tensor::cat(&[&Tensor::ones((n, 1), dtype, device)?, &cos_angles], 1)?;
    let zeros = sin_angles.zeros_like()?;
    let ones = sin_angles.ones_like()?;
    let neg_sin = sin_angles.neg()?;

    // rotation about the x-axis for every group
    #[rustfmt::skip]
    let all_rots = Tensor::stack(
        &[
            &ones,  &zeros,      &zeros,
            &zeros, &cos_angles, &neg_sin,
            &zeros, &sin_angles, &cos_angles,
        ],
        D::Minus1,
    )?
    .reshape((n, NUM_RIGID_GROUPS, 3, 3))?;

    let all_frames = default_frames.mul_rots(&all_rots)?;

    // chi2..chi4 are expressed relative to the previous chi frame
    let chi1_frame_to_backb = all_frames.select(1, 4)?;
    let chi2_frame_to_backb = chi1_frame_to_backb.compose(&all_frames.select(1, 5)?)?;
    let chi3_frame_to_backb = chi2_frame_to_backb.compose(&all_frames.select(1, 6)?)?;
    let chi4_frame_to_backb = chi3_frame_to_backb.compose(&all_frames.select(1, 7)?)?;

    let all_frames_to_backb = Rigid::cat(
        &[
            &all_frames.narrow(1, 0, 5)?,
            &chi2_frame_to_backb.unsqueeze(1)?,
            &chi3_frame_to_backb.unsqueeze(1)?,
            &chi4_frame_to_backb.unsqueeze(1)?,
        ],
        1,
    )?;
    trace!(num_residues = n, "composed rigid-group frames");

    backb_to_global
        .to_dtype(dtype)?
        .unsqueeze(1)?
        .compose(&all_frames_to_backb)
}

/// Atom14 coordinates `[N, 14, 3]` from the rigid-group frames `[N, 8]`.
///
/// Slots without an atom for the residue type are zero.
#[instrument(skip_all)]
pub fn frames_and_literature_positions_to_atom14_pos(
    aatype: &Tensor,
    all_frames_to_global: &Rigid,
) -> Result<Tensor> {
    let idx = residue_indices(aatype)?;
    let n = idx.dim(0)?;
    check_dims(
        "rigid-group frames",
        all_frames_to_global.lead_dims(),
        &[n, NUM_RIGID_GROUPS],
    )?;
    let device = all_frames_to_global.device();
    let dtype = all_frames_to_global.dtype();

    // [N, 14, 8, 1]: which group moves each atom
    let group_mask = restype_atom14_group_one_hot(device)?
        .to_dtype(dtype)?
        .index_select(&idx, 0)?
        .unsqueeze(D::Minus1)?;

    let rot = all_frames_to_global
        .rot()
        .reshape((n, 1, NUM_RIGID_GROUPS, 9))?
        .broadcast_mul(&group_mask)?
        .sum(2)?
        .reshape((n, ATOM14_NUM, 3, 3))?;
    let trans = all_frames_to_global
        .trans()
        .unsqueeze(1)?
        .broadcast_mul(&group_mask)?
        .sum(2)?;
    let map_atoms_to_global = Rigid::new(rot, trans)?;

    let lit_positions = restype_atom14_rigid_group_positions(device)?
        .to_dtype(dtype)?
        .index_select(&idx, 0)?;
    let pred_positions = map_atoms_to_global.apply(&lit_positions)?;

    let mask = atom14_mask(aatype)?.to_dtype(dtype)?;
    Ok(pred_positions.broadcast_mul(&mask.unsqueeze(D::Minus1)?)?)
}

/// Atom existence mask `[N, 14]` for the given residue types.
pub fn atom14_mask(aatype: &Tensor) -> Result<Tensor> {
    let idx = residue_indices(aatype)?;
    Ok(restype_atom14_mask(aatype.device())?.index_select(&idx, 0)?)
}

//! # ferritin-geometry
//!
//! Rigid-body geometry for protein structure prediction.
//!
//! - [`Rigid`]: rotation matrix plus translation on arbitrarily batched tensors.
//! - [`QuatAffine`]: quaternion frames, updated in place by `pre_compose` during
//!   structure refinement.
//! - [`RigidTransform`]: the point-mapping capability shared by both.
//! - [`residue_constants`]: idealised side-chain geometry in the atom14 layout.
//! - [`all_atom`]: torsion angles to rigid-group frames to atom coordinates.
//!
pub mod all_atom;
pub mod error;
pub mod quat_affine;
pub mod residue_constants;
pub mod rigid;

pub use all_atom::{
    atom14_mask, frames_and_literature_positions_to_atom14_pos, residue_indices,
    torsion_angles_to_frames,
};
pub use error::{GeometryError, Result};
pub use quat_affine::{quat_multiply_by_vec, quat_to_rot, QuatAffine};
pub use residue_constants::ResidueType;
pub use rigid::{Rigid, RigidTransform};

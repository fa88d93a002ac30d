//! Side-chain torsion prediction.
//!
//! A small residual MLP turns one or more per-residue embeddings into seven
//! (sin, cos) torsion pairs: omega, phi, psi and chi1..chi4. The torsions are then
//! handed to the geometry crate to build rigid-group frames and atom14 coordinates.
use crate::config::SidechainConfig;
use crate::error::{check_dims, FoldingError, Result};
use crate::params::{apply_linear, linear, ParamSlot};
use candle_core::{Tensor, D};
use candle_nn::{Linear, VarBuilder};
use ferritin_geometry::residue_constants::NUM_TORSIONS;
use ferritin_geometry::{
    frames_and_literature_positions_to_atom14_pos, torsion_angles_to_frames, Rigid,
};
use tracing::{debug, instrument};

/// Added to the squared norm before normalising each (sin, cos) pair.
pub const ANGLE_NORM_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone)]
pub struct SidechainOutput {
    /// `[N, 7, 2]`, every pair of unit length.
    pub angles_sin_cos: Tensor,
    /// `[N, 7, 2]` as predicted.
    pub unnormalized_angles_sin_cos: Tensor,
    /// `[N, 14, 3]`, zero where the residue type has no atom.
    pub atom_pos: Tensor,
    /// `[N, 8]` rigid-group frames in the global frame.
    pub frames: Rigid,
}

#[derive(Debug)]
struct ResidualBlock {
    resblock1: Linear,
    resblock2: Linear,
}

impl ResidualBlock {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let act = apply_linear(&self.resblock1, &x.relu()?)?;
        let act = apply_linear(&self.resblock2, &act.relu()?)?;
        Ok(act.add(x)?)
    }
}

#[derive(Debug)]
pub struct MultiRigidSidechain {
    input_projections: Vec<Linear>,
    blocks: Vec<ResidualBlock>,
    unnormalized_angles: Linear,
    config: SidechainConfig,
}

/// Name of the `index`-th layer called `base` within one scope.
fn scoped_name(base: &str, index: usize) -> String {
    if index == 0 {
        base.to_string()
    } else {
        format!("{}_{}", base, index)
    }
}

impl MultiRigidSidechain {
    /// Load from a scope holding `input_projection[_k]`, `resblock1[_k]`,
    /// `resblock2[_k]` and `unnormalized_angles`. `input_dims` gives the channel
    /// count of each representation passed to [`forward`](Self::forward).
    ///
    /// Every representation and every residual block has its own weights, named the
    /// way AlphaFold checkpoints name them, rather than one shared projection and one
    /// shared block reused across calls.
    pub fn load(
        vb: VarBuilder,
        config: &SidechainConfig,
        input_dims: &[usize],
        slot: ParamSlot,
    ) -> Result<Self> {
        if input_dims.is_empty() {
            return Err(FoldingError::Config(
                "side chain needs at least one input representation".into(),
            ));
        }
        let c = config.num_channel;
        let input_projections = input_dims
            .iter()
            .enumerate()
            .map(|(k, &dim)| linear(dim, c, vb.pp(scoped_name("input_projection", k)), slot))
            .collect::<Result<Vec<_>>>()?;
        let blocks = (0..config.num_residual_block)
            .map(|k| {
                Ok(ResidualBlock {
                    resblock1: linear(c, c, vb.pp(scoped_name("resblock1", k)), slot)?,
                    resblock2: linear(c, c, vb.pp(scoped_name("resblock2", k)), slot)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let unnormalized_angles =
            linear(c, NUM_TORSIONS * 2, vb.pp("unnormalized_angles"), slot)?;

        debug!(
            num_inputs = input_dims.len(),
            num_residual_block = config.num_residual_block,
            "loaded multi-rigid side chain"
        );
        Ok(Self {
            input_projections,
            blocks,
            unnormalized_angles,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &SidechainConfig {
        &self.config
    }

    /// Predict torsions and atom positions.
    ///
    /// `backb_to_global` holds one backbone frame per residue, `representations`
    /// are `[N, c_k]` embeddings in the order given at load time and `aatype` is
    /// `[N]` residue-type indices.
    #[instrument(skip_all)]
    pub fn forward(
        &self,
        backb_to_global: &Rigid,
        representations: &[Tensor],
        aatype: &Tensor,
    ) -> Result<SidechainOutput> {
        if representations.len() != self.input_projections.len() {
            return Err(FoldingError::Config(format!(
                "expected {} representations, got {}",
                self.input_projections.len(),
                representations.len()
            )));
        }
        let n = aatype.dim(0)?;
        check_dims("backbone frames", backb_to_global.lead_dims(), &[n])?;

        let mut act: Option<Tensor> = None;
        for (rep, projection) in representations.iter().zip(&self.input_projections) {
            if rep.dims().first() != Some(&n) {
                return Err(FoldingError::ShapeMismatch {
                    tensor: "representation",
                    expected: format!("[{}, c]", n),
                    actual: rep.dims().to_vec(),
                });
            }
            let projected = apply_linear(projection, &rep.relu()?)?;
            act = Some(match act {
                Some(sum) => sum.add(&projected)?,
                None => projected,
            });
        }
        let mut act = act.ok_or_else(|| FoldingError::Config("no representations".into()))?;

        for block in &self.blocks {
            act = block.forward(&act)?;
        }

        let unnormalized_angles_sin_cos =
            apply_linear(&self.unnormalized_angles, &act.relu()?)?.reshape((n, NUM_TORSIONS, 2))?;
        let angles_sin_cos = l2_normalize(&unnormalized_angles_sin_cos, ANGLE_NORM_EPSILON)?;

        let frames = torsion_angles_to_frames(aatype, backb_to_global, &angles_sin_cos)?;
        let atom_pos = frames_and_literature_positions_to_atom14_pos(aatype, &frames)?;

        Ok(SidechainOutput {
            angles_sin_cos,
            unnormalized_angles_sin_cos,
            atom_pos,
            frames,
        })
    }
}

/// `x / sqrt(sum(x^2) + eps)` over the last axis.
pub fn l2_normalize(x: &Tensor, eps: f64) -> Result<Tensor> {
    let norm = x.sqr()?.sum_keepdim(D::Minus1)?.affine(1.0, eps)?.sqrt()?;
    Ok(x.broadcast_div(&norm)?)
}

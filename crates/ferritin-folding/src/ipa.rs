//! Invariant Point Attention.
//!
//! Attention over residues whose logits combine three terms: a scalar query/key
//! product, a distance between query and key points expressed in the global frame,
//! and a bias read from the pair representation. Points are predicted in each
//! residue's local frame, so the result does not change when every frame is moved
//! by the same rigid transformation.
//!
//! Shapes used below: `N` residues, `H` heads, `Sqk`/`Sv` scalar query-key / value
//! channels, `Pqk`/`Pv` query-key / value points, `C2` pair channels.
use crate::config::IpaConfig;
use crate::error::{check_dims, FoldingError, Result};
use crate::params::{apply_linear, linear, ParamSlot};
use candle_core::{Tensor, D};
use candle_nn::{ops::softmax_last_dim, Linear, VarBuilder};
use ferritin_geometry::RigidTransform;
use std::ops::Range;
use tracing::{debug, instrument};

/// Subtracted from the logits of every masked residue pair.
const MASK_PENALTY: f64 = 1e5;
/// Scalar, point and pair terms each contribute a third of the logit variance.
const NUM_LOGIT_TERMS: f64 = 3.0;

/// Column ranges of the concatenated features fed to `output_projection`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    pub scalar: Range<usize>,
    pub point_x: Range<usize>,
    pub point_y: Range<usize>,
    pub point_z: Range<usize>,
    pub point_norm: Range<usize>,
    pub pair: Range<usize>,
}

impl OutputLayout {
    pub fn new(config: &IpaConfig, num_feat_2d: usize) -> Self {
        let h = config.num_head;
        let mut start = 0;
        let mut next = |width: usize| {
            let range = start..start + width;
            start += width;
            range
        };
        Self {
            scalar: next(h * config.num_scalar_v),
            point_x: next(h * config.num_point_v),
            point_y: next(h * config.num_point_v),
            point_z: next(h * config.num_point_v),
            point_norm: next(h * config.num_point_v),
            pair: next(h * num_feat_2d),
        }
    }

    pub fn width(&self) -> usize {
        self.pair.end
    }
}

#[derive(Debug)]
pub struct InvariantPointAttention {
    q_scalar: Linear,
    kv_scalar: Linear,
    q_point_local: Linear,
    kv_point_local: Linear,
    attention_2d: Linear,
    output_projection: Linear,
    trainable_point_weights: Tensor,
    layout: OutputLayout,
    num_feat_1d: usize,
    num_feat_2d: usize,
    config: IpaConfig,
}

/// Intermediate results shared by [`InvariantPointAttention::forward`] and
/// [`InvariantPointAttention::attention_weights`].
struct Attention {
    /// `[H, N, N]`
    weights: Tensor,
    /// `[H, N, Sv]`
    v_scalar: Tensor,
    /// `[H, N, Pv * 3]` in the global frame
    v_point: Tensor,
}

impl InvariantPointAttention {
    /// Load from a scope holding `q_scalar`, `kv_scalar`, `q_point_local`,
    /// `kv_point_local`, `attention_2d`, `output_projection` and
    /// `trainable_point_weights`.
    pub fn load(
        vb: VarBuilder,
        config: &IpaConfig,
        num_feat_1d: usize,
        num_feat_2d: usize,
        slot: ParamSlot,
    ) -> Result<Self> {
        config.validate()?;
        let h = config.num_head;
        let (sqk, sv) = (config.num_scalar_qk, config.num_scalar_v);
        let (pqk, pv) = (config.num_point_qk, config.num_point_v);

        let q_scalar = linear(num_feat_1d, h * sqk, vb.pp("q_scalar"), slot)?;
        let kv_scalar = linear(num_feat_1d, h * (sqk + sv), vb.pp("kv_scalar"), slot)?;
        let q_point_local = linear(num_feat_1d, h * 3 * pqk, vb.pp("q_point_local"), slot)?;
        let kv_point_local = linear(
            num_feat_1d,
            h * 3 * (pqk + pv),
            vb.pp("kv_point_local"),
            slot,
        )?;
        let attention_2d = linear(num_feat_2d, h, vb.pp("attention_2d"), slot)?;

        let layout = OutputLayout::new(config, num_feat_2d);
        let num_final_input = h * (num_feat_2d + sv + 4 * pv);
        if layout.width() != num_final_input {
            return Err(FoldingError::Config(format!(
                "output layout covers {} columns, projection expects {}",
                layout.width(),
                num_final_input
            )));
        }
        let output_projection = linear(
            num_final_input,
            config.num_channel,
            vb.pp("output_projection"),
            slot,
        )?;
        let trainable_point_weights = slot.get(&vb, &[h], "trainable_point_weights")?;

        debug!(
            num_head = h,
            num_feat_1d,
            num_feat_2d,
            num_final_input,
            "loaded invariant point attention"
        );
        Ok(Self {
            q_scalar,
            kv_scalar,
            q_point_local,
            kv_point_local,
            attention_2d,
            output_projection,
            trainable_point_weights,
            layout,
            num_feat_1d,
            num_feat_2d,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &IpaConfig {
        &self.config
    }

    pub fn output_layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Updated embedding `[N, num_channel]`.
    ///
    /// `inputs_1d` is `[N, c1d]`, `inputs_2d` is `[N, N, c2d]` and `mask` is `[N]` or
    /// `[N, 1]` with entries in {0, 1}.
    #[instrument(skip_all)]
    pub fn forward<F: RigidTransform>(
        &self,
        inputs_1d: &Tensor,
        inputs_2d: &Tensor,
        mask: &Tensor,
        affine: &F,
    ) -> Result<Tensor> {
        let n = self.check_inputs(inputs_1d, inputs_2d, mask, affine)?;
        if n == 0 {
            return Ok(Tensor::zeros(
                (0, self.config.num_channel),
                inputs_1d.dtype(),
                inputs_1d.device(),
            )?);
        }
        let h = self.config.num_head;
        let (sv, pv) = (self.config.num_scalar_v, self.config.num_point_v);
        let Attention {
            weights,
            v_scalar,
            v_point,
        } = self.attend(inputs_1d, inputs_2d, mask, affine)?;

        // [H, N, Sv] -> [N, H * Sv]
        let result_scalar = weights
            .matmul(&v_scalar)?
            .transpose(0, 1)?
            .reshape((n, h * sv))?;

        // [H, N, Pv * 3] -> [N, H * Pv, 3], back into each residue's frame
        let result_point_global = weights
            .matmul(&v_point)?
            .reshape((h, n, pv, 3))?
            .transpose(0, 1)?
            .reshape((n, h * pv, 3))?;
        let result_point_local = affine.invert_point(&result_point_global)?;
        let point_norm = result_point_local
            .sqr()?
            .sum(D::Minus1)?
            .affine(1.0, self.config.dist_epsilon)?
            .sqrt()?;
        let point_x = result_point_local.narrow(D::Minus1, 0, 1)?.squeeze(D::Minus1)?;
        let point_y = result_point_local.narrow(D::Minus1, 1, 1)?.squeeze(D::Minus1)?;
        let point_z = result_point_local.narrow(D::Minus1, 2, 1)?.squeeze(D::Minus1)?;

        // sum_j attn[h, i, j] * inputs_2d[i, j, c] -> [N, H * C2]
        let result_attention_over_2d = weights
            .transpose(0, 1)?
            .contiguous()?
            .matmul(&inputs_2d.contiguous()?)?
            .reshape((n, h * self.num_feat_2d))?;

        let final_act = Tensor::cat(
            &[
                &result_scalar,
                &point_x,
                &point_y,
                &point_z,
                &point_norm,
                &result_attention_over_2d,
            ],
            D::Minus1,
        )?;
        debug_assert_eq!(final_act.dim(1)?, self.layout.width());
        apply_linear(&self.output_projection, &final_act)
    }

    /// The attention map `[H, N, N]` that [`forward`](Self::forward) aggregates with.
    pub fn attention_weights<F: RigidTransform>(
        &self,
        inputs_1d: &Tensor,
        inputs_2d: &Tensor,
        mask: &Tensor,
        affine: &F,
    ) -> Result<Tensor> {
        let n = self.check_inputs(inputs_1d, inputs_2d, mask, affine)?;
        if n == 0 {
            let h = self.config.num_head;
            return Ok(Tensor::zeros(
                (h, 0, 0),
                inputs_1d.dtype(),
                inputs_1d.device(),
            )?);
        }
        Ok(self.attend(inputs_1d, inputs_2d, mask, affine)?.weights)
    }

    fn check_inputs<F: RigidTransform>(
        &self,
        inputs_1d: &Tensor,
        inputs_2d: &Tensor,
        mask: &Tensor,
        affine: &F,
    ) -> Result<usize> {
        let n = match inputs_1d.dims() {
            [n, _] => *n,
            dims => {
                return Err(FoldingError::ShapeMismatch {
                    tensor: "inputs_1d",
                    expected: format!("[N, {}]", self.num_feat_1d),
                    actual: dims.to_vec(),
                })
            }
        };
        check_dims("inputs_1d", inputs_1d.dims(), &[n, self.num_feat_1d])?;
        check_dims("inputs_2d", inputs_2d.dims(), &[n, n, self.num_feat_2d])?;
        if mask.dims() != [n] && mask.dims() != [n, 1] {
            return Err(FoldingError::ShapeMismatch {
                tensor: "mask",
                expected: format!("[{}] or [{}, 1]", n, n),
                actual: mask.dims().to_vec(),
            });
        }
        check_dims("affine", &[affine.num_residues()], &[n])?;
        Ok(n)
    }

    fn attend<F: RigidTransform>(
        &self,
        inputs_1d: &Tensor,
        inputs_2d: &Tensor,
        mask: &Tensor,
        affine: &F,
    ) -> Result<Attention> {
        let n = inputs_1d.dim(0)?;
        let h = self.config.num_head;
        let (sqk, sv) = (self.config.num_scalar_qk, self.config.num_scalar_v);
        let (pqk, pv) = (self.config.num_point_qk, self.config.num_point_v);

        let scalar_weights = (1.0 / (NUM_LOGIT_TERMS * sqk.max(1) as f64)).sqrt();
        let point_weights = (1.0 / (NUM_LOGIT_TERMS * pqk.max(1) as f64 * 9.0 / 2.0)).sqrt();
        let attention_2d_weights = (1.0 / NUM_LOGIT_TERMS).sqrt();

        // scalar queries, keys and values, heads first: [H, N, c]
        let q_scalar = apply_linear(&self.q_scalar, inputs_1d)?
            .reshape((n, h, sqk))?
            .transpose(0, 1)?
            .contiguous()?;
        let kv_scalar = apply_linear(&self.kv_scalar, inputs_1d)?.reshape((n, h, sqk + sv))?;
        let k_scalar = kv_scalar.narrow(D::Minus1, 0, sqk)?.transpose(0, 1)?.contiguous()?;
        let v_scalar = kv_scalar.narrow(D::Minus1, sqk, sv)?.transpose(0, 1)?.contiguous()?;

        // points: [N, H, P, 3] in the global frame
        let q_point = self.global_points(&self.q_point_local, inputs_1d, affine, pqk)?;
        let kv_point = self.global_points(&self.kv_point_local, inputs_1d, affine, pqk + pv)?;
        let k_point = kv_point.narrow(2, 0, pqk)?;
        let v_point = kv_point.narrow(2, pqk, pv)?;
        let heads_first = |t: &Tensor, p: usize| -> Result<Tensor> {
            Ok(t.transpose(0, 1)?.contiguous()?.reshape((h, n, p * 3))?)
        };
        let q_point = heads_first(&q_point, pqk)?;
        let k_point = heads_first(&k_point, pqk)?;
        let v_point = heads_first(&v_point, pv)?;

        let attn_qk_scalar = q_scalar
            .affine(scalar_weights, 0.0)?
            .matmul(&k_scalar.t()?)?;

        // softplus(w_h) * point_weights, [H, 1, 1]
        let head_weights = softplus(&self.trainable_point_weights)?
            .affine(point_weights, 0.0)?
            .reshape((h, 1, 1))?;
        let dist2 = q_point
            .unsqueeze(2)?
            .broadcast_sub(&k_point.unsqueeze(1)?)?
            .sqr()?
            .sum(D::Minus1)?;
        let attn_qk_point = dist2.broadcast_mul(&head_weights)?.affine(-0.5, 0.0)?;

        let attention_2d = apply_linear(&self.attention_2d, inputs_2d)?
            .permute((2, 0, 1))?
            .affine(attention_2d_weights, 0.0)?;

        let mask = mask.reshape(n)?.to_dtype(attn_qk_scalar.dtype())?;
        let mask_2d = mask.unsqueeze(1)?.broadcast_mul(&mask.unsqueeze(0)?)?;
        let mask_bias = mask_2d.affine(MASK_PENALTY, -MASK_PENALTY)?;

        let attn_logits = attn_qk_scalar
            .add(&attn_qk_point)?
            .add(&attention_2d)?
            .broadcast_add(&mask_bias)?
            .contiguous()?;
        let weights = softmax_last_dim(&attn_logits)?;

        Ok(Attention {
            weights,
            v_scalar,
            v_point,
        })
    }

    /// Project `[N, c1d]` to `[N, H, points, 3]` local points and lift them into the
    /// global frame. The projection is laid out as `[x | y | z]`, each block `H * points`.
    fn global_points<F: RigidTransform>(
        &self,
        layer: &Linear,
        inputs_1d: &Tensor,
        affine: &F,
        points: usize,
    ) -> Result<Tensor> {
        let n = inputs_1d.dim(0)?;
        let h = self.config.num_head;
        let local = apply_linear(layer, inputs_1d)?
            .reshape((n, 3, h * points))?
            .transpose(1, 2)?
            .contiguous()?;
        let global = affine.apply_to_point(&local)?;
        Ok(global.reshape((n, h, points, 3))?)
    }
}

// log(1 + exp(w)) without overflowing exp for large w.
fn softplus(w: &Tensor) -> Result<Tensor> {
    let tail = w.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
    Ok(w.relu()?.add(&tail)?)
}

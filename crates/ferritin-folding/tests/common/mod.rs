#![allow(dead_code)]
//! Seeded parameters and plain-loop references of the structure-module layers.
use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use ferritin_folding::{IpaConfig, SidechainConfig};
use ferritin_geometry::{QuatAffine, Rigid};
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::HashMap;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn uniform(rng: &mut StdRng, len: usize, scale: f32) -> Vec<f32> {
    (0..len).map(|_| rng.gen_range(-scale..scale)).collect()
}

/// A linear layer in the stored layout: `weights [in, out]` row-major plus `bias`.
#[derive(Clone, Debug)]
pub struct DenseParams {
    pub in_dim: usize,
    pub out_dim: usize,
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
}

impl DenseParams {
    pub fn random(rng: &mut StdRng, in_dim: usize, out_dim: usize, scale: f32) -> Self {
        Self {
            in_dim,
            out_dim,
            weights: uniform(rng, in_dim * out_dim, scale),
            bias: uniform(rng, out_dim, scale),
        }
    }

    pub fn apply(&self, x: &[f64]) -> Vec<f64> {
        assert_eq!(x.len(), self.in_dim);
        (0..self.out_dim)
            .map(|o| {
                self.bias[o] as f64
                    + x.iter()
                        .enumerate()
                        .map(|(i, xi)| xi * self.weights[i * self.out_dim + o] as f64)
                        .sum::<f64>()
            })
            .collect()
    }

    pub fn insert(&self, ts: &mut HashMap<String, Tensor>, prefix: &str) -> Result<()> {
        ts.insert(
            format!("{}.weights", prefix),
            Tensor::from_vec(self.weights.clone(), (self.in_dim, self.out_dim), &Device::Cpu)?,
        );
        ts.insert(
            format!("{}.bias", prefix),
            Tensor::from_vec(self.bias.clone(), self.out_dim, &Device::Cpu)?,
        );
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct IpaParams {
    pub config: IpaConfig,
    pub num_feat_1d: usize,
    pub num_feat_2d: usize,
    pub q_scalar: DenseParams,
    pub kv_scalar: DenseParams,
    pub q_point_local: DenseParams,
    pub kv_point_local: DenseParams,
    pub attention_2d: DenseParams,
    pub output_projection: DenseParams,
    pub trainable_point_weights: Vec<f32>,
}

impl IpaParams {
    pub fn random(
        rng: &mut StdRng,
        config: &IpaConfig,
        num_feat_1d: usize,
        num_feat_2d: usize,
    ) -> Self {
        let h = config.num_head;
        let (sqk, sv) = (config.num_scalar_qk, config.num_scalar_v);
        let (pqk, pv) = (config.num_point_qk, config.num_point_v);
        let final_dim = h * (num_feat_2d + sv + 4 * pv);
        Self {
            config: config.clone(),
            num_feat_1d,
            num_feat_2d,
            q_scalar: DenseParams::random(rng, num_feat_1d, h * sqk, 0.3),
            kv_scalar: DenseParams::random(rng, num_feat_1d, h * (sqk + sv), 0.3),
            q_point_local: DenseParams::random(rng, num_feat_1d, h * 3 * pqk, 0.5),
            kv_point_local: DenseParams::random(rng, num_feat_1d, h * 3 * (pqk + pv), 0.5),
            attention_2d: DenseParams::random(rng, num_feat_2d, h, 0.3),
            output_projection: DenseParams::random(rng, final_dim, config.num_channel, 0.1),
            trainable_point_weights: uniform(rng, h, 1.0),
        }
    }

    pub fn tensors(&self, prefix: &str) -> Result<HashMap<String, Tensor>> {
        let mut ts = HashMap::new();
        self.q_scalar.insert(&mut ts, &format!("{}.q_scalar", prefix))?;
        self.kv_scalar.insert(&mut ts, &format!("{}.kv_scalar", prefix))?;
        self.q_point_local
            .insert(&mut ts, &format!("{}.q_point_local", prefix))?;
        self.kv_point_local
            .insert(&mut ts, &format!("{}.kv_point_local", prefix))?;
        self.attention_2d
            .insert(&mut ts, &format!("{}.attention_2d", prefix))?;
        self.output_projection
            .insert(&mut ts, &format!("{}.output_projection", prefix))?;
        ts.insert(
            format!("{}.trainable_point_weights", prefix),
            Tensor::from_vec(
                self.trainable_point_weights.clone(),
                self.config.num_head,
                &Device::Cpu,
            )?,
        );
        Ok(ts)
    }

    pub fn var_builder(&self, prefix: &str) -> Result<VarBuilder<'static>> {
        Ok(VarBuilder::from_tensors(
            self.tensors(prefix)?,
            DType::F32,
            &Device::Cpu,
        ))
    }

    /// Straightforward per-element evaluation of the layer.
    ///
    /// `frames` holds one `(rotation row-major, translation)` per residue.
    pub fn reference_forward(
        &self,
        inputs_1d: &[Vec<f64>],
        inputs_2d: &[Vec<Vec<f64>>],
        mask: &[f64],
        frames: &[([f64; 9], [f64; 3])],
    ) -> Vec<Vec<f64>> {
        let n = inputs_1d.len();
        let c = &self.config;
        let h = c.num_head;
        let (sqk, sv, pqk, pv) = (c.num_scalar_qk, c.num_scalar_v, c.num_point_qk, c.num_point_v);
        let c2 = self.num_feat_2d;

        let apply = |f: &([f64; 9], [f64; 3]), p: [f64; 3]| -> [f64; 3] {
            let (r, t) = f;
            [
                r[0] * p[0] + r[1] * p[1] + r[2] * p[2] + t[0],
                r[3] * p[0] + r[4] * p[1] + r[5] * p[2] + t[1],
                r[6] * p[0] + r[7] * p[1] + r[8] * p[2] + t[2],
            ]
        };
        let invert = |f: &([f64; 9], [f64; 3]), p: [f64; 3]| -> [f64; 3] {
            let (r, t) = f;
            let d = [p[0] - t[0], p[1] - t[1], p[2] - t[2]];
            [
                r[0] * d[0] + r[3] * d[1] + r[6] * d[2],
                r[1] * d[0] + r[4] * d[1] + r[7] * d[2],
                r[2] * d[0] + r[5] * d[1] + r[8] * d[2],
            ]
        };
        // global points [residue][head][point]
        let points = |layer: &DenseParams, per_head: usize| -> Vec<Vec<Vec<[f64; 3]>>> {
            (0..n)
                .map(|i| {
                    let raw = layer.apply(&inputs_1d[i]);
                    let block = h * per_head;
                    (0..h)
                        .map(|hh| {
                            (0..per_head)
                                .map(|p| {
                                    let k = hh * per_head + p;
                                    apply(&frames[i], [raw[k], raw[block + k], raw[2 * block + k]])
                                })
                                .collect()
                        })
                        .collect()
                })
                .collect()
        };

        let q_s: Vec<Vec<f64>> = inputs_1d.iter().map(|x| self.q_scalar.apply(x)).collect();
        let kv_s: Vec<Vec<f64>> = inputs_1d.iter().map(|x| self.kv_scalar.apply(x)).collect();
        let q_p = points(&self.q_point_local, pqk);
        let kv_p = points(&self.kv_point_local, pqk + pv);

        let scalar_w = (1.0 / (3.0 * sqk.max(1) as f64)).sqrt();
        let point_w = (1.0 / (3.0 * pqk.max(1) as f64 * 4.5)).sqrt();
        let pair_w = (1.0f64 / 3.0).sqrt();

        // attn[h][i][j]
        let mut attn = vec![vec![vec![0f64; n]; n]; h];
        for hh in 0..h {
            let softplus = (1.0 + (self.trainable_point_weights[hh] as f64).exp()).ln();
            for i in 0..n {
                let mut logits = vec![0f64; n];
                for (j, logit) in logits.iter_mut().enumerate() {
                    let scalar: f64 = (0..sqk)
                        .map(|cc| q_s[i][hh * sqk + cc] * kv_s[j][hh * (sqk + sv) + cc])
                        .sum();
                    let dist2: f64 = (0..pqk)
                        .map(|p| {
                            let (a, b) = (q_p[i][hh][p], kv_p[j][hh][p]);
                            (0..3).map(|d| (a[d] - b[d]).powi(2)).sum::<f64>()
                        })
                        .sum();
                    let pair = self.attention_2d.apply(&inputs_2d[i][j])[hh];
                    *logit = scalar_w * scalar - 0.5 * softplus * point_w * dist2
                        + pair_w * pair
                        - 1e5 * (1.0 - mask[i] * mask[j]);
                }
                let max = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                let z: f64 = logits.iter().map(|l| (l - max).exp()).sum();
                for j in 0..n {
                    attn[hh][i][j] = (logits[j] - max).exp() / z;
                }
            }
        }

        (0..n)
            .map(|i| {
                let mut scalar = vec![0f64; h * sv];
                let mut local = vec![[0f64; 3]; h * pv];
                let mut pair = vec![0f64; h * c2];
                for hh in 0..h {
                    for j in 0..n {
                        let a = attn[hh][i][j];
                        for cc in 0..sv {
                            scalar[hh * sv + cc] += a * kv_s[j][hh * (sqk + sv) + sqk + cc];
                        }
                        for p in 0..pv {
                            let v = kv_p[j][hh][pqk + p];
                            for d in 0..3 {
                                local[hh * pv + p][d] += a * v[d];
                            }
                        }
                        for cc in 0..c2 {
                            pair[hh * c2 + cc] += a * inputs_2d[i][j][cc];
                        }
                    }
                }
                let local: Vec<[f64; 3]> = local.into_iter().map(|g| invert(&frames[i], g)).collect();
                let mut features = scalar;
                for d in 0..3 {
                    features.extend(local.iter().map(|p| p[d]));
                }
                features.extend(
                    local
                        .iter()
                        .map(|p| (c.dist_epsilon + p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt()),
                );
                features.extend(pair);
                self.output_projection.apply(&features)
            })
            .collect()
    }
}

pub fn to_tensor1(rows: &[Vec<f64>]) -> Result<Tensor> {
    let (n, c) = (rows.len(), rows[0].len());
    let flat: Vec<f32> = rows.iter().flatten().map(|&x| x as f32).collect();
    Ok(Tensor::from_vec(flat, (n, c), &Device::Cpu)?)
}

pub fn to_tensor2(rows: &[Vec<Vec<f64>>]) -> Result<Tensor> {
    let (n, m, c) = (rows.len(), rows[0].len(), rows[0][0].len());
    let flat: Vec<f32> = rows.iter().flatten().flatten().map(|&x| x as f32).collect();
    Ok(Tensor::from_vec(flat, (n, m, c), &Device::Cpu)?)
}

pub fn random_features(rng: &mut StdRng, n: usize, c1d: usize, c2d: usize) -> (Vec<Vec<f64>>, Vec<Vec<Vec<f64>>>) {
    let mut row = |len: usize| -> Vec<f64> { (0..len).map(|_| rng.gen_range(-1.0..1.0)).collect() };
    let inputs_1d = (0..n).map(|_| row(c1d)).collect();
    let inputs_2d = (0..n)
        .map(|_| (0..n).map(|_| row(c2d)).collect())
        .collect();
    (inputs_1d, inputs_2d)
}

/// Random unit-quaternion frames with translations in `[-t, t)`.
pub fn random_affine(rng: &mut StdRng, n: usize, t: f32) -> Result<QuatAffine> {
    let mut packed = Vec::with_capacity(n * 7);
    for _ in 0..n {
        packed.extend(uniform(rng, 4, 1.0));
        packed.extend(uniform(rng, 3, t));
    }
    Ok(QuatAffine::from_tensor(
        &Tensor::from_vec(packed, (n, 7), &Device::Cpu)?,
        true,
    )?)
}

/// Row-major rotations and translations of a `[N]` frame.
pub fn frames_of(rigid: &Rigid) -> Result<Vec<([f64; 9], [f64; 3])>> {
    let rot = rigid.rot().flatten_all()?.to_vec1::<f32>()?;
    let trans = rigid.trans().flatten_all()?.to_vec1::<f32>()?;
    Ok(rot
        .chunks(9)
        .zip(trans.chunks(3))
        .map(|(r, t)| {
            let mut rr = [0f64; 9];
            let mut tt = [0f64; 3];
            rr.iter_mut().zip(r).for_each(|(a, b)| *a = *b as f64);
            tt.iter_mut().zip(t).for_each(|(a, b)| *a = *b as f64);
            (rr, tt)
        })
        .collect())
}

pub fn max_abs_diff(a: &Tensor, b: &Tensor) -> Result<f32> {
    Ok(a.sub(b)?
        .abs()?
        .flatten_all()?
        .max(0)?
        .to_scalar::<f32>()?)
}

pub struct SidechainParams {
    pub input_projections: Vec<DenseParams>,
    pub blocks: Vec<(DenseParams, DenseParams)>,
    pub unnormalized_angles: DenseParams,
}

impl SidechainParams {
    pub fn random(rng: &mut StdRng, config: &SidechainConfig, input_dims: &[usize]) -> Self {
        let c = config.num_channel;
        Self {
            input_projections: input_dims
                .iter()
                .map(|&d| DenseParams::random(rng, d, c, 0.4))
                .collect(),
            blocks: (0..config.num_residual_block)
                .map(|_| {
                    (
                        DenseParams::random(rng, c, c, 0.3),
                        DenseParams::random(rng, c, c, 0.3),
                    )
                })
                .collect(),
            unnormalized_angles: DenseParams::random(rng, c, 14, 0.5),
        }
    }

    pub fn var_builder(&self) -> Result<VarBuilder<'static>> {
        let mut ts = HashMap::new();
        let suffix = |k: usize| if k == 0 { String::new() } else { format!("_{}", k) };
        for (k, p) in self.input_projections.iter().enumerate() {
            p.insert(&mut ts, &format!("rigid_sidechain.input_projection{}", suffix(k)))?;
        }
        for (k, (a, b)) in self.blocks.iter().enumerate() {
            a.insert(&mut ts, &format!("rigid_sidechain.resblock1{}", suffix(k)))?;
            b.insert(&mut ts, &format!("rigid_sidechain.resblock2{}", suffix(k)))?;
        }
        self.unnormalized_angles
            .insert(&mut ts, "rigid_sidechain.unnormalized_angles")?;
        Ok(VarBuilder::from_tensors(ts, DType::F32, &Device::Cpu))
    }

    /// Unnormalised (sin, cos) values of one residue.
    pub fn reference_angles(&self, reps: &[&[f64]]) -> Vec<f64> {
        let relu = |v: Vec<f64>| -> Vec<f64> { v.into_iter().map(|x| x.max(0.0)).collect() };
        let mut act = vec![0.0; self.blocks[0].0.in_dim];
        for (p, rep) in self.input_projections.iter().zip(reps) {
            let projected = p.apply(&relu(rep.to_vec()));
            act.iter_mut().zip(projected).for_each(|(a, b)| *a += b);
        }
        for (a, b) in &self.blocks {
            let hidden = b.apply(&relu(a.apply(&relu(act.clone()))));
            act.iter_mut().zip(hidden).for_each(|(x, h)| *x += h);
        }
        self.unnormalized_angles.apply(&relu(act))
    }
}

//! # ferritin-folding
//!
//! Structure-module layers on top of [`ferritin_geometry`]:
//!
//! - [`InvariantPointAttention`]: frame-aware attention over residues.
//! - [`MultiRigidSidechain`]: torsion angles and atom14 coordinates from residue
//!   embeddings.
//!
//! Parameters are read from a candle [`VarBuilder`](candle_nn::VarBuilder) using
//! AlphaFold names (`weights` stored `[in, out]`, `bias`).
//!
//! ```no_run
//! use candle_core::{DType, Device, Tensor};
//! use candle_nn::VarBuilder;
//! use ferritin_folding::{InvariantPointAttention, IpaConfig, ParamSlot};
//! use ferritin_geometry::QuatAffine;
//!
//! # fn main() -> ferritin_folding::Result<()> {
//! let device = Device::Cpu;
//! let vb = unsafe {
//!     VarBuilder::from_mmaped_safetensors(&["structure_module.safetensors"], DType::F32, &device)?
//! };
//! let config = IpaConfig::default();
//! let ipa = InvariantPointAttention::load(
//!     vb.pp("invariant_point_attention"),
//!     &config,
//!     384,
//!     128,
//!     ParamSlot::Sole,
//! )?;
//! let n = 10;
//! let act = Tensor::zeros((n, 384), DType::F32, &device)?;
//! let pair = Tensor::zeros((n, n, 128), DType::F32, &device)?;
//! let mask = Tensor::ones(n, DType::F32, &device)?;
//! let affine = QuatAffine::identity(n, DType::F32, &device)?;
//! let _out = ipa.forward(&act, &pair, &mask, &affine)?;
//! # Ok(())
//! # }
//! ```
pub mod config;
pub mod error;
pub mod ipa;
pub mod params;
pub mod sidechain;

pub use config::{IpaConfig, SidechainConfig};
pub use error::{FoldingError, Result};
pub use ipa::{InvariantPointAttention, OutputLayout};
pub use params::ParamSlot;
pub use sidechain::{l2_normalize, MultiRigidSidechain, SidechainOutput};

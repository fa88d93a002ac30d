//! # Residue Constants
//!
//! Idealised amino-acid geometry used to place side-chain atoms.
//!
//! ## Conventions
//!
//! - Residue types use the AlphaFold ordering `ARNDCQEGHILKMFPSTWYV`, followed by
//!   `UNK` at index 20. The `UNK` rows of every table are zero.
//! - Each residue has 8 rigid groups: backbone, pre-omega, phi, psi, chi1..chi4.
//! - Atoms are stored in the compact atom14 layout. Empty slots have an empty name,
//!   a zero position and a zero mask.
//!
//! Literature positions are given in the local frame of the rigid group that moves
//! the atom. The chi2..chi4 positions are relative to the preceding chi frame.
//!
use crate::error::{GeometryError, Result};
use candle_core::{Device, Tensor};
use std::sync::OnceLock;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

pub const RESTYPES: [&str; 20] = [
    "A", "R", "N", "D", "C", "Q", "E", "G", "H", "I", "L", "K", "M", "F", "P", "S", "T", "W", "Y",
    "V",
];

pub const RESTYPE_NUM: usize = 20;
pub const UNK_RESTYPE_INDEX: usize = 20;
/// Rows in every per-residue-type table (20 amino acids plus `UNK`).
pub const RESTYPE_WITH_UNK_NUM: usize = 21;
pub const NUM_RIGID_GROUPS: usize = 8;
pub const ATOM14_NUM: usize = 14;
pub const NUM_TORSIONS: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
pub enum ResidueType {
    #[strum(serialize = "ALA")]
    Ala,
    #[strum(serialize = "ARG")]
    Arg,
    #[strum(serialize = "ASN")]
    Asn,
    #[strum(serialize = "ASP")]
    Asp,
    #[strum(serialize = "CYS")]
    Cys,
    #[strum(serialize = "GLN")]
    Gln,
    #[strum(serialize = "GLU")]
    Glu,
    #[strum(serialize = "GLY")]
    Gly,
    #[strum(serialize = "HIS")]
    His,
    #[strum(serialize = "ILE")]
    Ile,
    #[strum(serialize = "LEU")]
    Leu,
    #[strum(serialize = "LYS")]
    Lys,
    #[strum(serialize = "MET")]
    Met,
    #[strum(serialize = "PHE")]
    Phe,
    #[strum(serialize = "PRO")]
    Pro,
    #[strum(serialize = "SER")]
    Ser,
    #[strum(serialize = "THR")]
    Thr,
    #[strum(serialize = "TRP")]
    Trp,
    #[strum(serialize = "TYR")]
    Tyr,
    #[strum(serialize = "VAL")]
    Val,
    #[strum(serialize = "UNK")]
    Unk,
}

impl ResidueType {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: i64) -> Result<Self> {
        usize::try_from(index)
            .ok()
            .and_then(|i| ResidueType::iter().nth(i))
            .ok_or(GeometryError::UnknownResidueType {
                index,
                valid: RESTYPE_WITH_UNK_NUM,
            })
    }

    pub fn from_one_letter(code: char) -> Self {
        RESTYPES
            .iter()
            .position(|r| r.starts_with(code))
            .and_then(|i| ResidueType::iter().nth(i))
            .unwrap_or(ResidueType::Unk)
    }

    pub fn one_letter(self) -> char {
        RESTYPES
            .get(self.index())
            .and_then(|s| s.chars().next())
            .unwrap_or('X')
    }

    pub fn atom14_names(self) -> &'static [&'static str; ATOM14_NUM] {
        &RESTYPE_ATOM14_NAMES[self.index()]
    }

    pub fn chi_angles_atoms(self) -> &'static [[&'static str; 4]] {
        CHI_ANGLES_ATOMS.get(self.index()).copied().unwrap_or(&[])
    }
}

#[rustfmt::skip]
pub const RESTYPE_ATOM14_NAMES: [[&str; ATOM14_NUM]; RESTYPE_WITH_UNK_NUM] = [
    ["N", "CA", "C", "O", "CB", "",    "",    "",    "",    "",    "",    "",    "",    ""   ], // ALA
    ["N", "CA", "C", "O", "CB", "CG",  "CD",  "NE",  "CZ",  "NH1", "NH2", "",    "",    ""   ], // ARG
    ["N", "CA", "C", "O", "CB", "CG",  "OD1", "ND2", "",    "",    "",    "",    "",    ""   ], // ASN
    ["N", "CA", "C", "O", "CB", "CG",  "OD1", "OD2", "",    "",    "",    "",    "",    ""   ], // ASP
    ["N", "CA", "C", "O", "CB", "SG",  "",    "",    "",    "",    "",    "",    "",    ""   ], // CYS
    ["N", "CA", "C", "O", "CB", "CG",  "CD",  "OE1", "NE2", "",    "",    "",    "",    ""   ], // GLN
    ["N", "CA", "C", "O", "CB", "CG",  "CD",  "OE1", "OE2", "",    "",    "",    "",    ""   ], // GLU
    ["N", "CA", "C", "O", "",   "",    "",    "",    "",    "",    "",    "",    "",    ""   ], // GLY
    ["N", "CA", "C", "O", "CB", "CG",  "ND1", "CD2", "CE1", "NE2", "",    "",    "",    ""   ], // HIS
    ["N", "CA", "C", "O", "CB", "CG1", "CG2", "CD1", "",    "",    "",    "",    "",    ""   ], // ILE
    ["N", "CA", "C", "O", "CB", "CG",  "CD1", "CD2", "",    "",    "",    "",    "",    ""   ], // LEU
    ["N", "CA", "C", "O", "CB", "CG",  "CD",  "CE",  "NZ",  "",    "",    "",    "",    ""   ], // LYS
    ["N", "CA", "C", "O", "CB", "CG",  "SD",  "CE",  "",    "",    "",    "",    "",    ""   ], // MET
    ["N", "CA", "C", "O", "CB", "CG",  "CD1", "CD2", "CE1", "CE2", "CZ",  "",    "",    ""   ], // PHE
    ["N", "CA", "C", "O", "CB", "CG",  "CD",  "",    "",    "",    "",    "",    "",    ""   ], // PRO
    ["N", "CA", "C", "O", "CB", "OG",  "",    "",    "",    "",    "",    "",    "",    ""   ], // SER
    ["N", "CA", "C", "O", "CB", "OG1", "CG2", "",    "",    "",    "",    "",    "",    ""   ], // THR
    ["N", "CA", "C", "O", "CB", "CG",  "CD1", "CD2", "NE1", "CE2", "CE3", "CZ2", "CZ3", "CH2"], // TRP
    ["N", "CA", "C", "O", "CB", "CG",  "CD1", "CD2", "CE1", "CE2", "CZ",  "OH",  "",    ""   ], // TYR
    ["N", "CA", "C", "O", "CB", "CG1", "CG2", "",    "",    "",    "",    "",    "",    ""   ], // VAL
    ["",  "",   "",  "",  "",   "",    "",    "",    "",    "",    "",    "",    "",    ""   ], // UNK
];

/// Atoms defining each chi dihedral, per residue type.
#[rustfmt::skip]
pub const CHI_ANGLES_ATOMS: [&[[&str; 4]]; RESTYPE_NUM] = [
    &[],                                                                                     // ALA
    &[["N", "CA", "CB", "CG"], ["CA", "CB", "CG", "CD"], ["CB", "CG", "CD", "NE"], ["CG", "CD", "NE", "CZ"]], // ARG
    &[["N", "CA", "CB", "CG"], ["CA", "CB", "CG", "OD1"]],                                   // ASN
    &[["N", "CA", "CB", "CG"], ["CA", "CB", "CG", "OD1"]],                                   // ASP
    &[["N", "CA", "CB", "SG"]],                                                              // CYS
    &[["N", "CA", "CB", "CG"], ["CA", "CB", "CG", "CD"], ["CB", "CG", "CD", "OE1"]],         // GLN
    &[["N", "CA", "CB", "CG"], ["CA", "CB", "CG", "CD"], ["CB", "CG", "CD", "OE1"]],         // GLU
    &[],                                                                                     // GLY
    &[["N", "CA", "CB", "CG"], ["CA", "CB", "CG", "ND1"]],                                   // HIS
    &[["N", "CA", "CB", "CG1"], ["CA", "CB", "CG1", "CD1"]],                                 // ILE
    &[["N", "CA", "CB", "CG"], ["CA", "CB", "CG", "CD1"]],                                   // LEU
    &[["N", "CA", "CB", "CG"], ["CA", "CB", "CG", "CD"], ["CB", "CG", "CD", "CE"], ["CG", "CD", "CE", "NZ"]], // LYS
    &[["N", "CA", "CB", "CG"], ["CA", "CB", "CG", "SD"], ["CB", "CG", "SD", "CE"]],          // MET
    &[["N", "CA", "CB", "CG"], ["CA", "CB", "CG", "CD1"]],                                   // PHE
    &[["N", "CA", "CB", "CG"], ["CA", "CB", "CG", "CD"]],                                    // PRO
    &[["N", "CA", "CB", "OG"]],                                                              // SER
    &[["N", "CA", "CB", "OG1"]],                                                             // THR
    &[["N", "CA", "CB", "CG"], ["CA", "CB", "CG", "CD1"]],                                   // TRP
    &[["N", "CA", "CB", "CG"], ["CA", "CB", "CG", "CD1"]],                                   // TYR
    &[["N", "CA", "CB", "CG1"]],                                                             // VAL
];

type GroupPosition = (&'static str, usize, [f32; 3]);

/// Literature atom positions: `(atom, rigid group, position in that group's frame)`.
#[rustfmt::skip]
pub const RIGID_GROUP_ATOM_POSITIONS: [&[GroupPosition]; RESTYPE_NUM] = [
    &[ // ALA
        ("N", 0, [-0.525, 1.363, 0.000]), ("CA", 0, [0.000, 0.000, 0.000]),
        ("C", 0, [1.526, -0.000, -0.000]), ("CB", 0, [-0.529, -0.774, -1.205]),
        ("O", 3, [0.627, 1.062, 0.000]),
    ],
    &[ // ARG
        ("N", 0, [-0.524, 1.362, -0.000]), ("CA", 0, [0.000, 0.000, 0.000]),
        ("C", 0, [1.525, -0.000, -0.000]), ("CB", 0, [-0.524, -0.778, -1.209]),
        ("O", 3, [0.626, 1.062, 0.000]), ("CG", 4, [0.616, 1.390, -0.000]),
        ("CD", 5, [0.564, 1.414, 0.000]), ("NE", 6, [0.539, 1.357, -0.000]),
        ("NH1", 7, [0.206, 2.301, 0.000]), ("NH2", 7, [2.078, 0.978, -0.000]),
        ("CZ", 7, [0.758, 1.093, -0.000]),
    ],
    &[ // ASN
        ("N", 0, [-0.536, 1.357, 0.000]), ("CA", 0, [0.000, 0.000, 0.000]),
        ("C", 0, [1.526, -0.000, -0.000]), ("CB", 0, [-0.531, -0.787, -1.200]),
        ("O", 3, [0.625, 1.062, 0.000]), ("CG", 4, [0.584, 1.399, 0.000]),
        ("ND2", 5, [0.593, -1.188, 0.001]), ("OD1", 5, [0.633, 1.059, 0.000]),
    ],
    &[ // ASP
        ("N", 0, [-0.525, 1.362, -0.000]), ("CA", 0, [0.000, 0.000, 0.000]),
        ("C", 0, [1.527, 0.000, -0.000]), ("CB", 0, [-0.526, -0.778, -1.208]),
        ("O", 3, [0.626, 1.062, -0.000]), ("CG", 4, [0.593, 1.398, -0.000]),
        ("OD1", 5, [0.610, 1.091, 0.000]), ("OD2", 5, [0.592, -1.101, -0.003]),
    ],
    &[ // CYS
        ("N", 0, [-0.522, 1.362, -0.000]), ("CA", 0, [0.000, 0.000, 0.000]),
        ("C", 0, [1.524, 0.000, 0.000]), ("CB", 0, [-0.519, -0.773, -1.212]),
        ("O", 3, [0.625, 1.062, -0.000]), ("SG", 4, [0.728, 1.653, 0.000]),
    ],
    &[ // GLN
        ("N", 0, [-0.526, 1.361, -0.000]), ("CA", 0, [0.000, 0.000, 0.000]),
        ("C", 0, [1.526, 0.000, 0.000]), ("CB", 0, [-0.525, -0.779, -1.207]),
        ("O", 3, [0.626, 1.062, -0.000]), ("CG", 4, [0.615, 1.393, 0.000]),
        ("CD", 5, [0.587, 1.399, -0.000]), ("NE2", 6, [0.593, -1.189, -0.001]),
        ("OE1", 6, [0.634, 1.060, 0.000]),
    ],
    &[ // GLU
        ("N", 0, [-0.528, 1.361, 0.000]), ("CA", 0, [0.000, 0.000, 0.000]),
        ("C", 0, [1.526, -0.000, -0.000]), ("CB", 0, [-0.526, -0.781, -1.207]),
        ("O", 3, [0.626, 1.062, 0.000]), ("CG", 4, [0.615, 1.392, 0.000]),
        ("CD", 5, [0.600, 1.397, 0.000]), ("OE1", 6, [0.607, 1.095, -0.000]),
        ("OE2", 6, [0.589, -1.104, -0.001]),
    ],
    &[ // GLY
        ("N", 0, [-0.572, 1.337, 0.000]), ("CA", 0, [0.000, 0.000, 0.000]),
        ("C", 0, [1.517, -0.000, -0.000]), ("O", 3, [0.626, 1.062, -0.000]),
    ],
    &[ // HIS
        ("N", 0, [-0.527, 1.360, 0.000]), ("CA", 0, [0.000, 0.000, 0.000]),
        ("C", 0, [1.525, 0.000, 0.000]), ("CB", 0, [-0.525, -0.778, -1.208]),
        ("O", 3, [0.625, 1.063, 0.000]), ("CG", 4, [0.600, 1.370, -0.000]),
        ("CD2", 5, [0.889, -1.021, 0.003]), ("ND1", 5, [0.744, 1.160, -0.000]),
        ("CE1", 5, [2.030, 0.851, 0.002]), ("NE2", 5, [2.145, -0.466, 0.004]),
    ],
    &[ // ILE
        ("N", 0, [-0.493, 1.373, -0.000]), ("CA", 0, [0.000, 0.000, 0.000]),
        ("C", 0, [1.527, -0.000, -0.000]), ("CB", 0, [-0.536, -0.793, -1.213]),
        ("O", 3, [0.627, 1.062, -0.000]), ("CG1", 4, [0.534, 1.437, -0.000]),
        ("CG2", 4, [0.540, -0.785, -1.199]), ("CD1", 5, [0.619, 1.391, 0.000]),
    ],
    &[ // LEU
        ("N", 0, [-0.520, 1.363, 0.000]), ("CA", 0, [0.000, 0.000, 0.000]),
        ("C", 0, [1.525, -0.000, -0.000]), ("CB", 0, [-0.522, -0.773, -1.214]),
        ("O", 3, [0.625, 1.063, -0.000]), ("CG", 4, [0.678, 1.371, 0.000]),
        ("CD1", 5, [0.530, 1.430, -0.000]), ("CD2", 5, [0.535, -0.774, 1.200]),
    ],
    &[ // LYS
        ("N", 0, [-0.526, 1.362, -0.000]), ("CA", 0, [0.000, 0.000, 0.000]),
        ("C", 0, [1.526, 0.000, 0.000]), ("CB", 0, [-0.524, -0.778, -1.208]),
        ("O", 3, [0.626, 1.062, -0.000]), ("CG", 4, [0.619, 1.390, 0.000]),
        ("CD", 5, [0.559, 1.417, 0.000]), ("CE", 6, [0.560, 1.416, 0.000]),
        ("NZ", 7, [0.554, 1.387, 0.000]),
    ],
    &[ // MET
        ("N", 0, [-0.521, 1.364, -0.000]), ("CA", 0, [0.000, 0.000, 0.000]),
        ("C", 0, [1.525, 0.000, 0.000]), ("CB", 0, [-0.523, -0.776, -1.210]),
        ("O", 3, [0.625, 1.062, -0.000]), ("CG", 4, [0.613, 1.391, -0.000]),
        ("SD", 5, [0.703, 1.695, 0.000]), ("CE", 6, [0.320, 1.786, -0.000]),
    ],
    &[ // PHE
        ("N", 0, [-0.518, 1.363, 0.000]), ("CA", 0, [0.000, 0.000, 0.000]),
        ("C", 0, [1.524, 0.000, -0.000]), ("CB", 0, [-0.525, -0.776, -1.212]),
        ("O", 3, [0.626, 1.062, -0.000]), ("CG", 4, [0.607, 1.377, 0.000]),
        ("CD1", 5, [0.709, 1.195, -0.000]), ("CD2", 5, [0.706, -1.196, 0.000]),
        ("CE1", 5, [2.102, 1.198, -0.000]), ("CE2", 5, [2.098, -1.201, -0.000]),
        ("CZ", 5, [2.794, -0.003, -0.001]),
    ],
    &[ // PRO
        ("N", 0, [-0.566, 1.351, -0.000]), ("CA", 0, [0.000, 0.000, 0.000]),
        ("C", 0, [1.527, -0.000, 0.000]), ("CB", 0, [-0.546, -0.611, -1.293]),
        ("O", 3, [0.621, 1.066, 0.000]), ("CG", 4, [0.382, 1.445, 0.0]),
        // CD angle opened by 2 degrees to close the ring
        ("CD", 5, [0.477, 1.424, 0.0]),
    ],
    &[ // SER
        ("N", 0, [-0.529, 1.360, -0.000]), ("CA", 0, [0.000, 0.000, 0.000]),
        ("C", 0, [1.525, -0.000, -0.000]), ("CB", 0, [-0.518, -0.777, -1.211]),
        ("O", 3, [0.626, 1.062, -0.000]), ("OG", 4, [0.503, 1.325, 0.000]),
    ],
    &[ // THR
        ("N", 0, [-0.517, 1.364, 0.000]), ("CA", 0, [0.000, 0.000, 0.000]),
        ("C", 0, [1.526, 0.000, -0.000]), ("CB", 0, [-0.516, -0.793, -1.215]),
        ("O", 3, [0.626, 1.062, 0.000]), ("CG2", 4, [0.550, -0.718, -1.228]),
        ("OG1", 4, [0.472, 1.353, 0.000]),
    ],
    &[ // TRP
        ("N", 0, [-0.521, 1.363, 0.000]), ("CA", 0, [0.000, 0.000, 0.000]),
        ("C", 0, [1.525, -0.000, 0.000]), ("CB", 0, [-0.523, -0.776, -1.212]),
        ("O", 3, [0.627, 1.062, 0.000]), ("CG", 4, [0.609, 1.370, -0.000]),
        ("CD1", 5, [0.824, 1.091, 0.000]), ("CD2", 5, [0.854, -1.148, -0.005]),
        ("CE2", 5, [2.186, -0.678, -0.007]), ("CE3", 5, [0.622, -2.530, -0.007]),
        ("NE1", 5, [2.140, 0.690, -0.004]), ("CZ2", 5, [3.283, -1.543, -0.011]),
        ("CZ3", 5, [1.715, -3.389, -0.011]), ("CH2", 5, [3.028, -2.890, -0.013]),
    ],
    &[ // TYR
        ("N", 0, [-0.522, 1.362, 0.000]), ("CA", 0, [0.000, 0.000, 0.000]),
        ("C", 0, [1.524, -0.000, -0.000]), ("CB", 0, [-0.522, -0.776, -1.213]),
        ("O", 3, [0.627, 1.062, -0.000]), ("CG", 4, [0.607, 1.382, -0.000]),
        ("CD1", 5, [0.716, 1.195, -0.000]), ("CD2", 5, [0.713, -1.194, -0.001]),
        ("CE1", 5, [2.107, 1.200, -0.002]), ("CE2", 5, [2.104, -1.201, -0.003]),
        ("OH", 5, [4.168, -0.002, -0.005]), ("CZ", 5, [2.791, -0.001, -0.003]),
    ],
    &[ // VAL
        ("N", 0, [-0.494, 1.373, -0.000]), ("CA", 0, [0.000, 0.000, 0.000]),
        ("C", 0, [1.527, -0.000, -0.000]), ("CB", 0, [-0.533, -0.795, -1.213]),
        ("O", 3, [0.627, 1.062, -0.000]), ("CG1", 4, [0.540, 1.429, -0.000]),
        ("CG2", 4, [0.533, -0.776, 1.203]),
    ],
];

/// Tables derived from the literature positions, flattened row-major.
#[derive(Debug)]
pub struct RigidGroupTables {
    /// `[21, 8, 4, 4]` frame of each rigid group relative to its parent.
    pub default_frames: Vec<f32>,
    /// `[21, 14]`
    pub atom14_to_group: Vec<u32>,
    /// `[21, 14, 8]` one-hot form of `atom14_to_group`.
    pub atom14_group_one_hot: Vec<f32>,
    /// `[21, 14, 3]`
    pub atom14_positions: Vec<f32>,
    /// `[21, 14]`
    pub atom14_mask: Vec<f32>,
}

static RIGID_GROUP_TABLES: OnceLock<RigidGroupTables> = OnceLock::new();

pub fn rigid_group_tables() -> &'static RigidGroupTables {
    RIGID_GROUP_TABLES.get_or_init(build_rigid_group_tables)
}

pub fn chi_angles_mask(restype: usize) -> [bool; 4] {
    let n = CHI_ANGLES_ATOMS.get(restype).map_or(0, |a| a.len());
    [0 < n, 1 < n, 2 < n, 3 < n]
}

#[inline]
fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
fn dot(a: [f32; 3], b: [f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[inline]
fn normalize(v: [f32; 3]) -> [f32; 3] {
    let n = dot(v, v).sqrt();
    [v[0] / n, v[1] / n, v[2] / n]
}

const IDENTITY_4X4: [[f32; 4]; 4] = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// Homogeneous transform whose x-axis is along `ex` and whose xy-plane contains `ey`.
fn make_rigid_transformation_4x4(ex: [f32; 3], ey: [f32; 3], translation: [f32; 3]) -> [[f32; 4]; 4] {
    let ex = normalize(ex);
    let d = dot(ey, ex);
    let ey = normalize([ey[0] - d * ex[0], ey[1] - d * ex[1], ey[2] - d * ex[2]]);
    let ez = cross(ex, ey);
    let mut m = IDENTITY_4X4;
    for row in 0..3 {
        m[row] = [ex[row], ey[row], ez[row], translation[row]];
    }
    m
}

fn build_rigid_group_tables() -> RigidGroupTables {
    let mut default_frames = vec![0f32; RESTYPE_WITH_UNK_NUM * NUM_RIGID_GROUPS * 16];
    let mut atom14_to_group = vec![0u32; RESTYPE_WITH_UNK_NUM * ATOM14_NUM];
    let mut atom14_group_one_hot =
        vec![0f32; RESTYPE_WITH_UNK_NUM * ATOM14_NUM * NUM_RIGID_GROUPS];
    let mut atom14_positions = vec![0f32; RESTYPE_WITH_UNK_NUM * ATOM14_NUM * 3];
    let mut atom14_mask = vec![0f32; RESTYPE_WITH_UNK_NUM * ATOM14_NUM];

    for (restype, positions) in RIGID_GROUP_ATOM_POSITIONS.iter().enumerate() {
        let position = |name: &str| -> [f32; 3] {
            positions
                .iter()
                .find(|(atom, _, _)| *atom == name)
                .map(|(_, _, p)| *p)
                .unwrap_or([0.0; 3])
        };

        let mut set_frame = |group: usize, m: [[f32; 4]; 4]| {
            let offset = (restype * NUM_RIGID_GROUPS + group) * 16;
            for (r, row) in m.iter().enumerate() {
                default_frames[offset + r * 4..offset + r * 4 + 4].copy_from_slice(row);
            }
        };

        // backbone and pre-omega groups sit on the backbone frame
        set_frame(0, IDENTITY_4X4);
        set_frame(1, IDENTITY_4X4);
        // phi
        set_frame(
            2,
            make_rigid_transformation_4x4(
                sub(position("N"), position("CA")),
                [1.0, 0.0, 0.0],
                position("N"),
            ),
        );
        // psi
        set_frame(
            3,
            make_rigid_transformation_4x4(
                sub(position("C"), position("CA")),
                sub(position("CA"), position("N")),
                position("C"),
            ),
        );

        let chi_atoms = CHI_ANGLES_ATOMS[restype];
        if let Some(base) = chi_atoms.first() {
            let [a0, a1, a2, _] = (*base).map(|name| position(name));
            set_frame(4, make_rigid_transformation_4x4(sub(a2, a1), sub(a0, a1), a2));
        }
        // chi2..chi4 rotate about an axis starting at the previous frame's origin
        for (chi_idx, atoms) in chi_atoms.iter().enumerate().skip(1) {
            let axis_end = position(atoms[2]);
            set_frame(
                4 + chi_idx,
                make_rigid_transformation_4x4(axis_end, [-1.0, 0.0, 0.0], axis_end),
            );
        }

        for (slot, name) in RESTYPE_ATOM14_NAMES[restype].iter().enumerate() {
            let Some((_, group, pos)) = positions.iter().find(|(atom, _, _)| atom == name) else {
                continue;
            };
            let idx = restype * ATOM14_NUM + slot;
            atom14_to_group[idx] = *group as u32;
            atom14_group_one_hot[idx * NUM_RIGID_GROUPS + group] = 1.0;
            atom14_positions[idx * 3..idx * 3 + 3].copy_from_slice(pos);
            atom14_mask[idx] = 1.0;
        }
    }

    RigidGroupTables {
        default_frames,
        atom14_to_group,
        atom14_group_one_hot,
        atom14_positions,
        atom14_mask,
    }
}

pub fn restype_rigid_group_default_frame(device: &Device) -> Result<Tensor> {
    let t = rigid_group_tables();
    Ok(Tensor::from_slice(
        &t.default_frames,
        (RESTYPE_WITH_UNK_NUM, NUM_RIGID_GROUPS, 4, 4),
        device,
    )?)
}

pub fn restype_atom14_to_rigid_group(device: &Device) -> Result<Tensor> {
    let t = rigid_group_tables();
    Ok(Tensor::from_slice(
        &t.atom14_to_group,
        (RESTYPE_WITH_UNK_NUM, ATOM14_NUM),
        device,
    )?)
}

pub fn restype_atom14_group_one_hot(device: &Device) -> Result<Tensor> {
    let t = rigid_group_tables();
    Ok(Tensor::from_slice(
        &t.atom14_group_one_hot,
        (RESTYPE_WITH_UNK_NUM, ATOM14_NUM, NUM_RIGID_GROUPS),
        device,
    )?)
}

pub fn restype_atom14_rigid_group_positions(device: &Device) -> Result<Tensor> {
    let t = rigid_group_tables();
    Ok(Tensor::from_slice(
        &t.atom14_positions,
        (RESTYPE_WITH_UNK_NUM, ATOM14_NUM, 3),
        device,
    )?)
}

pub fn restype_atom14_mask(device: &Device) -> Result<Tensor> {
    let t = rigid_group_tables();
    Ok(Tensor::from_slice(
        &t.atom14_mask,
        (RESTYPE_WITH_UNK_NUM, ATOM14_NUM),
        device,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_residue_type_round_trip() {
        assert_eq!(ResidueType::from_str("TRP").unwrap(), ResidueType::Trp);
        assert_eq!(ResidueType::Trp.to_string(), "TRP");
        assert_eq!(ResidueType::from_index(1).unwrap(), ResidueType::Arg);
        assert_eq!(ResidueType::from_one_letter('V'), ResidueType::Val);
        assert_eq!(ResidueType::from_one_letter('B'), ResidueType::Unk);
        assert_eq!(ResidueType::Unk.index(), UNK_RESTYPE_INDEX);
        assert_eq!(ResidueType::Cys.one_letter(), 'C');
    }

    #[test]
    fn test_unknown_index_rejected() {
        assert!(matches!(
            ResidueType::from_index(21),
            Err(GeometryError::UnknownResidueType { index: 21, .. })
        ));
        assert!(ResidueType::from_index(-1).is_err());
    }

    #[test]
    fn test_atom14_names_cover_literature_positions() {
        for (restype, positions) in RIGID_GROUP_ATOM_POSITIONS.iter().enumerate() {
            let names = RESTYPE_ATOM14_NAMES[restype];
            let n_named = names.iter().filter(|n| !n.is_empty()).count();
            assert_eq!(n_named, positions.len(), "restype {}", RESTYPES[restype]);
            for (atom, _, _) in positions.iter() {
                assert!(names.contains(atom), "{} missing {}", RESTYPES[restype], atom);
            }
        }
    }

    #[test]
    fn test_atom14_mask_counts() {
        let t = rigid_group_tables();
        let count = |r: ResidueType| -> f32 {
            t.atom14_mask[r.index() * ATOM14_NUM..(r.index() + 1) * ATOM14_NUM]
                .iter()
                .sum()
        };
        assert_eq!(count(ResidueType::Gly), 4.0);
        assert_eq!(count(ResidueType::Ala), 5.0);
        assert_eq!(count(ResidueType::Arg), 11.0);
        assert_eq!(count(ResidueType::Trp), 14.0);
        assert_eq!(count(ResidueType::Unk), 0.0);
    }

    #[test]
    fn test_default_frames_are_rigid() {
        let t = rigid_group_tables();
        for restype in 0..RESTYPE_NUM {
            let mask = chi_angles_mask(restype);
            for group in 0..NUM_RIGID_GROUPS {
                if group >= 4 && !mask[group - 4] {
                    continue;
                }
                let off = (restype * NUM_RIGID_GROUPS + group) * 16;
                let m = &t.default_frames[off..off + 16];
                for i in 0..3 {
                    for j in 0..3 {
                        let d: f32 = (0..3).map(|k| m[k * 4 + i] * m[k * 4 + j]).sum();
                        let expected = if i == j { 1.0 } else { 0.0 };
                        assert!((d - expected).abs() < 1e-5, "restype {} group {}", restype, group);
                    }
                }
                assert_eq!(m[15], 1.0);
            }
        }
    }

    #[test]
    fn test_psi_frame_origin_is_carbonyl_carbon() {
        let t = rigid_group_tables();
        let off = (ResidueType::Ala.index() * NUM_RIGID_GROUPS + 3) * 16;
        let m = &t.default_frames[off..off + 16];
        assert!((m[3] - 1.526).abs() < 1e-6);
        assert!(m[7].abs() < 1e-6);
        assert!(m[11].abs() < 1e-6);
    }

    #[test]
    fn test_chi_mask() {
        assert_eq!(chi_angles_mask(ResidueType::Ala.index()), [false; 4]);
        assert_eq!(chi_angles_mask(ResidueType::Lys.index()), [true; 4]);
        assert_eq!(
            chi_angles_mask(ResidueType::Ile.index()),
            [true, true, false, false]
        );
        assert_eq!(ResidueType::Met.chi_angles_atoms().len(), 3);
    }
}

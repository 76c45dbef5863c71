use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::geom::GeomError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Atom {
    pub atomic_number: usize,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl PartialEq for Atom {
    fn eq(&self, other: &Self) -> bool {
        let eps = 1e-8;
        let close = |a: f64, b: f64| (a - b).abs() < eps;
        self.atomic_number == other.atomic_number
            && close(self.x, other.x)
            && close(self.y, other.y)
            && close(self.z, other.z)
    }
}

impl Display for Atom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:2} {:15.10} {:15.10} {:15.10}",
            self.label(),
            self.x,
            self.y,
            self.z
        )
    }
}

impl FromStr for Atom {
    type Err = GeomError;

    /// parse an Atom from a line like
    ///  C 1.0 1.0 1.0
    /// trailing gradient columns, as written in path snapshots, are accepted
    /// and ignored
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || GeomError::BadAtom(s.to_owned());
        let fields: Vec<_> = s.split_whitespace().collect();
        if fields.len() != 4 && fields.len() != 7 {
            return Err(bad());
        }
        let mut coord = [0.0; 3];
        for (c, field) in coord.iter_mut().zip(&fields[1..4]) {
            *c = field.parse().map_err(|_| bad())?;
        }
        Self::new_from_label(fields[0], coord[0], coord[1], coord[2])
            .ok_or_else(|| GeomError::UnknownSymbol(fields[0].to_owned()))
    }
}

pub const NUMBER_TO_SYMBOL: [&str; 55] = [
    "X", "H", "He", "Li", "Be", "B", "C", "N", "O", "F", "Ne", "Na", "Mg",
    "Al", "Si", "P", "S", "Cl", "Ar", "K", "Ca", "Sc", "Ti", "V", "Cr", "Mn",
    "Fe", "Co", "Ni", "Cu", "Zn", "Ga", "Ge", "As", "Se", "Br", "Kr", "Rb",
    "Sr", "Y", "Zr", "Nb", "Mo", "Tc", "Ru", "Rh", "Pd", "Ag", "Cd", "In",
    "Sn", "Sb", "Te", "I", "Xe",
];

fn symbol_to_number(s: &str) -> Option<usize> {
    NUMBER_TO_SYMBOL.iter().position(|&x| x == s)
}

fn titlecase(s: &str) -> String {
    let mut cs = s.chars();
    let Some(first) = cs.next() else {
        return String::new();
    };
    let mut ret = first.to_uppercase().to_string();
    for c in cs {
        ret.push_str(&c.to_lowercase().to_string());
    }
    ret
}

impl Atom {
    pub fn new(atomic_number: usize, x: f64, y: f64, z: f64) -> Self {
        Self {
            atomic_number,
            x,
            y,
            z,
        }
    }

    /// look up `atomic_symbol` in the periodic table, falling back to its
    /// titlecased form. dummy atoms ("X") are not accepted
    pub fn new_from_label(
        atomic_symbol: &str,
        x: f64,
        y: f64,
        z: f64,
    ) -> Option<Self> {
        let num = symbol_to_number(atomic_symbol)
            .or_else(|| symbol_to_number(&titlecase(atomic_symbol)))?;
        if num == 0 {
            return None;
        }
        Some(Self::new(num, x, y, z))
    }

    /// the atomic symbol, or "X" for atomic numbers outside the periodic
    /// table
    pub fn label(&self) -> &str {
        NUMBER_TO_SYMBOL
            .get(self.atomic_number)
            .copied()
            .unwrap_or("X")
    }

    pub fn coord(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

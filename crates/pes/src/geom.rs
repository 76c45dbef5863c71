use std::{error::Error, fmt::Display, io, str::FromStr};

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::atom::Atom;

#[derive(Debug, PartialEq, Eq)]
pub enum GeomError {
    /// an atom line that could not be parsed
    BadAtom(String),
    UnknownSymbol(String),
    /// an XYZ frame header that is not an atom count
    BadCount(String),
    /// the input ended while `want` more atom lines were expected
    Truncated { want: usize },
    Empty,
}

impl Display for GeomError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeomError::BadAtom(line) => {
                write!(f, "failed to parse atom line `{line}`")
            }
            GeomError::UnknownSymbol(s) => {
                write!(f, "unknown atomic symbol `{s}`")
            }
            GeomError::BadCount(line) => {
                write!(f, "expected an atom count, found `{line}`")
            }
            GeomError::Truncated { want } => {
                write!(f, "geometry ended with {want} atoms missing")
            }
            GeomError::Empty => write!(f, "no atoms found in geometry"),
        }
    }
}

impl Error for GeomError {}

/// A Cartesian geometry. The units are whatever the input used; nothing in
/// this crate converts them.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct Geom {
    pub atoms: Vec<Atom>,
}

impl Display for Geom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for atom in &self.atoms {
            writeln!(
                f,
                "{:5}{:15.10}{:15.10}{:15.10}",
                atom.label(),
                atom.x,
                atom.y,
                atom.z,
            )?
        }
        Ok(())
    }
}

impl FromStr for Geom {
    type Err = GeomError;

    /// parse a single geometry, either as a bare list of atom lines or as one
    /// XYZ frame with its count and comment lines
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some(first) = s.lines().find(|l| !l.trim().is_empty()) else {
            return Err(GeomError::Empty);
        };
        if first.trim().parse::<usize>().is_ok() {
            let mut frames = Self::frames(s)?;
            return match frames.len() {
                1 => Ok(frames.remove(0)),
                _ => Err(GeomError::BadAtom(first.to_owned())),
            };
        }
        let atoms = s
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::parse)
            .collect::<Result<Vec<Atom>, _>>()?;
        Ok(Self { atoms })
    }
}

impl From<Vec<Atom>> for Geom {
    fn from(atoms: Vec<Atom>) -> Self {
        Self { atoms }
    }
}

impl Geom {
    /// read every frame of a multi-frame XYZ file. blank lines between
    /// frames are skipped
    pub fn frames(s: &str) -> Result<Vec<Self>, GeomError> {
        let mut ret = Vec::new();
        let mut lines = s.lines();
        while let Some(line) = lines.next() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let natoms: usize = line
                .parse()
                .map_err(|_| GeomError::BadCount(line.to_owned()))?;
            // comment line
            if lines.next().is_none() {
                return Err(GeomError::Truncated { want: natoms });
            }
            let mut atoms = Vec::with_capacity(natoms);
            for i in 0..natoms {
                let Some(line) = lines.next() else {
                    return Err(GeomError::Truncated { want: natoms - i });
                };
                atoms.push(line.parse()?);
            }
            ret.push(Self { atoms });
        }
        if ret.is_empty() {
            return Err(GeomError::Empty);
        }
        Ok(ret)
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    /// the flattened Cartesian coordinates, x1 y1 z1 x2 ...
    pub fn coords(&self) -> DVector<f64> {
        DVector::from_iterator(
            3 * self.atoms.len(),
            self.atoms.iter().flat_map(Atom::coord),
        )
    }

    /// write `self` as one XYZ frame. if `gradient` is provided, its three
    /// components for each atom are appended to the atom line
    pub fn write_xyz<W: io::Write>(
        &self,
        w: &mut W,
        comment: &str,
        gradient: Option<&DVector<f64>>,
    ) -> io::Result<()> {
        writeln!(w, "{}", self.atoms.len())?;
        writeln!(w, "{comment}")?;
        for (i, atom) in self.atoms.iter().enumerate() {
            write!(
                w,
                "{:2} {:20.12} {:20.12} {:20.12}",
                atom.label(),
                atom.x,
                atom.y,
                atom.z
            )?;
            if let Some(g) = gradient {
                write!(
                    w,
                    " {:20.12} {:20.12} {:20.12}",
                    g[3 * i],
                    g[3 * i + 1],
                    g[3 * i + 2]
                )?;
            }
            writeln!(w)?;
        }
        Ok(())
    }
}

//! Continuous interpolants along a relaxed chain, parameterized by the
//! fraction of the total arc length.

use std::{error::Error, fmt::Display};

use nalgebra::DVector;

use crate::chain::Chain;

#[derive(Debug, PartialEq)]
pub enum PathError {
    /// the reaction coordinate was outside [0, 1]
    OutOfRange(f64),
    /// the images at either end of this segment coincide
    NotIncreasing { segment: usize },
    /// this image was never evaluated
    MissingData(usize),
}

impl Display for PathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathError::OutOfRange(s) => {
                write!(f, "reaction coordinate {s} is outside [0, 1]")
            }
            PathError::NotIncreasing { segment } => write!(
                f,
                "images {segment} and {} coincide, arc length is not \
                 strictly increasing",
                segment + 1
            ),
            PathError::MissingData(i) => {
                write!(f, "image {i} has no energy or gradient")
            }
        }
    }
}

impl Error for PathError {}

/// where a reaction coordinate falls on the discrete chain
enum Location {
    Node(usize),
    /// segment index and the fraction of the way along it
    Segment(usize, f64),
}

/// Energy and geometry as functions of the reaction coordinate `s`, which
/// runs from 0 at the first image to 1 at the last in proportion to the
/// cumulative distance between images.
#[derive(Clone, Debug)]
pub struct ReactionPath {
    /// cumulative arc length at each image
    x: Vec<f64>,
    energies: Vec<f64>,
    /// dE/dx along the direction the path arrives at each image from
    slopes: Vec<f64>,
    coords: Vec<DVector<f64>>,
}

impl ReactionPath {
    pub fn new(chain: &Chain) -> Result<Self, PathError> {
        let images = chain.images();
        let n = images.len();
        let mut x = Vec::with_capacity(n);
        let mut energies = Vec::with_capacity(n);
        let mut slopes = Vec::with_capacity(n);
        for (i, image) in images.iter().enumerate() {
            let (Some(energy), Some(gradient)) = (image.energy, &image.gradient)
            else {
                return Err(PathError::MissingData(i));
            };
            let t = if i == 0 {
                &images[1].coords - &image.coords
            } else {
                &image.coords - &images[i - 1].coords
            };
            let dx = t.norm();
            if dx == 0.0 {
                return Err(PathError::NotIncreasing {
                    segment: i.saturating_sub(1),
                });
            }
            let xi = if i == 0 { 0.0 } else { x[i - 1] + dx };
            x.push(xi);
            energies.push(energy);
            slopes.push(gradient.dot(&t) / dx);
        }
        Ok(Self {
            x,
            energies,
            slopes,
            coords: images.iter().map(|im| im.coords.clone()).collect(),
        })
    }

    /// total length of the path
    pub fn length(&self) -> f64 {
        self.x.last().copied().unwrap_or(0.0)
    }

    /// the reaction coordinate of every image
    pub fn positions(&self) -> Vec<f64> {
        let l = self.length();
        self.x.iter().map(|x| x / l).collect()
    }

    fn locate(&self, s: f64) -> Result<Location, PathError> {
        if !(0.0..=1.0).contains(&s) {
            return Err(PathError::OutOfRange(s));
        }
        let s = s * self.length();
        // last image at or before s
        let ic = self.x.partition_point(|&x| x <= s).saturating_sub(1);
        if s == self.x[ic] || ic + 1 == self.x.len() {
            return Ok(Location::Node(ic));
        }
        let a = (s - self.x[ic]) / (self.x[ic + 1] - self.x[ic]);
        Ok(Location::Segment(ic, a))
    }

    /// Energy at `s` from the cubic Hermite interpolant through the image
    /// energies and their slopes along the path.
    pub fn energy(&self, s: f64) -> Result<f64, PathError> {
        let (ic, a) = match self.locate(s)? {
            Location::Node(i) => return Ok(self.energies[i]),
            Location::Segment(ic, a) => (ic, a),
        };
        let dx = self.x[ic + 1] - self.x[ic];
        let (f0, f1) = (self.energies[ic], self.energies[ic + 1]);
        let df = f1 - f0;
        let (m0, m1) = (self.slopes[ic], self.slopes[ic + 1]);
        Ok((1.0 - a) * f0
            + a * f1
            + a * (1.0 - a)
                * ((1.0 - a) * (m0 * dx - df) + a * (df - m1 * dx)))
    }

    /// coordinates at `s`, linear between neighboring images
    pub fn geometry(&self, s: f64) -> Result<DVector<f64>, PathError> {
        Ok(match self.locate(s)? {
            Location::Node(i) => self.coords[i].clone(),
            Location::Segment(ic, a) => {
                &self.coords[ic] * (1.0 - a) + &self.coords[ic + 1] * a
            }
        })
    }

    /// `n` evenly spaced `(s, energy)` pairs from 0 to 1
    pub fn profile(&self, n: usize) -> Vec<(f64, f64)> {
        let last = n.saturating_sub(1).max(1) as f64;
        (0..n)
            .filter_map(|i| {
                let s = (i as f64 / last).min(1.0);
                self.energy(s).ok().map(|e| (s, e))
            })
            .collect()
    }
}

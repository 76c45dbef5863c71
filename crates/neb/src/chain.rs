//! The chain of images and the state carried by each of them.

use nalgebra::DVector;
use pes::{Atom, Geom};

use crate::{
    NebError,
    integrator::{Integrator, Stepper},
};

/// One point on the path.
#[derive(Clone, Debug)]
pub struct Image {
    /// flattened Cartesian coordinates, length 3N
    pub coords: DVector<f64>,

    /// the electronic state this image lives on. set once when the chain is
    /// built
    pub state: usize,

    pub energy: Option<f64>,

    /// dE/dx, the negative of the true force
    pub gradient: Option<DVector<f64>>,

    /// spring force along the tangent plus the true force perpendicular to it
    pub effective_force: Option<DVector<f64>>,

    /// unit tangent. never set on the endpoints
    pub tangent: Option<DVector<f64>>,

    pub(crate) stepper: Stepper,
}

impl Image {
    pub fn new(
        coords: DVector<f64>,
        state: usize,
        integrator: &Integrator,
    ) -> Self {
        Self {
            coords,
            state,
            energy: None,
            gradient: None,
            effective_force: None,
            tangent: None,
            stepper: integrator.stepper(),
        }
    }

    /// the true force, -gradient
    pub fn force(&self) -> Option<DVector<f64>> {
        self.gradient.as_ref().map(|g| -g)
    }

    /// norm of the effective force, or infinity if it has not been computed
    pub fn force_norm(&self) -> f64 {
        self.effective_force
            .as_ref()
            .map_or(f64::INFINITY, |f| f.norm())
    }
}

/// The ordered images from reactant (index 0) to product. The number and
/// order of images never change once the chain is built.
#[derive(Clone, Debug)]
pub struct Chain {
    /// atom labels shared by every image
    atoms: Vec<Atom>,
    integrator: Integrator,
    images: Vec<Image>,
}

impl Chain {
    /// build a chain from `geoms` with the electronic states in `states`
    pub fn new(
        geoms: &[Geom],
        states: &[usize],
        integrator: Integrator,
    ) -> Result<Self, NebError> {
        if geoms.len() < 2 {
            return Err(NebError::Chain(format!(
                "at least two geometries are required, found {}",
                geoms.len()
            )));
        }
        if geoms.len() != states.len() {
            return Err(NebError::Chain(format!(
                "{} geometries but {} states",
                geoms.len(),
                states.len()
            )));
        }
        let atoms = geoms[0].atoms.clone();
        if atoms.is_empty() {
            return Err(NebError::Chain("the first geometry is empty".into()));
        }
        for (i, g) in geoms.iter().enumerate() {
            if !same_atoms(&atoms, g) {
                return Err(NebError::Chain(format!(
                    "geometry {i} does not have the same atoms as geometry 0"
                )));
            }
        }
        let images = geoms
            .iter()
            .zip(states)
            .map(|(g, &s)| Image::new(g.coords(), s, &integrator))
            .collect();
        Ok(Self {
            atoms,
            integrator,
            images,
        })
    }

    /// a new chain with `n` images linearly interpolated into every segment
    /// of `self`. inserted images in the first half of a segment take the
    /// state of its left end and the rest that of its right end
    pub fn interpolate(&self, n: usize) -> Self {
        let mut images = Vec::with_capacity((self.len() - 1) * (n + 1) + 1);
        for pair in self.images.windows(2) {
            let (left, right) = (&pair[0], &pair[1]);
            images.push(Image::new(
                left.coords.clone(),
                left.state,
                &self.integrator,
            ));
            for j in 1..=n {
                let a = j as f64 / (n + 1) as f64;
                let coords = &left.coords * (1.0 - a) + &right.coords * a;
                let state = if a < 0.5 { left.state } else { right.state };
                images.push(Image::new(coords, state, &self.integrator));
            }
        }
        if let Some(last) = self.images.last() {
            images.push(Image::new(
                last.coords.clone(),
                last.state,
                &self.integrator,
            ));
        }
        Self {
            atoms: self.atoms.clone(),
            integrator: self.integrator,
            images,
        }
    }

    /// replace the coordinates of every image with those in `geoms`, as when
    /// restarting from a snapshot. evaluation results and optimizer histories
    /// are cleared
    pub fn restart(&mut self, geoms: &[Geom]) -> Result<(), NebError> {
        if geoms.len() != self.len() {
            return Err(NebError::Chain(format!(
                "restart file has {} images, but the chain has {}",
                geoms.len(),
                self.len()
            )));
        }
        if let Some(i) = geoms.iter().position(|g| !same_atoms(&self.atoms, g))
        {
            return Err(NebError::Chain(format!(
                "restart image {i} does not have the same atoms as the chain"
            )));
        }
        for (image, g) in self.images.iter_mut().zip(geoms) {
            *image = Image::new(g.coords(), image.state, &self.integrator);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn is_endpoint(&self, i: usize) -> bool {
        i == 0 || i + 1 == self.len()
    }

    pub fn images(&self) -> &[Image] {
        &self.images
    }

    pub fn images_mut(&mut self) -> &mut [Image] {
        &mut self.images
    }

    /// the geometry of image `i`
    pub fn geom(&self, i: usize) -> Geom {
        let coords = self.images[i].coords.as_slice();
        Geom::from(
            self.atoms
                .iter()
                .zip(coords.chunks_exact(3))
                .map(|(a, c)| Atom::new(a.atomic_number, c[0], c[1], c[2]))
                .collect::<Vec<_>>(),
        )
    }

    pub fn energies(&self) -> Vec<Option<f64>> {
        self.images.iter().map(|im| im.energy).collect()
    }

    pub fn states(&self) -> Vec<usize> {
        self.images.iter().map(|im| im.state).collect()
    }
}

impl std::ops::Index<usize> for Chain {
    type Output = Image;

    fn index(&self, index: usize) -> &Self::Output {
        &self.images[index]
    }
}

/// whether `g` has the atomic numbers of `atoms`, in order
fn same_atoms(atoms: &[Atom], g: &Geom) -> bool {
    g.len() == atoms.len()
        && g.atoms
            .iter()
            .zip(atoms)
            .all(|(a, b)| a.atomic_number == b.atomic_number)
}

impl std::ops::IndexMut<usize> for Chain {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.images[index]
    }
}

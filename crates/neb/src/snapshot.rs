//! The files left behind by a run for the path viewer.

use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::PathBuf,
};

use serde::Serialize;

use crate::{
    chain::Chain,
    optimize::{Outcome, Status},
    path::ReactionPath,
};

/// Writes numbered snapshots of the chain into `dir`, with `name` as part of
/// every file name.
#[derive(Clone, Debug)]
pub struct Snapshot {
    dir: PathBuf,
    name: String,
    tolerance: f64,
}

impl Snapshot {
    pub fn new(dir: impl Into<PathBuf>, name: &str, tolerance: f64) -> Self {
        Self {
            dir: dir.into(),
            name: name.to_owned(),
            tolerance,
        }
    }

    pub fn path_file(&self, tag: &str) -> PathBuf {
        self.dir.join(format!("neb_{}_{tag}.xyz", self.name))
    }

    pub fn energies_file(&self, tag: &str) -> PathBuf {
        self.dir.join(format!("path_energies_{}_{tag}.dat", self.name))
    }

    pub fn profile_file(&self) -> PathBuf {
        self.dir.join(format!("profile_{}.dat", self.name))
    }

    pub fn summary_file(&self) -> PathBuf {
        self.dir.join(format!("neb_{}.json", self.name))
    }

    /// Write every image as one frame of an XYZ file. The comment line of
    /// each frame gives the image index, its energy, and the tolerance, and
    /// the gradient is appended to the atom lines of evaluated images.
    pub fn write_path<W: Write>(
        &self,
        w: &mut W,
        chain: &Chain,
    ) -> io::Result<()> {
        for (i, image) in chain.images().iter().enumerate() {
            let energy = match image.energy {
                Some(e) => format!("{e:.12}"),
                None => "none".to_owned(),
            };
            let comment = format!(
                "image= {i}  energy= {energy}  tolerance={}",
                self.tolerance
            );
            chain.geom(i).write_xyz(w, &comment, image.gradient.as_ref())?;
        }
        Ok(())
    }

    /// Write one `index energy` line per image. Returns false without writing
    /// anything if some image has no energy yet.
    pub fn write_energies<W: Write>(
        w: &mut W,
        chain: &Chain,
    ) -> io::Result<bool> {
        let energies: Option<Vec<f64>> =
            chain.energies().into_iter().collect();
        let Some(energies) = energies else {
            return Ok(false);
        };
        for (i, e) in energies.iter().enumerate() {
            writeln!(w, "{i} {e:.12}")?;
        }
        Ok(true)
    }

    /// write the path and, once every image has an energy, the energies under
    /// `tag`
    pub fn write_tagged(&self, chain: &Chain, tag: &str) -> io::Result<()> {
        let path = self.path_file(tag);
        let mut f = BufWriter::new(File::create(&path)?);
        self.write_path(&mut f, chain)?;
        f.flush()?;
        log::debug!("wrote path to {}", path.display());

        let mut buf = Vec::new();
        if Self::write_energies(&mut buf, chain)? {
            std::fs::write(self.energies_file(tag), buf)?;
        }
        Ok(())
    }

    /// the snapshot for `iteration`, numbered with four digits
    pub fn write(&self, chain: &Chain, iteration: usize) -> io::Result<()> {
        self.write_tagged(chain, &format!("{iteration:04}"))
    }

    /// write `n` points of the interpolated energy profile as `s energy`
    pub fn write_profile(
        &self,
        path: &ReactionPath,
        n: usize,
    ) -> io::Result<()> {
        let mut f = BufWriter::new(File::create(self.profile_file())?);
        for (s, e) in path.profile(n) {
            writeln!(f, "{s:8.6} {e:.12}")?;
        }
        f.flush()
    }

    pub fn write_summary(&self, summary: &Summary) -> io::Result<()> {
        let mut f = BufWriter::new(File::create(self.summary_file())?);
        serde_json::to_writer_pretty(&mut f, summary)
            .map_err(io::Error::other)?;
        f.flush()
    }
}

/// Machine-readable record of a finished run.
#[derive(Debug, PartialEq, Serialize)]
pub struct Summary {
    pub status: Status,
    pub iterations: usize,
    pub max_force: f64,
    pub energies: Vec<Option<f64>>,
    pub states: Vec<usize>,
    /// highest energy along the chain relative to the first image
    pub barrier: Option<f64>,
}

impl Summary {
    pub fn new(outcome: &Outcome, chain: &Chain) -> Self {
        let energies = chain.energies();
        let highest = energies.iter().flatten().copied().reduce(f64::max);
        let barrier = match (energies.first(), highest) {
            (Some(Some(first)), Some(max)) => Some(max - first),
            _ => None,
        };
        Self {
            status: outcome.status,
            iterations: outcome.iterations,
            max_force: outcome.max_force,
            energies,
            states: chain.states(),
            barrier,
        }
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;
    use nalgebra::dvector;
    use pes::{Atom, Geom};

    use super::*;
    use crate::integrator::Integrator;

    fn chain() -> Chain {
        let geoms: Vec<_> = [0.7, 1.0, 1.5]
            .iter()
            .map(|&z| {
                Geom::from(vec![
                    Atom::new(1, 0.0, 0.0, 0.0),
                    Atom::new(1, 0.0, 0.0, z),
                ])
            })
            .collect();
        Chain::new(&geoms, &[0, 0, 1], Integrator::Bfgs { max_step: 0.1 })
            .unwrap()
    }

    fn evaluated() -> Chain {
        let mut chain = chain();
        let energies = [-1.0, -0.5, -0.75];
        for (image, e) in chain.images_mut().iter_mut().zip(energies) {
            image.energy = Some(e);
            image.gradient = Some(dvector![0.0, 0.0, 0.25, 0.0, 0.0, -0.25]);
        }
        chain
    }

    #[test]
    fn energies() {
        let mut got = Vec::new();
        assert!(Snapshot::write_energies(&mut got, &evaluated()).unwrap());
        assert_snapshot!(String::from_utf8(got).unwrap(), @r"
        0 -1.000000000000
        1 -0.500000000000
        2 -0.750000000000
        ");
    }

    #[test]
    fn no_energies_yet() {
        let mut got = Vec::new();
        assert!(!Snapshot::write_energies(&mut got, &chain()).unwrap());
        assert!(got.is_empty());
    }

    #[test]
    fn path_frames() {
        let s = Snapshot::new(".", "h2", 0.02);
        let mut got = Vec::new();
        s.write_path(&mut got, &evaluated()).unwrap();
        let got = String::from_utf8(got).unwrap();
        let lines: Vec<_> = got.lines().collect();
        assert_eq!(lines.len(), 12);
        assert_eq!(
            lines[1],
            "image= 0  energy= -1.000000000000  tolerance=0.02"
        );
        assert_eq!(
            lines[5],
            "image= 1  energy= -0.500000000000  tolerance=0.02"
        );
        // the viewer reads the tolerance after the last `=`
        let tol: f64 = lines[1].rsplit('=').next().unwrap().parse().unwrap();
        assert_eq!(tol, 0.02);
        // label, position, gradient
        assert_eq!(lines[3].split_whitespace().count(), 7);

        // frames read back as geometries
        let frames = Geom::frames(&got).unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2], evaluated().geom(2));
    }

    #[test]
    fn unevaluated_path() {
        let s = Snapshot::new(".", "h2", 0.02);
        let mut got = Vec::new();
        s.write_path(&mut got, &chain()).unwrap();
        let got = String::from_utf8(got).unwrap();
        let lines: Vec<_> = got.lines().collect();
        assert_eq!(lines[1], "image= 0  energy= none  tolerance=0.02");
        assert_eq!(lines[2].split_whitespace().count(), 4);
    }

    #[test]
    fn files() {
        let dir = tempfile::tempdir().unwrap();
        let s = Snapshot::new(dir.path(), "h2", 0.02);
        s.write(&chain(), 0).unwrap();
        assert!(dir.path().join("neb_h2_0000.xyz").exists());
        assert!(!dir.path().join("path_energies_h2_0000.dat").exists());

        s.write(&evaluated(), 12).unwrap();
        assert!(dir.path().join("neb_h2_0012.xyz").exists());
        assert!(dir.path().join("path_energies_h2_0012.dat").exists());

        let path = ReactionPath::new(&evaluated()).unwrap();
        s.write_profile(&path, 50).unwrap();
        let profile = std::fs::read_to_string(s.profile_file()).unwrap();
        assert_eq!(profile.lines().count(), 50);
        assert!(profile.starts_with("0.000000 -1.000000000000"));
    }

    #[test]
    fn summary() {
        let chain = evaluated();
        let outcome = Outcome {
            status: Status::Converged,
            iterations: 7,
            max_force: 0.01,
        };
        let got = Summary::new(&outcome, &chain);
        assert_eq!(got.barrier, Some(0.5));
        assert_eq!(got.states, vec![0, 0, 1]);

        let dir = tempfile::tempdir().unwrap();
        let s = Snapshot::new(dir.path(), "h2", 0.02);
        s.write_summary(&got).unwrap();
        let json: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(s.summary_file()).unwrap(),
        )
        .unwrap();
        assert_eq!(json["status"], "converged");
        assert_eq!(json["iterations"], 7);
        assert_eq!(json["energies"][1], -0.5);
    }
}

//! Dispatch of energy and gradient calculations for a batch of images.

use std::{
    path::{Path, PathBuf},
    time::Instant,
};

use pes::{CalcError, CalcResult, Calculator, Geom, Resources};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{NebError, chain::Chain};

/// What to do when the calculation for one image fails while the rest of its
/// batch succeeds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnFailure {
    /// stop the run with the error
    #[default]
    Abort,
    /// keep the previous energy and gradient of the failed image and carry
    /// on. an image that has never been evaluated still aborts the run
    Quarantine,
}

/// One pending calculation. `result` is the slot the worker writes into, so
/// no two workers ever touch the same memory.
struct Job {
    index: usize,
    geom: Geom,
    dir: PathBuf,
    result: Option<Result<CalcResult, CalcError>>,
}

impl Job {
    fn run<C: Calculator>(&mut self, calculator: &C, res: &Resources) {
        let start = Instant::now();
        self.result = Some(calculator.evaluate(&self.geom, &self.dir, res));
        log::trace!(
            "image {} finished in {:.1} s",
            self.index,
            start.elapsed().as_secs_f64()
        );
    }
}

/// Runs the injected [Calculator] on the images of a [Chain], at most
/// `parallel` at a time, each in its own directory under `scratch`.
pub struct Scheduler<C> {
    calculator: C,
    scratch: PathBuf,
    resources: Resources,
    parallel: usize,
    on_failure: OnFailure,
}

impl<C: Calculator> Scheduler<C> {
    pub fn new(
        calculator: C,
        scratch: impl Into<PathBuf>,
        resources: Resources,
        parallel: usize,
    ) -> Self {
        Self {
            calculator,
            scratch: scratch.into(),
            resources,
            parallel: parallel.max(1),
            on_failure: OnFailure::default(),
        }
    }

    pub fn on_failure(mut self, on_failure: OnFailure) -> Self {
        self.on_failure = on_failure;
        self
    }

    pub fn calculator(&self) -> &C {
        &self.calculator
    }

    pub fn scratch(&self) -> &Path {
        &self.scratch
    }

    /// the working directory of image `i`, reused on every iteration
    pub fn image_dir(&self, i: usize) -> PathBuf {
        self.scratch.join(format!("IMAGE_{i:02}"))
    }

    /// Evaluate the images in `indices` and store their energies and
    /// gradients in `chain`. Every other image is left untouched. Results are
    /// matched back to their images by index, so the order in which the
    /// calculations finish does not matter.
    pub fn evaluate(
        &self,
        chain: &mut Chain,
        indices: &[usize],
        iteration: usize,
    ) -> Result<(), NebError> {
        if indices.is_empty() {
            return Ok(());
        }
        log::debug!("iteration {iteration}: evaluating images {indices:?}");

        let mut jobs: Vec<Job> = indices
            .iter()
            .map(|&index| Job {
                index,
                geom: chain.geom(index),
                dir: self.image_dir(index),
                result: None,
            })
            .collect();

        let threads = self.parallel.min(jobs.len());
        match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
            Ok(pool) => pool.install(|| {
                jobs.par_iter_mut()
                    .for_each(|job| job.run(&self.calculator, &self.resources))
            }),
            Err(e) => {
                log::warn!("failed to build worker pool ({e}), running serially");
                for job in &mut jobs {
                    job.run(&self.calculator, &self.resources);
                }
            }
        }

        for job in jobs {
            let image = &mut chain[job.index];
            let result = match job.result {
                Some(Ok(res)) if res.gradient.len() != image.coords.len() => {
                    Err(CalcError::WrongSize {
                        want: image.coords.len(),
                        got: res.gradient.len(),
                    })
                }
                Some(r) => r,
                None => {
                    return Err(NebError::MissingData {
                        image: job.index,
                        iteration,
                    });
                }
            };
            match result {
                Ok(CalcResult { energy, gradient }) => {
                    log::info!(
                        "iteration {iteration} image {:2} energy {energy:.10}",
                        job.index
                    );
                    image.energy = Some(energy);
                    image.gradient = Some(gradient);
                }
                Err(error) => {
                    let carried =
                        image.energy.is_some() && image.gradient.is_some();
                    if self.on_failure == OnFailure::Quarantine && carried {
                        log::warn!(
                            "image {} failed on iteration {iteration}, \
                             keeping its previous energy: {error}",
                            job.index
                        );
                    } else {
                        return Err(NebError::Calculator {
                            image: job.index,
                            iteration,
                            error,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

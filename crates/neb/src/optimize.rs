//! The optimization loop.

use std::{fmt::Display, io::Write};

use nalgebra::DVector;
use pes::Calculator;
use serde::Serialize;

use crate::{
    NebError,
    chain::Chain,
    config::Config,
    force::{Site, Springs, endpoint},
    integrator::Step,
    scheduler::Scheduler,
    snapshot::Snapshot,
    tangent::tangent,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Converged,
    /// the iteration budget ran out first
    Exhausted,
}

/// How a run ended. `max_force` is the convergence measure after the last
/// iteration.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Outcome {
    pub status: Status,
    pub iterations: usize,
    pub max_force: f64,
}

impl Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Status::Converged => write!(
                f,
                "converged after {} iterations, max force = {:.8}",
                self.iterations, self.max_force
            ),
            Status::Exhausted => write!(
                f,
                "failed to converge in {} iterations, max force = {:.8}",
                self.iterations, self.max_force
            ),
        }
    }
}

/// A nudged elastic band run over `chain`, with energies and gradients from
/// the calculator in `scheduler`.
pub struct Neb<C> {
    chain: Chain,
    scheduler: Scheduler<C>,
    springs: Springs,
    tolerance: f64,
    nsteps: usize,
    optimize_endpoints: bool,
    print_every: usize,
    snapshot: Option<Snapshot>,
}

impl<C: Calculator> Neb<C> {
    pub fn new(
        chain: Chain,
        scheduler: Scheduler<C>,
        springs: Springs,
        tolerance: f64,
    ) -> Self {
        Self {
            chain,
            scheduler,
            springs,
            tolerance,
            nsteps: 1000,
            optimize_endpoints: false,
            print_every: 1,
            snapshot: None,
        }
    }

    /// build a run from the options in `config`, evaluating images with
    /// `calculator`
    pub fn from_config(config: &Config, chain: Chain, calculator: C) -> Self {
        let scheduler = Scheduler::new(
            calculator,
            config.scratch(),
            config.resources(),
            config.parallel_images,
        )
        .on_failure(config.on_failure);
        Self::new(chain, scheduler, config.springs(), config.tolerance)
            .nsteps(config.nsteps)
            .optimize_endpoints(config.optimize_endpoints)
            .print_every(config.print_every)
    }

    pub fn nsteps(mut self, nsteps: usize) -> Self {
        self.nsteps = nsteps;
        self
    }

    pub fn optimize_endpoints(mut self, optimize: bool) -> Self {
        self.optimize_endpoints = optimize;
        self
    }

    pub fn print_every(mut self, n: usize) -> Self {
        self.print_every = n.max(1);
        self
    }

    /// write a snapshot of the chain every `print_every` iterations
    pub fn snapshot(mut self, snapshot: Snapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn scheduler(&self) -> &Scheduler<C> {
        &self.scheduler
    }

    pub fn into_chain(self) -> Chain {
        self.chain
    }

    fn is_pinned(&self, i: usize) -> bool {
        !self.optimize_endpoints && self.chain.is_endpoint(i)
    }

    /// the images whose effective force is still above the tolerance, or has
    /// never been computed
    pub fn pending(&self) -> Vec<usize> {
        self.chain
            .images()
            .iter()
            .enumerate()
            .filter(|(_, im)| im.force_norm() > self.tolerance)
            .map(|(i, _)| i)
            .collect()
    }

    /// per-image effective force norms that count toward convergence
    fn counted_norms(&self) -> impl Iterator<Item = f64> + '_ {
        self.chain
            .images()
            .iter()
            .enumerate()
            .filter(|&(i, _)| {
                self.optimize_endpoints || !self.chain.is_endpoint(i)
            })
            .map(|(_, im)| im.force_norm())
    }

    pub fn max_force(&self) -> f64 {
        self.counted_norms().fold(0.0, f64::max)
    }

    fn mean_force(&self) -> f64 {
        let (sum, n) = self
            .counted_norms()
            .fold((0.0, 0), |(s, n), f| (s + f, n + 1));
        if n == 0 { 0.0 } else { sum / n as f64 }
    }

    /// Recompute the tangents and effective forces of the images in
    /// `active`. Every other image keeps the values from its last update.
    fn update_forces(
        &mut self,
        active: &[usize],
        iteration: usize,
    ) -> Result<(), NebError> {
        let images = self.chain.images();
        let energies = self.chain.energies();
        let forces: Vec<Option<DVector<f64>>> =
            images.iter().map(|im| im.force()).collect();
        let site = |j: usize| {
            Some(Site {
                r: &images[j].coords,
                energy: energies[j]?,
                force: forces[j].as_ref()?,
                state: images[j].state,
            })
        };

        let mut updates = Vec::with_capacity(active.len());
        for &i in active {
            if self.chain.is_endpoint(i) {
                let Some(f) = &forces[i] else {
                    return Err(NebError::MissingData {
                        image: i,
                        iteration,
                    });
                };
                updates.push((i, None, endpoint(f, self.optimize_endpoints)));
                continue;
            }
            let (Some(prev), Some(cur), Some(next)) =
                (site(i - 1), site(i), site(i + 1))
            else {
                let j = (i - 1..=i + 1).find(|&j| site(j).is_none());
                return Err(NebError::MissingData {
                    image: j.unwrap_or(i),
                    iteration,
                });
            };
            let tau = tangent(
                [prev.energy, cur.energy, next.energy],
                [prev.r, cur.r, next.r],
            )
            .ok_or(NebError::ZeroTangent {
                image: i,
                iteration,
            })?;
            let f = self.springs.effective(&prev, &cur, &next, &tau);
            updates.push((i, Some(tau), f));
        }

        for (i, tau, f) in updates {
            let image = &mut self.chain[i];
            if tau.is_some() {
                image.tangent = tau;
            }
            image.effective_force = Some(f);
        }
        Ok(())
    }

    /// move every active, unpinned image that is still above the tolerance
    fn step(&mut self, active: &[usize]) {
        for &i in active {
            if self.is_pinned(i) {
                continue;
            }
            let tolerance = self.tolerance;
            let image = &mut self.chain[i];
            let Some(f) = &image.effective_force else {
                continue;
            };
            if f.norm() <= tolerance {
                continue;
            }
            let dr = image.stepper.step(&image.coords, f);
            image.coords += dr;
        }
    }

    /// Evaluate, update and step the images that need work on this
    /// iteration: all of them on iteration 0, then only the pending ones.
    /// Returns the indices that were evaluated.
    pub(crate) fn iterate(
        &mut self,
        iteration: usize,
    ) -> Result<Vec<usize>, NebError> {
        let active = if iteration == 0 {
            (0..self.chain.len()).collect()
        } else {
            self.pending()
        };
        self.scheduler.evaluate(&mut self.chain, &active, iteration)?;
        self.update_forces(&active, iteration)?;
        self.step(&active);

        if let Some(snapshot) = &self.snapshot
            && iteration % self.print_every == 0
        {
            snapshot.write(&self.chain, iteration)?;
        }
        Ok(active)
    }

    /// Run until every counted image's effective force is below the
    /// tolerance or `nsteps` iterations have passed. A table of the
    /// convergence measures is written to `w` as the run progresses.
    pub fn run<W: Write>(&mut self, w: &mut W) -> Result<Outcome, NebError> {
        writeln!(
            w,
            "{:>5} {:>14} {:>14} {:>6}",
            "Iter", "Max Force", "Mean Force", "Active"
        )?;
        let mut max_force = f64::INFINITY;
        for iteration in 0..self.nsteps {
            let active = self.iterate(iteration)?;
            max_force = self.max_force();
            let mean = self.mean_force();
            writeln!(
                w,
                "{iteration:5} {max_force:14.8} {mean:14.8} {:6}",
                active.len()
            )?;
            log::info!(
                "iteration {iteration}: max force = {max_force:.8}, \
                 mean force = {mean:.8}"
            );

            if max_force < self.tolerance {
                return Ok(Outcome {
                    status: Status::Converged,
                    iterations: iteration + 1,
                    max_force,
                });
            }
        }
        log::warn!(
            "failed to find the minimum energy path in {} iterations, max \
             force = {max_force:.8} > tolerance = {}",
            self.nsteps,
            self.tolerance
        );
        Ok(Outcome {
            status: Status::Exhausted,
            iterations: self.nsteps,
            max_force,
        })
    }
}

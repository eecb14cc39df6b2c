//! Taylor bird-swarm search over the flattened parameters of a [`LayerStack`].
//!
//! Each bird is one full parameter vector. Per generation every bird is scored,
//! the global best is updated, then each bird either forages (Taylor-series
//! extrapolation from its last three positions), flies (Gaussian random walk)
//! or keeps vigilance (moves toward the global best and away from a random
//! flock mate's offset). No gradients are involved.

use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis, Zip};
use ndarray_rand::rand_distr::{StandardNormal, Uniform};
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::config::OptimizerConfig;
use crate::dataset::DataSource;
use crate::error::{invalid_config, Result, SwarmTuneError};
use crate::loss::LossFunction;
use crate::params::ParameterVector;
use crate::stack::LayerStack;

/// Taylor coefficients for positions t, t-1, t-2, t-3.
const TAYLOR_COEFFS: [f64; 4] = [0.5, 1.3591, -1.359, 0.6795];
const HISTORY_DEPTH: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Behaviour {
    Foraging,
    Flight,
    Vigilance,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BehaviourCounts {
    pub foraging: usize,
    pub flight: usize,
    pub vigilance: usize,
}

impl BehaviourCounts {
    fn record(&mut self, b: Behaviour) {
        match b {
            Behaviour::Foraging => self.foraging += 1,
            Behaviour::Flight => self.flight += 1,
            Behaviour::Vigilance => self.vigilance += 1,
        }
    }
}

pub struct PopulationSearchOptimizer {
    cfg: OptimizerConfig,
    stack: LayerStack,
    /// pop_size × Θ
    population: Array2<f64>,
    /// Slot 0 holds t-1, slot 1 t-2, slot 2 t-3.
    history: Array3<f64>,
    fitness: Array1<f64>,
    best_solution: ParameterVector,
    best_fitness: f64,
    generation: usize,
    last_moves: BehaviourCounts,
    rng: StdRng,
}

impl PopulationSearchOptimizer {
    /// Seed the flock around the stack's current parameters; the RNG comes from `cfg.seed`.
    pub fn new(stack: LayerStack, cfg: OptimizerConfig) -> Result<Self> {
        let rng = StdRng::seed_from_u64(cfg.seed);
        Self::with_rng(stack, cfg, rng)
    }

    pub fn with_rng(stack: LayerStack, cfg: OptimizerConfig, mut rng: StdRng) -> Result<Self> {
        cfg.validate()?;
        let theta = stack.num_params();
        if theta == 0 { return Err(invalid_config("stack has no parameters to optimise")); }
        let initial = stack.flatten();
        let spread = Uniform::new_inclusive(-cfg.perturbation_range, cfg.perturbation_range);
        let population = Array2::random_using((cfg.population_size, theta), spread, &mut rng) + &initial;
        let history = stack_history(population.view());
        debug!(population = cfg.population_size, theta, "swarm initialised");
        Ok(Self {
            fitness: Array1::from_elem(cfg.population_size, f64::INFINITY),
            best_solution: initial,
            best_fitness: f64::INFINITY,
            generation: 0,
            last_moves: BehaviourCounts::default(),
            cfg,
            stack,
            population,
            history,
            rng,
        })
    }

    /// Run one generation and return the best fitness seen so far.
    #[instrument(skip_all, fields(generation = self.generation + 1))]
    pub fn step(&mut self, data: &dyn DataSource, loss: &dyn LossFunction) -> Result<f64> {
        if data.num_batches() == 0 { return Err(SwarmTuneError::EmptyDataSource); }
        for batch in data.batches() { self.stack.ensure_input_dim(batch.features.ncols())?; }

        let scores = self.evaluate_population(data, loss)?;
        for (i, &f) in scores.iter().enumerate() {
            if f < self.best_fitness {
                self.best_fitness = f;
                self.best_solution = self.population.row(i).to_owned();
            }
        }
        self.fitness = Array1::from(scores);

        let next = self.propose_positions();
        self.shift_history();
        self.population = next;
        self.stack.unflatten(self.best_solution.view())?;
        self.generation += 1;

        let finite: Vec<f64> = self.fitness.iter().copied().filter(|f| f.is_finite()).collect();
        let mean_fitness = if finite.is_empty() { f64::NAN } else { finite.iter().sum::<f64>() / finite.len() as f64 };
        info!(
            generation = self.generation,
            best_fitness = self.best_fitness,
            mean_fitness,
            foraging = self.last_moves.foraging,
            flight = self.last_moves.flight,
            vigilance = self.last_moves.vigilance,
            "swarm generation"
        );
        Ok(self.best_fitness)
    }

    /// Repeated [`step`](Self::step); returns the best-fitness curve.
    pub fn run(&mut self, data: &dyn DataSource, loss: &dyn LossFunction, generations: usize) -> Result<Vec<f64>> {
        (0..generations).map(|_| self.step(data, loss)).collect()
    }

    fn evaluate_population(&mut self, data: &dyn DataSource, loss: &dyn LossFunction) -> Result<Vec<f64>> {
        if self.cfg.parallel_evaluation {
            let stack = &self.stack;
            let population = &self.population;
            // each worker scores on its own clone; results come back in candidate order
            (0..population.nrows())
                .into_par_iter()
                .map_init(|| stack.clone(), |local, i| score_candidate(local, population.row(i), data, loss))
                .collect()
        } else {
            let Self { stack, population, .. } = self;
            population.rows().into_iter().map(|row| score_candidate(stack, row, data, loss)).collect()
        }
    }

    fn propose_positions(&mut self) -> Array2<f64> {
        let pop = self.population.nrows();
        let mut next = self.population.clone();
        let mut moves = BehaviourCounts::default();
        let (t1, t2, t3) = (
            self.history.index_axis(Axis(0), 0),
            self.history.index_axis(Axis(0), 1),
            self.history.index_axis(Axis(0), 2),
        );

        for i in 0..pop {
            let pos = self.population.row(i);
            let mut out = next.row_mut(i);
            let behaviour = if self.rng.gen::<f64>() < self.cfg.prob_foraging {
                Behaviour::Foraging
            } else if self.rng.gen::<f64>() < self.cfg.prob_flight {
                Behaviour::Flight
            } else {
                Behaviour::Vigilance
            };
            match behaviour {
                Behaviour::Foraging => {
                    let [c0, c1, c2, c3] = TAYLOR_COEFFS;
                    Zip::from(&mut out)
                        .and(&pos)
                        .and(&t1.row(i))
                        .and(&t2.row(i))
                        .and(&t3.row(i))
                        .for_each(|o, &p, &a, &b, &c| *o = c0 * p + c1 * a + c2 * b + c3 * c);
                }
                Behaviour::Flight => {
                    for (o, &p) in out.iter_mut().zip(pos.iter()) {
                        let jump: f64 = self.rng.sample(StandardNormal);
                        *o = p + jump;
                    }
                }
                Behaviour::Vigilance => {
                    let mut k = self.rng.gen_range(0..pop - 1);
                    if k >= i { k += 1; }
                    let other = self.population.row(k);
                    for ((o, &p), (&b, &q)) in out.iter_mut().zip(pos.iter()).zip(self.best_solution.iter().zip(other.iter())) {
                        let r1: f64 = self.rng.gen();
                        let r2: f64 = self.rng.gen();
                        *o = p + r1 * (b - p) + r2 * (b - q);
                    }
                }
            }
            if let Some((lo, hi)) = self.cfg.position_bounds {
                out.mapv_inplace(|x| x.clamp(lo, hi));
            }
            moves.record(behaviour);
        }
        self.last_moves = moves;
        next
    }

    fn shift_history(&mut self) {
        for slot in (1..HISTORY_DEPTH).rev() {
            let newer = self.history.index_axis(Axis(0), slot - 1).to_owned();
            self.history.index_axis_mut(Axis(0), slot).assign(&newer);
        }
        self.history.index_axis_mut(Axis(0), 0).assign(&self.population);
    }

    pub fn config(&self) -> &OptimizerConfig { &self.cfg }
    pub fn stack(&self) -> &LayerStack { &self.stack }
    /// Hand the stack back; it holds the best solution once any step has run.
    pub fn into_stack(self) -> LayerStack { self.stack }
    pub fn population(&self) -> ArrayView2<'_, f64> { self.population.view() }
    /// Shape (3, pop_size, Θ), most recent generation first.
    pub fn history(&self) -> ArrayView3<'_, f64> { self.history.view() }
    /// Fitness of each bird in the last evaluated generation.
    pub fn fitness(&self) -> ArrayView1<'_, f64> { self.fitness.view() }
    pub fn best_solution(&self) -> ArrayView1<'_, f64> { self.best_solution.view() }
    pub fn best_fitness(&self) -> f64 { self.best_fitness }
    pub fn generation(&self) -> usize { self.generation }
    pub fn last_moves(&self) -> BehaviourCounts { self.last_moves }
}

fn stack_history(population: ArrayView2<'_, f64>) -> Array3<f64> {
    let (pop, theta) = population.dim();
    Array3::from_shape_fn((HISTORY_DEPTH, pop, theta), |(_, i, j)| population[[i, j]])
}

/// Load `candidate` into `stack` and average the loss over every batch.
fn score_candidate(stack: &mut LayerStack, candidate: ArrayView1<'_, f64>, data: &dyn DataSource, loss: &dyn LossFunction) -> Result<f64> {
    stack.unflatten(candidate)?;
    let mut total = 0.0;
    for batch in data.batches() {
        let logits = stack.forward(batch.features.view())?;
        total += loss.loss(logits.view(), &batch.labels);
    }
    Ok(total / data.num_batches() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Dataset, InMemoryDataSource};
    use crate::loss::CrossEntropyLoss;

    fn fixture(seed: u64) -> (LayerStack, InMemoryDataSource) {
        let mut rng = StdRng::seed_from_u64(seed);
        let stack = LayerStack::new(4, &[3], 2, 1, &mut rng).unwrap();
        let x = Array2::from_shape_fn((16, 4), |(i, j)| if (i < 8) == (j < 2) { 1.0 } else { 0.0 });
        let labels = (0..16).map(|i| usize::from(i >= 8)).collect();
        let data = InMemoryDataSource::new(&Dataset::new(x, labels).unwrap(), 4).unwrap();
        (stack, data)
    }

    fn cfg() -> OptimizerConfig { OptimizerConfig { population_size: 6, seed: 11, ..Default::default() } }

    #[test]
    fn best_fitness_never_increases() {
        let (stack, data) = fixture(1);
        let mut opt = PopulationSearchOptimizer::new(stack, cfg()).unwrap();
        let mut prev = f64::INFINITY;
        for _ in 0..8 {
            let best = opt.step(&data, &CrossEntropyLoss).unwrap();
            assert!(best <= prev);
            assert!(best.is_finite());
            prev = best;
        }
        assert_eq!(opt.generation(), 8);
    }

    #[test]
    fn stack_holds_best_after_step() {
        let (stack, data) = fixture(2);
        let mut opt = PopulationSearchOptimizer::new(stack, cfg()).unwrap();
        opt.step(&data, &CrossEntropyLoss).unwrap();
        assert_eq!(opt.stack().flatten().view(), opt.best_solution());
        let min = opt.fitness().iter().cloned().fold(f64::INFINITY, f64::min);
        assert_eq!(opt.best_fitness(), min);
    }

    #[test]
    fn history_oldest_slot_lags_three_generations() {
        let (stack, data) = fixture(3);
        let mut opt = PopulationSearchOptimizer::new(stack, cfg()).unwrap();
        let mut snapshots = vec![opt.population().to_owned()];
        for _ in 0..4 {
            opt.step(&data, &CrossEntropyLoss).unwrap();
            snapshots.push(opt.population().to_owned());
        }
        let theta = opt.stack().num_params();
        assert_eq!(opt.history().dim(), (3, 6, theta));
        // after 4 steps: slot 0 = P3, slot 1 = P2, slot 2 = P1
        assert_eq!(opt.history().index_axis(Axis(0), 2), snapshots[1]);
        assert_eq!(opt.history().index_axis(Axis(0), 0), snapshots[3]);
    }

    #[test]
    fn foraging_applies_taylor_coefficients() {
        let (stack, data) = fixture(4);
        let mut opt = PopulationSearchOptimizer::new(stack, OptimizerConfig { prob_foraging: 1.0, ..cfg() }).unwrap();
        let p0 = opt.population().to_owned();
        opt.step(&data, &CrossEntropyLoss).unwrap();
        // history starts as three copies of p0, so the first update is a pure rescale
        let scale: f64 = TAYLOR_COEFFS.iter().sum();
        for (&new, &old) in opt.population().iter().zip(p0.iter()) {
            assert!((new - scale * old).abs() < 1e-12);
        }
        assert_eq!(opt.last_moves().foraging, 6);
    }

    #[test]
    fn vigilance_is_stationary_when_flock_sits_on_best() {
        let (stack, data) = fixture(5);
        let start = stack.flatten();
        let cfg = OptimizerConfig { prob_foraging: 0.0, prob_flight: 0.0, perturbation_range: 0.0, ..cfg() };
        let mut opt = PopulationSearchOptimizer::new(stack, cfg).unwrap();
        opt.step(&data, &CrossEntropyLoss).unwrap();
        assert_eq!(opt.last_moves().vigilance, 6);
        for row in opt.population().rows() {
            assert_eq!(row, start.view());
        }
    }

    #[test]
    fn flight_is_unbounded_unless_bounds_given() {
        let (stack, data) = fixture(6);
        let free = OptimizerConfig { prob_foraging: 0.0, prob_flight: 1.0, perturbation_range: 0.01, ..cfg() };
        let mut opt = PopulationSearchOptimizer::new(stack.clone(), free.clone()).unwrap();
        let start = stack.flatten();
        for _ in 0..3 { opt.step(&data, &CrossEntropyLoss).unwrap(); }
        let max_drift = opt.population().rows().into_iter()
            .flat_map(|r| r.iter().zip(start.iter()).map(|(a, b)| (a - b).abs()).collect::<Vec<_>>())
            .fold(0.0, f64::max);
        assert!(max_drift > free.perturbation_range, "positions stayed inside the seeding range");

        let bounded = OptimizerConfig { position_bounds: Some((-0.1, 0.1)), ..free };
        let mut opt = PopulationSearchOptimizer::new(stack, bounded).unwrap();
        for _ in 0..3 { opt.step(&data, &CrossEntropyLoss).unwrap(); }
        assert!(opt.population().iter().all(|&x| (-0.1..=0.1).contains(&x)));
    }

    #[test]
    fn parallel_and_sequential_agree() {
        let (stack, data) = fixture(7);
        let mut seq = PopulationSearchOptimizer::new(stack.clone(), cfg()).unwrap();
        let mut par = PopulationSearchOptimizer::new(stack, OptimizerConfig { parallel_evaluation: true, ..cfg() }).unwrap();
        for _ in 0..4 {
            let a = seq.step(&data, &CrossEntropyLoss).unwrap();
            let b = par.step(&data, &CrossEntropyLoss).unwrap();
            assert_eq!(a, b);
        }
        assert_eq!(seq.best_solution(), par.best_solution());
    }

    #[test]
    fn empty_source_is_an_error() {
        let (stack, _) = fixture(8);
        let empty = InMemoryDataSource::new(&Dataset::new(Array2::zeros((0, 4)), vec![]).unwrap(), 4).unwrap();
        let mut opt = PopulationSearchOptimizer::new(stack, cfg()).unwrap();
        assert!(matches!(opt.step(&empty, &CrossEntropyLoss), Err(SwarmTuneError::EmptyDataSource)));
    }

    #[test]
    fn rejects_invalid_swarm_settings() {
        let (stack, _) = fixture(9);
        let bad = OptimizerConfig { prob_flight: 1.5, ..cfg() };
        assert!(matches!(PopulationSearchOptimizer::new(stack.clone(), bad), Err(SwarmTuneError::InvalidParameter(_))));
        let lonely = OptimizerConfig { population_size: 1, ..cfg() };
        assert!(matches!(PopulationSearchOptimizer::new(stack, lonely), Err(SwarmTuneError::InvalidParameter(_))));
    }
}

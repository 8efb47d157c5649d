use crate::{CalibrationError, CalibrationObserver, CalibrationResult, CancellationToken, Progress};
use float_ord::FloatOrd;
use itertools::Itertools;
use log::*;
use rand::{seq::index::sample, SeedableRng};
use rand_pcg::Pcg64;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Instant;

/// `n` choose `k`, saturating at `usize::MAX`.
///
/// ```
/// assert_eq!(mocap_calib::binomial(6, 4), 15);
/// assert_eq!(mocap_calib::binomial(3, 5), 0);
/// ```
pub fn binomial(n: usize, k: usize) -> usize {
    if k > n {
        return 0;
    }
    let k = k.min(n - k);
    let mut result: usize = 1;
    for i in 0..k {
        // `C(n, i) * (n - i) == C(n, i + 1) * (i + 1)`
        result = match result.checked_mul(n - i) {
            Some(product) => product / (i + 1),
            None => return usize::MAX,
        };
    }
    result
}

/// Parameters of the robust clustering strategy.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Samples per combination, `R`. Must be at least 3.
    pub subset_size: usize,
    /// Combinations to keep and average, `K`.
    pub retained: usize,
    /// How many combinations to solve at least. Defaults to `retained`.
    pub candidates: Option<usize>,
    /// Seed of the generator drawing random combinations.
    pub seed: u64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            subset_size: 4,
            retained: 10,
            candidates: None,
            seed: 0,
        }
    }
}

impl ClusteringConfig {
    /// Same as calling [`Default::default`].
    pub fn new() -> Self {
        Default::default()
    }

    #[must_use]
    pub fn subset_size(self, subset_size: usize) -> Self {
        Self {
            subset_size,
            ..self
        }
    }

    #[must_use]
    pub fn retained(self, retained: usize) -> Self {
        Self { retained, ..self }
    }

    #[must_use]
    pub fn candidates(self, candidates: usize) -> Self {
        Self {
            candidates: Some(candidates),
            ..self
        }
    }

    #[must_use]
    pub fn seed(self, seed: u64) -> Self {
        Self { seed, ..self }
    }
}

/// A subset of the samples and the calibration computed from exactly those samples.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationCombination {
    /// Sorted sample indices.
    pub indices: Vec<usize>,
    pub result: CalibrationResult,
    /// Position in the evaluation sequence, which breaks ties in RMS.
    pub order: usize,
}

impl CalibrationCombination {
    pub fn rms(&self) -> f64 {
        self.result.rms
    }

    fn rank(&self) -> (FloatOrd<f64>, usize) {
        (FloatOrd(self.rms()), self.order)
    }
}

/// The lowest-RMS combinations seen so far, best first.
#[derive(Clone, Debug, Default)]
pub struct BestCombinations {
    capacity: usize,
    combinations: Vec<CalibrationCombination>,
}

impl BestCombinations {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            combinations: Vec::with_capacity(capacity + 1),
        }
    }

    /// Offers a combination, returning whether it was retained. Non-finite RMS values rank
    /// after every finite one.
    pub fn offer(&mut self, combination: CalibrationCombination) -> bool {
        let rank = combination.rank();
        let position = self
            .combinations
            .partition_point(|retained| retained.rank() < rank);
        if position >= self.capacity {
            return false;
        }
        self.combinations.insert(position, combination);
        self.combinations.truncate(self.capacity);
        true
    }

    pub fn len(&self) -> usize {
        self.combinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.combinations.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.combinations.len() >= self.capacity
    }

    pub fn as_slice(&self) -> &[CalibrationCombination] {
        &self.combinations
    }

    pub fn into_vec(self) -> Vec<CalibrationCombination> {
        self.combinations
    }
}

/// Draws sample subsets, solves them and keeps the best.
///
/// Combinations are enumerated in lexicographic order when the search covers all `C(N, R)` of
/// them and drawn at random without repetition otherwise. The search stops once it has solved
/// its candidate budget and retained `K` combinations, or when it runs out of combinations.
#[derive(Clone, Debug)]
pub struct CombinationSearch {
    samples: usize,
    subset_size: usize,
    retained: usize,
    budget: usize,
    total: usize,
    seed: u64,
}

impl CombinationSearch {
    /// Validates `config` against the number of samples, clamping `K` and the candidate budget
    /// to `C(N, R)`.
    pub fn new(samples: usize, config: &ClusteringConfig) -> Result<Self, CalibrationError> {
        let r = config.subset_size;
        if r < 3 {
            return Err(CalibrationError::InvalidInput(format!(
                "combinations need at least 3 samples, got a subset size of {}",
                r
            )));
        }
        if r > samples {
            return Err(CalibrationError::InvalidInput(format!(
                "subset size {} exceeds the {} available samples",
                r, samples
            )));
        }
        let total = binomial(samples, r);
        let mut retained = config.retained;
        if retained < 1 {
            warn!("retaining at least one combination instead of {}", retained);
            retained = 1;
        }
        if retained > total {
            warn!(
                "only {} combinations of {} out of {} samples exist, retaining {} instead of {}",
                total, r, samples, total, retained
            );
            retained = total;
        }
        let budget = config.candidates.unwrap_or(retained).clamp(retained, total);
        Ok(Self {
            samples,
            subset_size: r,
            retained,
            budget,
            total,
            seed: config.seed,
        })
    }

    /// `K` after clamping.
    pub fn retained(&self) -> usize {
        self.retained
    }

    /// The number of combinations solved at least, after clamping.
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// `C(N, R)`.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn is_exhaustive(&self) -> bool {
        self.budget == self.total
    }

    /// Runs the search, returning the retained combinations best first.
    ///
    /// `solve` is called with the sorted sample indices of every combination. Combinations that
    /// fail count as evaluated but are never retained. The run fails when fewer than `K`
    /// combinations are retained or when a retained combination has a non-finite RMS.
    pub fn run<S, O>(
        &self,
        mut solve: S,
        observer: &mut O,
        cancel: &CancellationToken,
    ) -> Result<Vec<CalibrationCombination>, CalibrationError>
    where
        S: FnMut(&[usize]) -> Result<CalibrationResult, CalibrationError>,
        O: CalibrationObserver + ?Sized,
    {
        let start = Instant::now();
        let mut best = BestCombinations::new(self.retained);
        let mut evaluated = 0;
        let mut candidates = self.candidates();
        while evaluated < self.budget || !best.is_full() {
            if cancel.is_cancelled() {
                info!("combination search cancelled after {} combinations", evaluated);
                return Err(CalibrationError::Cancelled);
            }
            let indices = match candidates.next() {
                Some(indices) => indices,
                None => break,
            };
            let order = evaluated;
            evaluated += 1;
            match solve(&indices) {
                Ok(result) => {
                    let combination = CalibrationCombination {
                        indices,
                        result,
                        order,
                    };
                    debug!(
                        "combination {} {:?} has rms {:.4}",
                        order,
                        combination.indices,
                        combination.rms()
                    );
                    observer.on_combination(&combination);
                    best.offer(combination);
                }
                Err(error) => debug!("combination {} {:?} failed: {}", order, indices, error),
            }
            let fraction = (best.len() as f64 / self.retained as f64)
                .min(evaluated as f64 / self.budget as f64);
            observer.on_progress(&Progress::new(
                evaluated,
                best.len(),
                fraction,
                start.elapsed(),
            ));
        }
        info!(
            "evaluated {} of {} combinations, retained {}",
            evaluated,
            self.total,
            best.len()
        );
        if best.is_empty() {
            return Err(CalibrationError::Failed(format!(
                "none of {} combinations produced a result",
                evaluated
            )));
        }
        if !best.is_full() {
            return Err(CalibrationError::Failed(format!(
                "only {} of {} combinations produced a result",
                best.len(),
                self.retained
            )));
        }
        if let Some(broken) = best.as_slice().iter().find(|c| !c.rms().is_finite()) {
            return Err(CalibrationError::Failed(format!(
                "combination {:?} has rms {}",
                broken.indices,
                broken.rms()
            )));
        }
        Ok(best.into_vec())
    }

    fn candidates(&self) -> Box<dyn Iterator<Item = Vec<usize>>> {
        if self.is_exhaustive() {
            Box::new((0..self.samples).combinations(self.subset_size))
        } else {
            Box::new(RandomCombinations {
                rng: Pcg64::seed_from_u64(self.seed),
                samples: self.samples,
                subset_size: self.subset_size,
                total: self.total,
                tried: HashSet::new(),
            })
        }
    }
}

/// Distinct random combinations until all of them have been drawn.
struct RandomCombinations {
    rng: Pcg64,
    samples: usize,
    subset_size: usize,
    total: usize,
    tried: HashSet<Vec<usize>>,
}

impl Iterator for RandomCombinations {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        if self.tried.len() >= self.total {
            return None;
        }
        loop {
            let mut indices = sample(&mut self.rng, self.samples, self.subset_size).into_vec();
            indices.sort_unstable();
            if self.tried.insert(indices.clone()) {
                return Some(indices);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::NoProgress;

    fn result(rms: f64) -> CalibrationResult {
        CalibrationResult {
            cameras: vec![],
            extrinsics: None,
            rms,
        }
    }

    /// An RMS that depends only on the indices.
    fn fake_rms(indices: &[usize]) -> f64 {
        indices
            .iter()
            .map(|&i| ((i * 7 + 3) % 11) as f64)
            .sum::<f64>()
    }

    #[test]
    fn binomials() {
        assert_eq!(binomial(5, 3), 10);
        assert_eq!(binomial(5, 0), 1);
        assert_eq!(binomial(5, 5), 1);
        assert_eq!(binomial(40, 20), 137_846_528_820);
        assert_eq!(binomial(10_000, 5_000), usize::MAX);
    }

    #[test]
    fn validates_configuration() {
        let config = ClusteringConfig::new().subset_size(2);
        assert!(matches!(
            CombinationSearch::new(6, &config),
            Err(CalibrationError::InvalidInput(_))
        ));
        let config = ClusteringConfig::new().subset_size(7);
        assert!(matches!(
            CombinationSearch::new(6, &config),
            Err(CalibrationError::InvalidInput(_))
        ));

        let config = ClusteringConfig::new().subset_size(3).retained(50);
        let search = CombinationSearch::new(5, &config).unwrap();
        assert_eq!(search.retained(), 10);
        assert!(search.is_exhaustive());

        let config = ClusteringConfig::new().retained(0).candidates(3);
        let search = CombinationSearch::new(6, &config).unwrap();
        assert_eq!((search.retained(), search.budget()), (1, 3));
    }

    #[test]
    fn exhaustive_search_matches_brute_force() {
        let config = ClusteringConfig::new().subset_size(3).retained(10);
        let search = CombinationSearch::new(5, &config).unwrap();
        let mut seen = 0;
        let mut observer = |_: &Progress| seen += 1;
        let retained = search
            .run(
                |indices| Ok(result(fake_rms(indices))),
                &mut observer,
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(seen, 10);

        let mut brute: Vec<(FloatOrd<f64>, usize, Vec<usize>)> = (0..5)
            .combinations(3)
            .enumerate()
            .map(|(order, c)| (FloatOrd(fake_rms(&c)), order, c))
            .collect();
        brute.sort();
        let expected: Vec<Vec<usize>> = brute.into_iter().map(|(_, _, c)| c).collect();
        let found: Vec<Vec<usize>> = retained.into_iter().map(|c| c.indices).collect();
        assert_eq!(found, expected);
    }

    #[test]
    fn keeps_lowest_of_a_larger_budget() {
        let config = ClusteringConfig::new()
            .subset_size(4)
            .retained(3)
            .candidates(9)
            .seed(17);
        let search = CombinationSearch::new(6, &config).unwrap();
        let mut evaluated = vec![];
        let retained = search
            .run(
                |indices| {
                    evaluated.push(indices.to_vec());
                    Ok(result(fake_rms(indices)))
                },
                &mut NoProgress,
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(evaluated.len(), 9);
        assert_eq!(evaluated.iter().unique().count(), 9);

        let mut ranked: Vec<(FloatOrd<f64>, usize)> = evaluated
            .iter()
            .enumerate()
            .map(|(order, c)| (FloatOrd(fake_rms(c)), order))
            .collect();
        ranked.sort();
        let expected: Vec<usize> = ranked.iter().take(3).map(|&(_, order)| order).collect();
        let found: Vec<usize> = retained.iter().map(|c| c.order).collect();
        assert_eq!(found, expected);
    }

    #[test]
    fn failures_are_never_retained() {
        let config = ClusteringConfig::new().subset_size(3).retained(2).seed(3);
        let search = CombinationSearch::new(6, &config).unwrap();
        let mut calls = 0;
        let retained = search
            .run(
                |indices| {
                    calls += 1;
                    if indices.contains(&0) {
                        Err(CalibrationError::Degenerate("test"))
                    } else {
                        Ok(result(1.0))
                    }
                },
                &mut NoProgress,
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(retained.len(), 2);
        assert!(calls >= 2);
        assert!(retained.iter().all(|c| !c.indices.contains(&0)));

        // Only C(5, 3) = 10 of the 20 combinations succeed.
        let config = ClusteringConfig::new().subset_size(3).retained(12);
        let search = CombinationSearch::new(6, &config).unwrap();
        let short = search.run(
            |indices| {
                if indices.contains(&0) {
                    Err(CalibrationError::Degenerate("test"))
                } else {
                    Ok(result(1.0))
                }
            },
            &mut NoProgress,
            &CancellationToken::new(),
        );
        assert!(matches!(short, Err(CalibrationError::Failed(_))));

        let all_fail = search.run(
            |_| Err(CalibrationError::Degenerate("test")),
            &mut NoProgress,
            &CancellationToken::new(),
        );
        assert!(matches!(all_fail, Err(CalibrationError::Failed(_))));
    }

    #[test]
    fn infinite_rms_in_the_best_fails_the_run() {
        let infinite_first =
            |indices: &[usize]| -> Result<CalibrationResult, CalibrationError> {
                if indices == [0, 1, 2] {
                    Ok(result(f64::INFINITY))
                } else {
                    Ok(result(fake_rms(indices)))
                }
            };

        let config = ClusteringConfig::new().subset_size(3).retained(10);
        let search = CombinationSearch::new(5, &config).unwrap();
        assert!(search.is_exhaustive());
        let outcome = search.run(infinite_first, &mut NoProgress, &CancellationToken::new());
        assert!(matches!(outcome, Err(CalibrationError::Failed(_))));

        // With a smaller K the infinite combination is ranked out of the best.
        let config = ClusteringConfig::new()
            .subset_size(3)
            .retained(4)
            .candidates(10);
        let search = CombinationSearch::new(5, &config).unwrap();
        let retained = search
            .run(infinite_first, &mut NoProgress, &CancellationToken::new())
            .unwrap();
        assert_eq!(retained.len(), 4);
        assert!(retained.iter().all(|c| c.rms().is_finite()));
    }

    #[test]
    fn cancellation_stops_the_search() {
        let config = ClusteringConfig::new().subset_size(3).retained(10);
        let search = CombinationSearch::new(5, &config).unwrap();
        let cancel = CancellationToken::new();
        let mut calls = 0;
        let outcome = search.run(
            |indices| {
                calls += 1;
                if calls == 4 {
                    cancel.cancel();
                }
                Ok(result(fake_rms(indices)))
            },
            &mut NoProgress,
            &cancel,
        );
        assert_eq!(outcome, Err(CalibrationError::Cancelled));
        assert_eq!(calls, 4);
    }
}

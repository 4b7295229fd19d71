//! Sample selection algorithms over a population of profile records.

use crate::descriptive::sample_variance;
use crate::error::StatsError;
use crate::profile::ProfileRecord;
use rand::rngs::StdRng;
use rand::seq::{SliceRandom, index};
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Separator between variable values in a composite stratum key.
const COMPOSITE_SEPARATOR: &str = "|";

/// How units are drawn from the population.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SamplingMethod {
    #[default]
    SimpleRandom,
    Systematic,
    StratifiedProportional,
    StratifiedOptimal,
    Quota,
    Cluster,
}

impl SamplingMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SimpleRandom => "simple-random",
            Self::Systematic => "systematic",
            Self::StratifiedProportional => "stratified-proportional",
            Self::StratifiedOptimal => "stratified-optimal",
            Self::Quota => "quota",
            Self::Cluster => "cluster",
        }
    }

    /// Whether the method partitions the population by stratification variables.
    pub fn is_stratified(self) -> bool {
        matches!(self, Self::StratifiedProportional | Self::StratifiedOptimal)
    }
}

impl fmt::Display for SamplingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SamplingMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['_', ' '], "-");
        match normalized.as_str() {
            "simple-random" | "random" | "simple" => Ok(Self::SimpleRandom),
            "systematic" => Ok(Self::Systematic),
            "stratified-proportional" | "stratified" | "proportional" => {
                Ok(Self::StratifiedProportional)
            }
            "stratified-optimal" | "optimal" | "neyman" => Ok(Self::StratifiedOptimal),
            "quota" => Ok(Self::Quota),
            "cluster" => Ok(Self::Cluster),
            other => Err(format!("unknown sampling method: {other}")),
        }
    }
}

/// A target count for one category of one variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaTarget {
    pub variable: String,
    pub category: String,
    pub target: usize,
}

impl QuotaTarget {
    pub fn new(variable: impl Into<String>, category: impl Into<String>, target: usize) -> Self {
        Self {
            variable: variable.into(),
            category: category.into(),
            target,
        }
    }
}

/// How far a quota was filled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaFill {
    pub variable: String,
    pub category: String,
    pub target: usize,
    pub filled: usize,
}

/// Input to [`SamplingEngine::select`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingRequest {
    pub method: SamplingMethod,
    pub target_size: usize,
    #[serde(default)]
    pub stratification_variables: Vec<String>,
    #[serde(default)]
    pub quotas: Vec<QuotaTarget>,
    /// Grouping variable for cluster sampling; defaults to the first stratification variable.
    #[serde(default)]
    pub cluster_variable: Option<String>,
    /// Numeric variable whose within-stratum spread drives optimal allocation.
    #[serde(default)]
    pub optimal_variable: Option<String>,
}

impl SamplingRequest {
    pub fn new(method: SamplingMethod, target_size: usize) -> Self {
        Self {
            method,
            target_size,
            ..Default::default()
        }
    }

    pub fn with_variables<S: Into<String>>(mut self, variables: impl IntoIterator<Item = S>) -> Self {
        self.stratification_variables = variables.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_quotas(mut self, quotas: Vec<QuotaTarget>) -> Self {
        self.quotas = quotas;
        self
    }

    pub fn with_cluster_variable(mut self, variable: impl Into<String>) -> Self {
        self.cluster_variable = Some(variable.into());
        self
    }

    pub fn with_optimal_variable(mut self, variable: impl Into<String>) -> Self {
        self.optimal_variable = Some(variable.into());
        self
    }
}

/// The strategy that produced a sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingStrategy {
    pub method: SamplingMethod,
    pub stratification_variables: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quotas: Option<Vec<QuotaTarget>>,
    pub target_size: usize,
    pub sample_size: usize,
    pub selected_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quota_fills: Vec<QuotaFill>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clusters: Vec<String>,
}

/// One selected member of the population.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedUnit {
    pub id: String,
    pub display_name: String,
    pub strata: BTreeMap<String, String>,
    pub selection_order: usize,
    /// Position of the unit in the source population.
    pub population_index: usize,
}

/// An ordered, frozen sample with per-variable category counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedSample {
    units: Vec<SelectedUnit>,
    variables: Vec<String>,
    distributions: BTreeMap<String, BTreeMap<String, usize>>,
}

impl SelectedSample {
    /// Build a sample from population indices in selection order.
    pub fn from_indices(
        population: &[ProfileRecord],
        indices: &[usize],
        variables: &[String],
    ) -> Self {
        let mut builder = SampleBuilder::new(variables);
        for &idx in indices {
            if let Some(record) = population.get(idx) {
                builder.push(idx, record);
            }
        }
        builder.freeze()
    }

    pub fn units(&self) -> &[SelectedUnit] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.units.iter().map(|u| u.id.clone()).collect()
    }

    /// Variables whose values were resolved for every unit.
    pub fn tracked_variables(&self) -> &[String] {
        &self.variables
    }

    /// Category counts for a tracked variable.
    pub fn distribution(&self, variable: &str) -> Option<&BTreeMap<String, usize>> {
        self.distributions.get(variable)
    }

    pub fn distributions(&self) -> &BTreeMap<String, BTreeMap<String, usize>> {
        &self.distributions
    }
}

/// Append-only construction of a [`SelectedSample`].
struct SampleBuilder {
    variables: Vec<String>,
    units: Vec<SelectedUnit>,
}

impl SampleBuilder {
    fn new(variables: &[String]) -> Self {
        Self {
            variables: variables.to_vec(),
            units: Vec::new(),
        }
    }

    fn push(&mut self, population_index: usize, record: &ProfileRecord) {
        let strata = self
            .variables
            .iter()
            .map(|v| (v.clone(), record.stratum_or_unknown(v)))
            .collect();
        self.units.push(SelectedUnit {
            id: record
                .id()
                .unwrap_or_else(|| format!("unit-{population_index}")),
            display_name: record.display_name(),
            strata,
            selection_order: self.units.len() + 1,
            population_index,
        });
    }

    fn freeze(self) -> SelectedSample {
        let mut distributions: BTreeMap<String, BTreeMap<String, usize>> = self
            .variables
            .iter()
            .map(|v| (v.clone(), BTreeMap::new()))
            .collect();
        for unit in &self.units {
            for (variable, value) in &unit.strata {
                if let Some(counts) = distributions.get_mut(variable) {
                    *counts.entry(value.clone()).or_insert(0) += 1;
                }
            }
        }
        SelectedSample {
            units: self.units,
            variables: self.variables,
            distributions,
        }
    }
}

/// Composite stratum key for a record.
pub fn stratum_key(record: &ProfileRecord, variables: &[String]) -> String {
    variables
        .iter()
        .map(|v| record.stratum_or_unknown(v))
        .collect::<Vec<_>>()
        .join(COMPOSITE_SEPARATOR)
}

fn partition(keys: &[String]) -> BTreeMap<String, Vec<usize>> {
    let mut partitions: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (idx, key) in keys.iter().enumerate() {
        partitions.entry(key.clone()).or_default().push(idx);
    }
    partitions
}

/// Draws samples with an owned, optionally seeded RNG.
pub struct SamplingEngine {
    rng: StdRng,
}

impl Default for SamplingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SamplingEngine {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic engine for reproducible draws.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Uniform selection without replacement.
    pub fn simple_random(&mut self, population: &[ProfileRecord], n: usize) -> Vec<usize> {
        let take = n.min(population.len());
        index::sample(&mut self.rng, population.len(), take).into_vec()
    }

    /// Every k-th unit from a random start in `[0, k)`, with `k = floor(N/n)`.
    pub fn systematic(&mut self, population: &[ProfileRecord], n: usize) -> Vec<usize> {
        let total = population.len();
        if n == 0 || total == 0 {
            return Vec::new();
        }
        if n >= total {
            return (0..total).collect();
        }
        let step = (total / n).max(1);
        let start = self.rng.gen_range(0..step);
        (start..total).step_by(step).take(n).collect()
    }

    /// Proportional allocation over single or composite strata.
    pub fn stratified_proportional(
        &mut self,
        population: &[ProfileRecord],
        n: usize,
        variables: &[String],
    ) -> Vec<usize> {
        let total = population.len();
        if n == 0 || total == 0 {
            return Vec::new();
        }
        if n >= total {
            return (0..total).collect();
        }
        let keys: Vec<String> = population
            .iter()
            .map(|r| stratum_key(r, variables))
            .collect();
        let partitions = partition(&keys);
        let allocations = proportional_allocations(&partitions, n, total);
        self.draw_allocated(&partitions, &allocations, &keys, n)
    }

    /// Neyman allocation (`N_h · S_h`) on `optimal_variable`; proportional when
    /// no spread information is available.
    pub fn stratified_optimal(
        &mut self,
        population: &[ProfileRecord],
        n: usize,
        variables: &[String],
        optimal_variable: Option<&str>,
    ) -> Vec<usize> {
        let total = population.len();
        if n == 0 || total == 0 {
            return Vec::new();
        }
        if n >= total {
            return (0..total).collect();
        }
        let keys: Vec<String> = population
            .iter()
            .map(|r| stratum_key(r, variables))
            .collect();
        let partitions = partition(&keys);

        let weights: BTreeMap<String, f64> = match optimal_variable {
            Some(var) => partitions
                .iter()
                .map(|(key, members)| {
                    let values: Vec<f64> = members
                        .iter()
                        .filter_map(|&i| population[i].numeric(var))
                        .collect();
                    let sd = sample_variance(&values).map(f64::sqrt).unwrap_or(0.0);
                    (key.clone(), members.len() as f64 * sd)
                })
                .collect(),
            None => BTreeMap::new(),
        };
        let total_weight: f64 = weights.values().sum();

        let allocations = if total_weight > 0.0 {
            partitions
                .keys()
                .map(|key| {
                    let w = weights.get(key).copied().unwrap_or(0.0);
                    let alloc = (n as f64 * w / total_weight).floor() as usize;
                    (key.clone(), alloc.max(1))
                })
                .collect()
        } else {
            debug!("No spread information for optimal allocation, using proportional");
            proportional_allocations(&partitions, n, total)
        };
        self.draw_allocated(&partitions, &allocations, &keys, n)
    }

    /// Greedy quota filling over a shuffled population.
    pub fn quota(
        &mut self,
        population: &[ProfileRecord],
        quotas: &[QuotaTarget],
    ) -> (Vec<usize>, Vec<QuotaFill>) {
        let mut order: Vec<usize> = (0..population.len()).collect();
        order.shuffle(&mut self.rng);

        let mut filled = vec![0usize; quotas.len()];
        let mut selected = Vec::new();
        for idx in order {
            if filled.iter().zip(quotas).all(|(f, q)| *f >= q.target) {
                break;
            }
            let record = &population[idx];
            let slot = quotas.iter().enumerate().find(|(i, q)| {
                filled[*i] < q.target
                    && record.stratum_value(&q.variable).as_deref() == Some(q.category.as_str())
            });
            if let Some((i, _)) = slot {
                filled[i] += 1;
                selected.push(idx);
            }
        }

        let fills = quotas
            .iter()
            .zip(filled)
            .map(|(q, filled)| QuotaFill {
                variable: q.variable.clone(),
                category: q.category.clone(),
                target: q.target,
                filled,
            })
            .collect();
        (selected, fills)
    }

    /// Whole clusters chosen uniformly without replacement.
    ///
    /// Every member of a chosen cluster is returned, so the result size
    /// tracks the chosen clusters rather than `n` exactly.
    pub fn cluster(
        &mut self,
        population: &[ProfileRecord],
        n: usize,
        variable: &str,
    ) -> (Vec<usize>, Vec<String>) {
        let total = population.len();
        if total == 0 {
            return (Vec::new(), Vec::new());
        }
        let keys: Vec<String> = population
            .iter()
            .map(|r| r.stratum_or_unknown(variable))
            .collect();
        let partitions = partition(&keys);
        let names: Vec<&String> = partitions.keys().collect();

        let average = total as f64 / names.len() as f64;
        let wanted = ((n as f64 / average).round() as usize).clamp(1, names.len());
        let mut chosen = index::sample(&mut self.rng, names.len(), wanted).into_vec();
        chosen.sort_unstable();

        let mut selected = Vec::new();
        let mut clusters = Vec::with_capacity(chosen.len());
        for i in chosen {
            let name = names[i];
            clusters.push(name.clone());
            if let Some(members) = partitions.get(name) {
                selected.extend_from_slice(members);
            }
        }
        (selected, clusters)
    }

    /// Validate a request, run the chosen algorithm, and freeze the sample.
    pub fn select(
        &mut self,
        population: &[ProfileRecord],
        request: &SamplingRequest,
    ) -> Result<(SamplingStrategy, SelectedSample), StatsError> {
        if population.is_empty() {
            return Err(StatsError::EmptyInput {
                what: "population".into(),
            });
        }

        let mut tracked: Vec<String> = request.stratification_variables.clone();
        let mut target = request.target_size;
        let mut quota_fills = Vec::new();
        let mut clusters = Vec::new();

        let indices = match request.method {
            SamplingMethod::SimpleRandom => self.simple_random(population, target),
            SamplingMethod::Systematic => self.systematic(population, target),
            SamplingMethod::StratifiedProportional => {
                ensure_variables(population, &request.stratification_variables)?;
                self.stratified_proportional(population, target, &request.stratification_variables)
            }
            SamplingMethod::StratifiedOptimal => {
                ensure_variables(population, &request.stratification_variables)?;
                self.stratified_optimal(
                    population,
                    target,
                    &request.stratification_variables,
                    request.optimal_variable.as_deref(),
                )
            }
            SamplingMethod::Quota => {
                validate_quotas(&request.quotas)?;
                let variables: Vec<String> =
                    request.quotas.iter().map(|q| q.variable.clone()).collect();
                ensure_variables(population, &variables)?;
                push_unique(&mut tracked, variables);
                target = request.quotas.iter().map(|q| q.target).sum();
                let (indices, fills) = self.quota(population, &request.quotas);
                quota_fills = fills;
                indices
            }
            SamplingMethod::Cluster => {
                let variable = request
                    .cluster_variable
                    .clone()
                    .or_else(|| request.stratification_variables.first().cloned())
                    .ok_or_else(|| StatsError::UnknownVariable {
                        variable: "<cluster>".into(),
                    })?;
                ensure_variables(population, std::slice::from_ref(&variable))?;
                push_unique(&mut tracked, [variable.clone()]);
                let (indices, chosen) = self.cluster(population, target, &variable);
                clusters = chosen;
                indices
            }
        };

        let sample = SelectedSample::from_indices(population, &indices, &tracked);
        debug!(
            method = %request.method,
            target = target,
            selected = sample.len(),
            "Sample selected"
        );

        let strategy = SamplingStrategy {
            method: request.method,
            stratification_variables: request.stratification_variables.clone(),
            quotas: (!request.quotas.is_empty()).then(|| request.quotas.clone()),
            target_size: target,
            sample_size: sample.len(),
            selected_ids: sample.ids(),
            quota_fills,
            clusters,
        };
        Ok((strategy, sample))
    }

    /// Draw each stratum's allocation, then trim or fill to exactly `n`.
    fn draw_allocated(
        &mut self,
        partitions: &BTreeMap<String, Vec<usize>>,
        allocations: &BTreeMap<String, usize>,
        keys: &[String],
        n: usize,
    ) -> Vec<usize> {
        let mut selected = Vec::with_capacity(n);
        for (key, members) in partitions {
            let take = allocations
                .get(key)
                .copied()
                .unwrap_or(1)
                .min(members.len());
            let picks = index::sample(&mut self.rng, members.len(), take);
            selected.extend(picks.into_iter().map(|i| members[i]));
        }

        if selected.len() > n {
            self.trim(selected, n, keys)
        } else {
            if selected.len() < n {
                let chosen: HashSet<usize> = selected.iter().copied().collect();
                let mut remaining: Vec<usize> =
                    (0..keys.len()).filter(|i| !chosen.contains(i)).collect();
                remaining.shuffle(&mut self.rng);
                let missing = n - selected.len();
                selected.extend(remaining.into_iter().take(missing));
            }
            selected
        }
    }

    /// Random trim that keeps one unit per stratum whenever `n` allows it.
    fn trim(&mut self, mut selected: Vec<usize>, n: usize, keys: &[String]) -> Vec<usize> {
        selected.shuffle(&mut self.rng);
        let strata: HashSet<&str> = selected.iter().map(|&i| keys[i].as_str()).collect();
        if strata.len() >= n {
            selected.truncate(n);
            return selected;
        }

        let mut seen = HashSet::new();
        let (mut kept, mut rest) = (Vec::with_capacity(n), Vec::new());
        for idx in selected {
            if seen.insert(keys[idx].as_str()) {
                kept.push(idx);
            } else {
                rest.push(idx);
            }
        }
        let room = n - kept.len();
        kept.extend(rest.into_iter().take(room));
        kept
    }
}

fn proportional_allocations(
    partitions: &BTreeMap<String, Vec<usize>>,
    n: usize,
    total: usize,
) -> BTreeMap<String, usize> {
    partitions
        .iter()
        .map(|(key, members)| (key.clone(), (n * members.len() / total).max(1)))
        .collect()
}

fn ensure_variables(population: &[ProfileRecord], variables: &[String]) -> Result<(), StatsError> {
    for variable in variables {
        if !population.iter().any(|r| r.stratum_value(variable).is_some()) {
            return Err(StatsError::UnknownVariable {
                variable: variable.clone(),
            });
        }
    }
    Ok(())
}

fn validate_quotas(quotas: &[QuotaTarget]) -> Result<(), StatsError> {
    if quotas.is_empty() {
        return Err(StatsError::EmptyInput {
            what: "quota targets".into(),
        });
    }
    if let Some(q) = quotas.iter().find(|q| q.target == 0) {
        return Err(StatsError::InvalidQuota {
            variable: q.variable.clone(),
            category: q.category.clone(),
            reason: "target must be positive".into(),
        });
    }
    Ok(())
}

fn push_unique(tracked: &mut Vec<String>, extra: impl IntoIterator<Item = String>) {
    for variable in extra {
        if !tracked.contains(&variable) {
            tracked.push(variable);
        }
    }
}

//! Genetic operators of the evolutionary search over sets of rules.
use crate::condition::RuleCondition;
use crate::individual::{Evaluation, Individual};
use crate::parameters::BerblValidParams;

use ndarray_rand::rand::seq::SliceRandom;
use ndarray_rand::rand::Rng;
use std::collections::HashMap;

/// Tournament selection: draws `size` individuals and returns the index of the
/// fittest one, the lowest index winning ties.
pub(crate) fn tournament<R: Rng>(fitness: &[f64], size: usize, rng: &mut R) -> usize {
    let mut winner = rng.gen_range(0..fitness.len());
    for _ in 1..size {
        let challenger = rng.gen_range(0..fitness.len());
        if fitness[challenger] > fitness[winner]
            || (fitness[challenger] == fitness[winner] && challenger < winner)
        {
            winner = challenger;
        }
    }
    winner
}

/// Index of the fittest individual, the lowest index winning ties
pub(crate) fn elite(fitness: &[f64]) -> usize {
    let mut best = 0;
    for (i, &f) in fitness.iter().enumerate() {
        if f > fitness[best] {
            best = i;
        }
    }
    best
}

/// Selection fitness lowering individuals which share their coverage pattern
/// with others by `strength * ln(niche count)`
pub(crate) fn niched_fitness(evaluations: &[Evaluation], strength: f64) -> Vec<f64> {
    let mut counts: HashMap<u64, usize> = HashMap::new();
    for eval in evaluations {
        *counts.entry(eval.signature).or_insert(0) += 1;
    }
    evaluations
        .iter()
        .map(|eval| eval.fitness - strength * (counts[&eval.signature] as f64).ln())
        .collect()
}

/// Pools the rules of both parents and splits them into two children whose
/// rule counts are drawn uniformly among the splits within `[k_min, k_max]`.
pub(crate) fn crossover<R: Rng>(
    parent1: &Individual,
    parent2: &Individual,
    k_min: usize,
    k_max: usize,
    rng: &mut R,
) -> (Individual, Individual) {
    let mut pool: Vec<RuleCondition> = parent1
        .clone()
        .into_conditions()
        .into_iter()
        .chain(parent2.clone().into_conditions())
        .collect();
    pool.shuffle(rng);
    let total = pool.len();
    let low = k_min.max(total.saturating_sub(k_max));
    let high = k_max.min(total.saturating_sub(k_min));
    let k1 = if low < high {
        rng.gen_range(low..=high)
    } else {
        low
    };
    let rest = pool.split_off(k1.min(total));
    (Individual::new(pool), Individual::new(rest))
}

/// Mutates the rules of an individual, each with probability `1/K`, then adds
/// or removes a rule within the rule count bounds.
/// Returns the offspring and whether it differs from the parent.
pub(crate) fn mutate<R: Rng>(
    individual: &Individual,
    params: &BerblValidParams,
    rng: &mut R,
) -> (Individual, bool) {
    let k = individual.n_rules();
    let mut changed = false;
    let mut conditions: Vec<RuleCondition> = individual
        .conditions()
        .iter()
        .map(|c| {
            if rng.gen::<f64>() * (k as f64) < 1. {
                let mutated = c.mutate(
                    rng,
                    params.mutation_rate,
                    params.mutation_scale,
                    &params.xlimits,
                    params.max_mutation_retries,
                );
                changed |= mutated != *c;
                mutated
            } else {
                c.clone()
            }
        })
        .collect();

    if conditions.len() < params.k_max && rng.gen::<f64>() < params.add_prob {
        let (smin, smax) = params.init_spread;
        let spread = smin + rng.gen::<f64>() * (smax - smin);
        conditions.push(RuleCondition::random(&params.xlimits, spread, rng));
        changed = true;
    }
    if conditions.len() > params.k_min && rng.gen::<f64>() < params.remove_prob {
        let idx = rng.gen_range(0..conditions.len());
        conditions.remove(idx);
        changed = true;
    }
    (Individual::new(conditions), changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::BerblParams;
    use linfa::ParamGuard;
    use ndarray::array;
    use ndarray_rand::rand::SeedableRng;
    use rand_xoshiro::Xoshiro256Plus;

    fn evaluation(fitness: f64, signature: u64) -> Evaluation {
        Evaluation {
            fitness,
            evidence: None,
            n_degenerate: 0,
            warning: None,
            failure: None,
            signature,
            model: None,
        }
    }

    #[test]
    fn test_tournament_tie_break_by_insertion_order() {
        let fitness = [1., 3., 3., 0.];
        let mut rng = Xoshiro256Plus::seed_from_u64(0);
        // full-size tournaments almost surely see both best individuals
        for _ in 0..20 {
            let winner = tournament(&fitness, 50, &mut rng);
            assert_eq!(winner, 1);
        }
        assert_eq!(elite(&fitness), 1);
        assert_eq!(elite(&[f64::NEG_INFINITY, f64::NEG_INFINITY]), 0);
    }

    #[test]
    fn test_niched_fitness() {
        let evals = vec![evaluation(1., 7), evaluation(2., 7), evaluation(0.5, 3)];
        let niched = niched_fitness(&evals, 1.);
        assert_eq!(niched[0], 1. - 2f64.ln());
        assert_eq!(niched[1], 2. - 2f64.ln());
        assert_eq!(niched[2], 0.5);
    }

    #[test]
    fn test_crossover_keeps_rule_count_bounds() {
        let xlimits = array![[0., 1.]];
        let mut rng = Xoshiro256Plus::seed_from_u64(11);
        let (k_min, k_max) = (2, 5);
        for _ in 0..200 {
            let n1 = rng.gen_range(k_min..=k_max);
            let n2 = rng.gen_range(k_min..=k_max);
            let p1 = Individual::random(n1, &xlimits, (0.1, 0.3), &mut rng);
            let p2 = Individual::random(n2, &xlimits, (0.1, 0.3), &mut rng);
            let (c1, c2) = crossover(&p1, &p2, k_min, k_max, &mut rng);
            assert_eq!(c1.n_rules() + c2.n_rules(), n1 + n2);
            for c in [c1, c2] {
                assert!(k_min <= c.n_rules() && c.n_rules() <= k_max);
                for cond in c.conditions() {
                    assert!(p1.conditions().contains(cond) || p2.conditions().contains(cond));
                }
            }
        }
    }

    #[test]
    fn test_mutation_keeps_rule_count_bounds() {
        let params = BerblParams::new(array![[0., 1.], [0., 1.]])
            .rules_bounds(1, 3)
            .init_rules(1, 3)
            .add_remove_probs(0.5, 0.5)
            .check()
            .unwrap();
        let mut rng = Xoshiro256Plus::seed_from_u64(5);
        let mut individual = Individual::random(2, params.xlimits(), (0.2, 0.4), &mut rng);
        for _ in 0..500 {
            let (offspring, changed) = mutate(&individual, &params, &mut rng);
            assert!(1 <= offspring.n_rules() && offspring.n_rules() <= 3);
            if !changed {
                assert_eq!(offspring, individual);
            }
            individual = offspring;
        }
    }
}

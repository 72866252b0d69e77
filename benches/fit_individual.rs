use berbl::{evaluate, FitParams, Individual, RuleCondition, TrainingData};
use criterion::{criterion_group, criterion_main, Criterion};
use ndarray::{array, Array1, Array2, Axis};
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::{Normal, Uniform};
use ndarray_rand::RandomExt;
use rand_xoshiro::Xoshiro256Plus;

fn criterion_fit_individual(c: &mut Criterion) {
    let _ = env_logger::builder().is_test(true).try_init();
    let sizes = [100, 500, 2000];

    let mut group = c.benchmark_group("fit_individual");
    group.sample_size(20);
    for nt in sizes {
        let mut rng = Xoshiro256Plus::seed_from_u64(42);
        let xt: Array2<f64> = Array2::random_using((nt, 1), Uniform::new(0., 2.), &mut rng);
        let noise = Array1::random_using(nt, Normal::new(0., 0.05).unwrap(), &mut rng);
        let yt = xt
            .index_axis(Axis(1), 0)
            .mapv(|v| if v < 1. { 2. * v + 1. } else { -3. * v + 5. })
            + noise;
        let data = TrainingData::new(&xt, &yt);
        let individual = Individual::new(vec![
            RuleCondition::new(array![[0., 1.1]]).unwrap(),
            RuleCondition::new(array![[0.9, 2.]]).unwrap(),
            RuleCondition::new(array![[0.4, 1.6]]).unwrap(),
        ]);
        let params = FitParams::default();

        group.bench_function(format!("evaluate {nt}"), |b| {
            b.iter(|| std::hint::black_box(evaluate(&individual, &data, &params)));
        });
    }
    group.finish();
}

criterion_group!(benches, criterion_fit_individual);
criterion_main!(benches);

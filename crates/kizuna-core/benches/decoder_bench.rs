use criterion::{Criterion, black_box, criterion_group, criterion_main};
use kizuna_core::parser::{ChuLiuEdmonds, head_probabilities};

fn random_scores(size: usize, seed: u64) -> Vec<Vec<f64>> {
    let mut rng = oorandom::Rand64::new(seed as u128);
    (0..size)
        .map(|_| (0..size).map(|_| rng.rand_float()).collect())
        .collect()
}

fn bench_decode(c: &mut Criterion) {
    let decoder = ChuLiuEdmonds::new();

    for &size in &[10usize, 40, 120] {
        let scores = random_scores(size + 1, 0x5eed);
        c.bench_function(&format!("decode_{size}_words"), |b| {
            b.iter(|| decoder.decode(black_box(&scores)).unwrap());
        });
    }

    let scores = random_scores(41, 0x5eed);
    c.bench_function("normalize_and_decode_40_words", |b| {
        b.iter(|| {
            let probs = head_probabilities(black_box(&scores), 40).unwrap();
            decoder.decode(&probs).unwrap()
        });
    });
}

criterion_group!(benches, bench_decode);
criterion_main!(benches);

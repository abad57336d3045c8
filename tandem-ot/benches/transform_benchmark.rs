use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tandem_ot::{transform, Engine, EngineConfig, Operation, Submission};

fn bench_transform_pair_batches(c: &mut Criterion) {
    let ops: Vec<Operation> = (0..16).map(|i| Operation::insert(i * 3, "ab")).collect();
    let applied: Vec<Operation> = (0..16).map(|i| Operation::delete(i * 2, 1)).collect();

    c.bench_function("transform_16x16", |b| {
        b.iter(|| black_box(transform(black_box(&ops), black_box(&applied))))
    });
}

fn bench_apply_stale_submission(c: &mut Criterion) {
    c.bench_function("apply_against_100_revisions", |b| {
        b.iter_batched(
            || {
                let engine = Engine::new(EngineConfig { history_limit: 1000 });
                engine.get_or_create_document(1, &"x".repeat(1024));
                for v in 0..100 {
                    engine
                        .apply(&Submission::new(1, 1, v, vec![Operation::insert(v as usize, "y")]))
                        .unwrap();
                }
                engine
            },
            |engine| {
                engine
                    .apply(&Submission::new(1, 2, 0, vec![Operation::insert(512, "z")]))
                    .unwrap()
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_transform_pair_batches, bench_apply_stale_submission);
criterion_main!(benches);

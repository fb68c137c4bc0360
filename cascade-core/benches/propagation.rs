//! Propagation benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use cascade_core::{Domain, Events};

/// A chain of `depth` transforms hanging off one source.
fn chain(domain: &Domain, depth: usize) -> (cascade_core::EventSource<u64>, Events<u64>) {
    let source = domain.source::<u64>();
    let mut tail = source.events().clone();
    for _ in 0..depth {
        tail = domain.transform(&tail, |x| x.wrapping_add(1)).unwrap();
    }
    (source, tail)
}

fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain");
    for depth in [1, 16, 128] {
        let domain = Domain::new();
        let (source, _tail) = chain(&domain, depth);
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter(|| domain.emit(&source, black_box(1)).unwrap());
        });
    }
    group.finish();
}

fn bench_fan_in(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_in");
    for width in [2, 16, 64] {
        let domain = Domain::new();
        let sources: Vec<_> = (0..width).map(|_| domain.source::<u64>()).collect();
        let inputs: Vec<&Events<u64>> = sources.iter().map(|s| s.events()).collect();
        let _merged = domain.merge(&inputs).unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.iter(|| {
                domain
                    .transaction(|tx| {
                        for (i, source) in sources.iter().enumerate() {
                            tx.emit(source, black_box(i as u64))?;
                        }
                        Ok(())
                    })
                    .unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_chain, bench_fan_in);
criterion_main!(benches);

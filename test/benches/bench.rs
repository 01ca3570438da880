use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use segfit::{Heap, SliceRegion};
use segfit_test::*;
use std::io::{self, Write};

const TRACES: [&str; 5] = [
    "binary.rep",
    "coalescing.rep",
    "random.rep",
    "realloc.rep",
    "short.rep",
];

fn print_trace_stats(name: &str, operations: &Operations) {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    let _ = writeln!(out, "################## {} ##################", name);
    let _ = writeln!(out, "#");
    let _ = writeln!(out, "# Allocations by log2(Size)");
    let _ = writeln!(out, "#");
    let _ = writeln!(out, "{}", operations.size_histogram());
    let _ = writeln!(out, "#");
    let _ = writeln!(out, "# Allocations by Lifetime");
    let _ = writeln!(out, "#");
    let _ = writeln!(out, "{}", operations.lifetime_histogram());
    for (i, config) in CONFIGS.iter().enumerate() {
        let _ = writeln!(
            out,
            "# Utilization with config {}: {:.1}%",
            i,
            100.0 * operations.utilization(*config)
        );
    }
}

fn bench_traces(c: &mut Criterion) {
    let mut group = c.benchmark_group("trace");
    let mut buffer = vec![0u8; HEAP_BYTES];

    for name in TRACES {
        let operations = Operations::read_trace(name);
        print_trace_stats(name, &operations);

        for (i, config) in CONFIGS.iter().enumerate() {
            group.bench_with_input(BenchmarkId::new(name, i), config, |b, config| {
                b.iter(|| {
                    let mut heap = Heap::with_config(SliceRegion::new(&mut buffer), *config);
                    operations.run_with_heap(&mut heap, 0);
                    criterion::black_box(heap.heap_size());
                });
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_traces);
criterion_main!(benches);

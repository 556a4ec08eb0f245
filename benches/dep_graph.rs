//! Microbenchmark for dependency-graph construction (C2, §4.2) on a
//! synthetic package set, grounded on the teacher's
//! `benches/global_dependency_graph.rs` (a `criterion` benchmark run on a
//! single current-thread runtime over `block_on`).

use std::collections::HashMap;

use buildcycle::{
    Pkgbase,
    db::NullDatabase,
    dep_graph::build_dependency_graph,
    notify::NullNotificationSink,
    reason::{BuildReason, BuildReasons},
    recipe::{Dependency, Recipe},
};
use criterion::{Criterion, criterion_group, criterion_main};

/// A chain `pkg0 -> pkg1 -> ... -> pkgN`, each depending on the next and
/// unresolved on disk, so every package gets promoted via `Depended`.
fn chain_recipes(n: usize) -> HashMap<Pkgbase, Recipe> {
    (0..n)
        .map(|i| {
            let deps = if i + 1 < n {
                vec![Dependency::unresolved(
                    format!("pkg{}", i + 1),
                    format!("pkg{}", i + 1),
                )]
            } else {
                vec![]
            };
            (Pkgbase::from(format!("pkg{i}")), Recipe { dependencies: deps, ..Default::default() })
        })
        .collect()
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("benches");
    group.sample_size(20);

    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();

    let recipes = chain_recipes(500);
    let mut seed_reasons: HashMap<Pkgbase, BuildReasons> = HashMap::new();
    seed_reasons.insert(Pkgbase::from("pkg0"), BuildReasons(vec![BuildReason::Cmdline]));

    group.bench_function("build_dependency_graph_chain_500", |b| {
        b.iter(|| {
            let mut build_reasons = seed_reasons.clone();
            rt.block_on(build_dependency_graph(
                &recipes,
                &mut build_reasons,
                &NullDatabase,
                &NullNotificationSink,
            ));
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);

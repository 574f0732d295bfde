//! Graph benchmarks: registration throughput and topological sorting over
//! a linear chain of cells.

use std::collections::HashSet;
use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};

use cellflow_core::graph::{Cell, CellId, DirectedGraph};

fn chain(len: usize) -> DirectedGraph {
    let graph = DirectedGraph::new();
    for i in 0..len {
        let mut cell =
            Cell::new(format!("cell{i}"), format!("x{i} = {i}")).with_defs([format!("x{i}")]);
        if i > 0 {
            cell = cell.with_refs([format!("x{}", i - 1)]);
        }
        graph.register(cell).expect("fresh id");
    }
    graph
}

fn bench_register(c: &mut Criterion) {
    c.bench_function("register_chain_100", |b| b.iter(|| black_box(chain(100))));
}

fn bench_topological_sort(c: &mut Criterion) {
    let graph = chain(100);
    let ids: HashSet<CellId> = graph.cell_ids().into_iter().collect();
    c.bench_function("topological_sort_chain_100", |b| {
        b.iter(|| black_box(graph.topological_sort(&ids)))
    });
}

criterion_group!(benches, bench_register, bench_topological_sort);
criterion_main!(benches);

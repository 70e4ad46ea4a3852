// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Name resolution benchmarks
//!
//! Chains of `P` edges with a declaration at every step, resolved from the
//! head with and without shadowing.

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use dotscope_core::resolution::resolve_blocking;
use dotscope_core::{
    AnyData, DataLeqFn, EdgeOrData, ExplicitOrder, LabelAutomaton, QueryParams, Scope, ScopeGraph, UnitId,
};

type Graph = ScopeGraph<Scope, char, String>;

/// `s0 -P-> s1 -P-> ... -P-> s{n-1}`, each `si -D-> di` with datum `x{i % 4}`.
fn chain(n: usize) -> (Graph, Scope) {
    let unit = UnitId::new("bench");
    let scope = |name: String| Scope::new(unit.clone(), name);
    let mut graph = ScopeGraph::new();
    for i in 0..n {
        let s = scope(format!("s{i}"));
        let d = scope(format!("d{i}"));
        graph.add_edge(s.clone(), 'D', d.clone());
        graph.set_datum(d, format!("x{}", i % 4));
        if i + 1 < n {
            graph.add_edge(s, 'P', scope(format!("s{}", i + 1)));
        }
    }
    (graph, scope("s0".to_string()))
}

fn lexical_wf() -> dotscope_core::resolution::LabelWfRef<char> {
    // P* D
    LabelAutomaton::builder()
        .transition(0, 'P', 0)
        .transition(0, 'D', 1)
        .accept(1)
        .build()
}

fn bench_chain_resolution(c: &mut Criterion) {
    let labels = Arc::new(vec!['P', 'D']);
    let mut group = c.benchmark_group("chain_resolution");

    for n in [16usize, 64, 256] {
        let (graph, head) = chain(n);
        group.throughput(Throughput::Elements(n as u64));

        let all = QueryParams::all(lexical_wf());
        group.bench_with_input(BenchmarkId::new("unordered", n), &n, |b, _| {
            b.iter(|| resolve_blocking(graph.clone(), Arc::clone(&labels), black_box(head.clone()), all.clone()).unwrap())
        });

        let shadowing = QueryParams::new(
            lexical_wf(),
            Arc::new(ExplicitOrder::new([(EdgeOrData::Edge('D'), EdgeOrData::Edge('P'))])),
            Arc::new(AnyData),
            Arc::new(DataLeqFn::new("eq", |a: &String, b: &String| a == b)),
        );
        group.bench_with_input(BenchmarkId::new("shadowing", n), &n, |b, _| {
            b.iter(|| resolve_blocking(graph.clone(), Arc::clone(&labels), black_box(head.clone()), shadowing.clone()).unwrap())
        });
    }

    group.finish();
}

criterion_group!(resolution_benches, bench_chain_resolution);
criterion_main!(resolution_benches);

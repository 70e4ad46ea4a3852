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

//! Property tests for scope graphs, patches and name resolution.

use std::collections::BTreeSet;
use std::sync::Arc;

use proptest::prelude::*;

use dotscope_core::resolution::resolve_blocking;
use dotscope_core::{
    AlwaysLeq, AnyData, EdgeOrData, ExplicitOrder, LabelAutomaton, Patch, QueryParams, Scope, ScopeGraph, UnitId,
};

fn patch_strategy() -> impl Strategy<Value = Option<Patch<u8>>> {
    prop::collection::vec((0u8..8, 0u8..8), 0..6).prop_map(Patch::of)
}

fn scope(i: usize) -> Scope {
    Scope::new(UnitId::new("u"), format!("s{i}"))
}

/// Graph over `n` scopes, every scope carrying its index as datum.
fn build_graph(n: usize, edges: &[(usize, bool, usize)]) -> ScopeGraph<Scope, char, String> {
    let mut graph = ScopeGraph::new();
    for i in 0..n {
        graph.set_datum(scope(i), i.to_string());
    }
    for &(from, public, to) in edges {
        graph.add_edge(scope(from % n), if public { 'P' } else { 'I' }, scope(to % n));
    }
    graph
}

/// Fragment owned by `owner`: edges from its own scopes to scopes of
/// either unit, data on its own scopes only.
fn fragment_strategy(owner: &'static str) -> impl Strategy<Value = ScopeGraph<Scope, char, String>> {
    let edges = prop::collection::vec((0usize..4, any::<bool>(), any::<bool>(), 0usize..4), 0..10);
    let data = prop::collection::vec((0usize..4, 0u8..3), 0..4);
    (edges, data).prop_map(move |(edges, data)| {
        let own = |i: usize| Scope::new(UnitId::new(owner), format!("s{i}"));
        let other = if owner == "a" { "b" } else { "a" };
        let mut graph = ScopeGraph::new();
        for (from, public, local, to) in edges {
            let target = if local { own(to) } else { Scope::new(UnitId::new(other), format!("s{to}")) };
            graph.add_edge(own(from), if public { 'P' } else { 'I' }, target);
        }
        for (at, datum) in data {
            graph.set_datum(own(at), datum.to_string());
        }
        graph
    })
}

fn graph_strategy() -> impl Strategy<Value = ScopeGraph<Scope, char, String>> {
    (1usize..6, prop::collection::vec((0usize..6, any::<bool>(), 0usize..6), 0..12))
        .prop_map(|(n, edges)| build_graph(n, &edges))
}

fn walk_any() -> dotscope_core::resolution::LabelWfRef<char> {
    LabelAutomaton::builder()
        .transition(0, 'P', 0)
        .transition(0, 'I', 0)
        .accept(0)
        .build()
}

proptest! {
    #[test]
    fn prop_add_all_commutes_for_disjoint_fragments(a in fragment_strategy("a"), b in fragment_strategy("b")) {
        let ab = a.add_all(&b);
        prop_assert_eq!(&ab, &b.add_all(&a));
        prop_assert_eq!(ab.edge_count(), a.edge_count() + b.edge_count());
        prop_assert_eq!(a.add_all(&ScopeGraph::new()), a.clone());
    }

    #[test]
    fn prop_patch_merge_is_commutative(a in patch_strategy(), b in patch_strategy()) {
        if let (Some(a), Some(b)) = (a, b) {
            prop_assert_eq!(a.merge(&b), b.merge(&a));
        }
    }

    #[test]
    fn prop_merge_with_identity_is_neutral(a in patch_strategy()) {
        if let Some(a) = a {
            prop_assert_eq!(a.merge(&Patch::identity()), Some(a.clone()));
            prop_assert_eq!(Patch::identity().merge(&a), Some(a));
        }
    }

    #[test]
    fn prop_resolved_paths_are_acyclic(graph in graph_strategy()) {
        let env = resolve_blocking(graph, Arc::new(vec!['P', 'I']), scope(0), QueryParams::all(walk_any())).unwrap();
        prop_assert!(!env.is_empty());
        for path in env.iter() {
            let scopes = path.path().scopes();
            let unique: BTreeSet<_> = scopes.iter().collect();
            prop_assert_eq!(unique.len(), scopes.len());
        }
    }

    #[test]
    fn prop_shadowing_is_stable(graph in graph_strategy()) {
        let labels = Arc::new(vec!['P', 'I']);
        let shadowing = QueryParams::new(
            walk_any(),
            Arc::new(ExplicitOrder::new([
                (EdgeOrData::Data, EdgeOrData::Edge('P')),
                (EdgeOrData::Edge('P'), EdgeOrData::Edge('I')),
            ])),
            Arc::new(AnyData),
            Arc::new(AlwaysLeq),
        );
        let all = resolve_blocking(graph.clone(), Arc::clone(&labels), scope(0), QueryParams::all(walk_any())).unwrap();
        let once = resolve_blocking(graph.clone(), Arc::clone(&labels), scope(0), shadowing.clone()).unwrap();
        let twice = resolve_blocking(graph, labels, scope(0), shadowing).unwrap();

        prop_assert!(once.accepted() == twice.accepted());
        prop_assert!(once.accepted().is_subset(all.accepted()));
        // The source's own datum is preferred over everything else.
        prop_assert_eq!(once.len(), 1);
        prop_assert!(once.iter().all(|p| p.path().is_empty()));
    }
}

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

//! Name resolution: query predicates, environments and the resolution
//! algorithm itself.

pub mod algorithm;
pub mod env;
pub mod predicates;
pub mod static_context;

pub use algorithm::{NameResolution, ResolutionContext};
pub use env::Env;
pub use predicates::{
    AlwaysLeq, AnyData, DataLeq, DataLeqFn, DataLeqRef, DataWf, DataWfFn, DataWfRef, EpsilonWf, ExplicitOrder,
    LabelAutomaton, LabelOrder, LabelOrderFn, LabelOrderRef, LabelWf, LabelWfRef, NeverLeq, NoLabelOrder, NoQueries,
    PredicateContext, QueryParams,
};
pub use static_context::{StaticContext, resolve_blocking, resolve_in};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use dotscope_common::{Scope, UnitId};

    use super::*;
    use crate::scopegraph::{EdgeOrData, ScopeGraph};

    type Graph = ScopeGraph<Scope, char, String>;

    fn s(name: &str) -> Scope {
        Scope::new(UnitId::new("u"), name)
    }

    fn labels() -> Arc<Vec<char>> {
        Arc::new(vec!['E', 'P'])
    }

    // P* E? $
    fn lexical_wf() -> LabelWfRef<char> {
        LabelAutomaton::builder()
            .transition(0, 'P', 0)
            .transition(0, 'E', 1)
            .accept(0)
            .accept(1)
            .build()
    }

    fn e_then_data() -> LabelWfRef<char> {
        LabelAutomaton::builder().transition(0, 'E', 1).accept(1).build()
    }

    fn by_name() -> DataLeqRef<Scope, char, String> {
        Arc::new(DataLeqFn::new("same-name", |a: &String, b: &String| a == b))
    }

    #[test]
    fn test_single_edge_resolution() {
        let mut graph = Graph::new();
        graph.add_edge(s("r"), 'E', s("d"));
        graph.set_datum(s("d"), "x".into());

        let env = resolve_blocking(graph, labels(), s("r"), QueryParams::all(e_then_data())).unwrap();
        assert_eq!(env.len(), 1);
        let path = env.iter().next().unwrap();
        assert_eq!(path.datum(), "x");
        assert_eq!(path.path().scopes(), vec![s("r"), s("d")]);
    }

    #[test]
    fn test_cycles_are_cut() {
        let mut graph = Graph::new();
        graph.add_edge(s("a"), 'P', s("b"));
        graph.add_edge(s("b"), 'P', s("a"));
        graph.set_datum(s("a"), "a".into());
        graph.set_datum(s("b"), "b".into());

        let env = resolve_blocking(graph, labels(), s("a"), QueryParams::all(lexical_wf())).unwrap();
        assert_eq!(env.len(), 2);
        for path in env.iter() {
            let scopes = path.path().scopes();
            let mut unique = scopes.clone();
            unique.sort();
            unique.dedup();
            assert_eq!(unique.len(), scopes.len());
        }
    }

    #[test]
    fn test_preferred_label_shadows() {
        // E < P: declarations via E hide equally named ones via P
        let mut graph = Graph::new();
        graph.add_edge(s("inner"), 'E', s("d1"));
        graph.add_edge(s("inner"), 'P', s("outer"));
        graph.add_edge(s("outer"), 'E', s("d2"));
        graph.set_datum(s("d1"), "x".into());
        graph.set_datum(s("d2"), "x".into());

        let order: LabelOrderRef<char> = Arc::new(ExplicitOrder::new([(EdgeOrData::Edge('E'), EdgeOrData::Edge('P'))]));
        let wf = LabelAutomaton::builder()
            .transition(0, 'P', 0)
            .transition(0, 'E', 1)
            .accept(1)
            .build();
        let params = QueryParams::new(wf, order, Arc::new(AnyData), by_name());

        let env = resolve_blocking(graph, labels(), s("inner"), params).unwrap();
        assert_eq!(env.len(), 1);
        assert_eq!(env.iter().next().unwrap().path().scopes(), vec![s("inner"), s("d1")]);
        assert_eq!(env.rejected().len(), 1);
    }

    #[test]
    fn test_unshadowed_data_survive() {
        let mut graph = Graph::new();
        graph.add_edge(s("inner"), 'E', s("d1"));
        graph.add_edge(s("inner"), 'P', s("outer"));
        graph.add_edge(s("outer"), 'E', s("d2"));
        graph.set_datum(s("d1"), "x".into());
        graph.set_datum(s("d2"), "y".into());

        let order: LabelOrderRef<char> = Arc::new(ExplicitOrder::new([(EdgeOrData::Edge('E'), EdgeOrData::Edge('P'))]));
        let wf = LabelAutomaton::builder()
            .transition(0, 'P', 0)
            .transition(0, 'E', 1)
            .accept(1)
            .build();
        let params = QueryParams::new(wf, order, Arc::new(AnyData), by_name());

        let env = resolve_blocking(graph, labels(), s("inner"), params).unwrap();
        assert_eq!(env.len(), 2);
    }

    #[test]
    fn test_always_true_leq_short_circuits() {
        let mut graph = Graph::new();
        graph.add_edge(s("inner"), 'E', s("d1"));
        graph.add_edge(s("inner"), 'P', s("outer"));
        graph.add_edge(s("outer"), 'E', s("d2"));
        graph.set_datum(s("d1"), "x".into());
        graph.set_datum(s("d2"), "y".into());

        let order: LabelOrderRef<char> = Arc::new(ExplicitOrder::new([(EdgeOrData::Edge('E'), EdgeOrData::Edge('P'))]));
        let wf = LabelAutomaton::builder()
            .transition(0, 'P', 0)
            .transition(0, 'E', 1)
            .accept(1)
            .build();
        let params = QueryParams::new(wf, order, Arc::new(AnyData), Arc::new(AlwaysLeq));

        let env = resolve_blocking(graph, labels(), s("inner"), params).unwrap();
        assert_eq!(env.len(), 1);
        assert!(env.rejected().is_empty());
    }

    #[test]
    fn test_data_wf_filters() {
        let mut graph = Graph::new();
        graph.add_edge(s("r"), 'E', s("d1"));
        graph.add_edge(s("r"), 'E', s("d2"));
        graph.set_datum(s("d1"), "keep".into());
        graph.set_datum(s("d2"), "drop".into());

        let wf: DataWfRef<Scope, char, String> = Arc::new(DataWfFn::new("keep", |d: &String| d == "keep"));
        let env = resolve_blocking(graph, labels(), s("r"), QueryParams::unordered(e_then_data(), wf)).unwrap();
        assert_eq!(env.data().cloned().collect::<Vec<_>>(), vec!["keep".to_string()]);
    }

    #[test]
    fn test_shadow_is_idempotent() {
        let mut graph = Graph::new();
        graph.add_edge(s("r"), 'E', s("d1"));
        graph.add_edge(s("r"), 'E', s("d2"));
        graph.set_datum(s("d1"), "x".into());
        graph.set_datum(s("d2"), "y".into());
        let env = resolve_blocking(graph.clone(), labels(), s("r"), QueryParams::all(e_then_data())).unwrap();

        let params = QueryParams::new(e_then_data(), Arc::new(NoLabelOrder), Arc::new(AnyData), by_name());
        let resolution = NameResolution::new(labels(), Arc::new(NoLabelOrder), Arc::new(StaticContext::new(graph, params)));
        let shadowed = futures::executor::block_on(resolution.shadow_envs(env.clone(), env.clone())).unwrap();
        assert_eq!(shadowed, env);
    }
}

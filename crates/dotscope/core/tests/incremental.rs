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

//! Reuse of previous results across runs.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{Checker, Ctx, checker, data_of, init, one_step};
use dotscope_core::{Broker, ConfirmationMode, Incremental, QueryParams, Settings, TransitionTrace};

/// A unit that resolves `E` from its own scope and counts real runs.
fn local_unit(runs: Arc<AtomicUsize>) -> Checker<Vec<String>> {
    checker(move |ctx: Ctx<Vec<String>>, _roots| {
        let runs = Arc::clone(&runs);
        async move {
            if let Incremental::Reuse { result, .. } = ctx.run_incremental().await? {
                return anyhow::Ok(result);
            }
            runs.fetch_add(1, Ordering::SeqCst);
            let s = ctx.fresh_scope("s", &['E'], false, false)?;
            let d = ctx.fresh_scope("d", &[], true, false)?;
            ctx.set_datum(&d, "x".to_string())?;
            ctx.add_edge(&s, 'E', &d)?;
            ctx.close_edge(&s, 'E')?;
            let env = ctx.query(&s, QueryParams::all(one_step('E'))).await?;
            anyhow::Ok(data_of(&env))
        }
    })
}

fn reuses_unchanged_root(mode: ConfirmationMode) {
    init();
    let runs = Arc::new(AtomicUsize::new(0));
    let broker = Broker::new(Settings::incremental(mode), vec!['E']);

    let first = broker.run("root", local_unit(Arc::clone(&runs)), None).unwrap();
    assert_eq!(first.result, Some(vec!["x".to_string()]));
    assert_eq!(first.transition_trace, TransitionTrace::InitiallyStarted);
    assert_eq!(first.queries.len(), 1);

    let second = broker
        .run("root", local_unit(Arc::clone(&runs)), Some(first.clone()))
        .unwrap();
    assert!(second.is_ok(), "{:?}", second.all_failures());
    assert_eq!(second.result, first.result);
    assert_eq!(second.transition_trace, TransitionTrace::Released);
    assert_eq!(second.scope_graph, first.scope_graph);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unchanged_root_is_reused_trivial() {
    reuses_unchanged_root(ConfirmationMode::Trivial);
}

#[test]
fn test_unchanged_root_is_reused_lazy() {
    reuses_unchanged_root(ConfirmationMode::SimpleEnvironment);
}

#[test]
fn test_non_incremental_settings_always_run() {
    init();
    let runs = Arc::new(AtomicUsize::new(0));
    let broker = Broker::new(Settings::non_incremental(), vec!['E']);
    let first = broker.run("root", local_unit(Arc::clone(&runs)), None).unwrap();
    let second = broker.run("root", local_unit(Arc::clone(&runs)), Some(first)).unwrap();
    assert_eq!(second.transition_trace, TransitionTrace::InitiallyStarted);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

fn parent_of(child: Checker<Vec<String>>, changed: bool) -> Checker<Vec<String>> {
    checker(move |ctx: Ctx<Vec<String>>, _roots| {
        let child = Arc::clone(&child);
        async move {
            let sub = ctx.add("child", child, Vec::new(), changed).await?;
            anyhow::Ok(sub.result.unwrap_or_default())
        }
    })
}

#[test]
fn test_changed_sub_unit_runs_again() {
    init();
    let runs = Arc::new(AtomicUsize::new(0));
    let broker = Broker::new(Settings::incremental(ConfirmationMode::SimpleEnvironment), vec!['E']);

    let first = broker
        .run("root", parent_of(local_unit(Arc::clone(&runs)), false), None)
        .unwrap();
    let unchanged = broker
        .run("root", parent_of(local_unit(Arc::clone(&runs)), false), Some(first.clone()))
        .unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(
        unchanged.sub_unit_results["child"].transition_trace,
        TransitionTrace::Released
    );

    let changed = broker
        .run("root", parent_of(local_unit(Arc::clone(&runs)), true), Some(first))
        .unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(
        changed.sub_unit_results["child"].transition_trace,
        TransitionTrace::InitiallyStarted
    );
    assert_eq!(changed.result, Some(vec!["x".to_string()]));
}

/// What the parent adds next to `r -E-> d("x")` in the second run.
#[derive(Clone, Copy)]
enum Extra {
    Nothing,
    /// Another `r` scope first, so the shared root gets a new name.
    RenamedRoot,
    EmptyScope,
    Datum(&'static str),
}

/// A child that looks up `E` in the shared root of its parent.
fn lookup_child(runs: Arc<AtomicUsize>) -> Checker<Vec<String>> {
    checker(move |ctx: Ctx<Vec<String>>, roots| {
        let runs = Arc::clone(&runs);
        async move {
            if let Incremental::Reuse { result, .. } = ctx.run_incremental().await? {
                return anyhow::Ok(result);
            }
            runs.fetch_add(1, Ordering::SeqCst);
            let r = &roots[0];
            ctx.init_scope(r, &[], false)?;
            let env = ctx.query(r, QueryParams::all(one_step('E'))).await?;
            anyhow::Ok(data_of(&env))
        }
    })
}

fn declaring_parent(child: Checker<Vec<String>>, extra: Extra) -> Checker<Vec<String>> {
    checker(move |ctx: Ctx<Vec<String>>, _roots| {
        let child = Arc::clone(&child);
        async move {
            if let Extra::RenamedRoot = extra {
                ctx.fresh_scope("r", &[], false, false)?;
            }
            let r = ctx.fresh_scope("r", &['E'], false, true)?;
            let d = ctx.fresh_scope("d", &[], true, false)?;
            ctx.set_datum(&d, "x".to_string())?;
            ctx.add_edge(&r, 'E', &d)?;
            match extra {
                Extra::Nothing | Extra::RenamedRoot => {}
                Extra::EmptyScope => {
                    let e = ctx.fresh_scope("e", &[], false, false)?;
                    ctx.add_edge(&r, 'E', &e)?;
                }
                Extra::Datum(datum) => {
                    let e = ctx.fresh_scope("e", &[], true, false)?;
                    ctx.set_datum(&e, datum.to_string())?;
                    ctx.add_edge(&r, 'E', &e)?;
                }
            }
            let sub = ctx.add("child", child, vec![r.clone()], false);
            ctx.close_edge(&r, 'E')?;
            ctx.close_scope(&r)?;
            let sub = sub.await?;
            anyhow::Ok(sub.result.unwrap_or_default())
        }
    })
}

fn rerun_with(mode: ConfirmationMode, extra: Extra) -> (Vec<String>, TransitionTrace, usize) {
    init();
    let runs = Arc::new(AtomicUsize::new(0));
    let broker = Broker::new(Settings::incremental(mode), vec!['E']);
    let first = broker
        .run("root", declaring_parent(lookup_child(Arc::clone(&runs)), Extra::Nothing), None)
        .unwrap();
    assert_eq!(first.result, Some(vec!["x".to_string()]));

    let second = broker
        .run("root", declaring_parent(lookup_child(Arc::clone(&runs)), extra), Some(first))
        .unwrap();
    assert!(second.is_ok(), "{:?}", second.all_failures());
    let child = &second.sub_unit_results["child"];
    (
        second.result.clone().unwrap_or_default(),
        child.transition_trace,
        runs.load(Ordering::SeqCst),
    )
}

#[test]
fn test_unchanged_parent_keeps_child() {
    for mode in [ConfirmationMode::Trivial, ConfirmationMode::SimpleEnvironment] {
        let (result, trace, runs) = rerun_with(mode, Extra::Nothing);
        assert_eq!(result, vec!["x".to_string()]);
        assert_eq!(trace, TransitionTrace::Released);
        assert_eq!(runs, 1);
    }
}

#[test]
fn test_renamed_shared_root_keeps_child() {
    for mode in [ConfirmationMode::Trivial, ConfirmationMode::SimpleEnvironment] {
        let (result, trace, runs) = rerun_with(mode, Extra::RenamedRoot);
        assert_eq!(result, vec!["x".to_string()]);
        assert_eq!(trace, TransitionTrace::Released, "{:?}", mode);
        assert_eq!(runs, 1, "{:?}", mode);
    }
}

#[test]
fn test_edge_to_empty_scope_is_confirmed_lazily() {
    let (result, trace, runs) = rerun_with(ConfirmationMode::SimpleEnvironment, Extra::EmptyScope);
    assert_eq!(result, vec!["x".to_string()]);
    assert_eq!(trace, TransitionTrace::Released);
    assert_eq!(runs, 1);
}

#[test]
fn test_new_declaration_restarts_child() {
    for mode in [ConfirmationMode::Trivial, ConfirmationMode::SimpleEnvironment] {
        let (result, trace, runs) = rerun_with(mode, Extra::Datum("z"));
        assert_eq!(result, vec!["x".to_string(), "z".to_string()]);
        assert_eq!(trace, TransitionTrace::Restarted);
        assert_eq!(runs, 2);
    }
}

#[test]
fn test_reused_parent_replays_its_sub_units() {
    init();
    let runs = Arc::new(AtomicUsize::new(0));
    let parent_runs = Arc::new(AtomicUsize::new(0));
    let make_root = |runs: Arc<AtomicUsize>, parent_runs: Arc<AtomicUsize>| {
        let child = local_unit(runs);
        checker(move |ctx: Ctx<Vec<String>>, _roots| {
            let child = Arc::clone(&child);
            let parent_runs = Arc::clone(&parent_runs);
            async move {
                if let Incremental::Reuse { result, .. } = ctx.run_incremental().await? {
                    return anyhow::Ok(result);
                }
                parent_runs.fetch_add(1, Ordering::SeqCst);
                let sub = ctx.add("child", child, Vec::new(), false).await?;
                anyhow::Ok(sub.result.unwrap_or_default())
            }
        })
    };
    let broker = Broker::new(Settings::incremental(ConfirmationMode::SimpleEnvironment), vec!['E']);
    let first = broker
        .run("root", make_root(Arc::clone(&runs), Arc::clone(&parent_runs)), None)
        .unwrap();
    let second = broker
        .run("root", make_root(Arc::clone(&runs), Arc::clone(&parent_runs)), Some(first.clone()))
        .unwrap();

    assert_eq!(parent_runs.load(Ordering::SeqCst), 1);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(second.transition_trace, TransitionTrace::Released);
    let child = &second.sub_unit_results["child"];
    assert_eq!(child.transition_trace, TransitionTrace::Released);
    assert_eq!(child.result, first.sub_unit_results["child"].result);
    assert_eq!(second.total_scope_graph(), first.total_scope_graph());
}

#[tokio::test]
async fn test_run_async_matches_blocking_run() {
    init();
    let runs = Arc::new(AtomicUsize::new(0));
    let broker = Broker::new(Settings::incremental(ConfirmationMode::Trivial), vec!['E']);
    let first = broker.run_async("root", local_unit(Arc::clone(&runs)), None).await.unwrap();
    let second = broker
        .run_async("root", local_unit(Arc::clone(&runs)), Some(first))
        .await
        .unwrap();
    assert_eq!(second.transition_trace, TransitionTrace::Released);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

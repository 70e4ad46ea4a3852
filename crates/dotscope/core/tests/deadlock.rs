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

//! Deadlock resolution and stuck units.

mod common;

use std::sync::Arc;

use common::{Ctx, checker, data_of, init, one_step};
use dotscope_core::{Broker, QueryParams, Scope, Settings};

#[test]
fn test_query_on_own_open_label_is_released_by_resolution() {
    init();
    let root = checker(|ctx: Ctx<Vec<String>>, _roots| async move {
        let s = ctx.fresh_scope("s", &['E'], false, false)?;
        // `E` is never closed: only deadlock resolution can answer this.
        let env = ctx.query(&s, QueryParams::all(one_step('E'))).await?;
        anyhow::Ok(data_of(&env))
    });

    let broker = Broker::new(Settings::non_incremental(), vec!['E']);
    let (result, stats) = broker.run_with_statistics("root", root, None).unwrap();
    assert!(result.is_ok(), "{:?}", result.all_failures());
    assert_eq!(result.result, Some(Vec::new()));
    assert!(stats.deadlock.total_deadlocks_detected >= 1);
    assert!(stats.deadlock.tokens_granted >= 1);
}

#[test]
fn test_pending_query_answers_with_contents_at_resolution() {
    init();
    // The child adds an edge but never closes its label on the shared scope.
    let child = checker(|ctx: Ctx<Vec<String>>, roots: Vec<Scope>| async move {
        let r = &roots[0];
        ctx.init_scope(r, &['E'], false)?;
        let s = ctx.fresh_scope("s", &[], true, false)?;
        ctx.set_datum(&s, "late".to_string())?;
        ctx.add_edge(r, 'E', &s)?;
        anyhow::Ok(Vec::new())
    });
    let root = checker(move |ctx: Ctx<Vec<String>>, _roots| {
        let child = Arc::clone(&child);
        async move {
            let r = ctx.fresh_scope("r", &['E'], false, true)?;
            let sub = ctx.add("child", child, vec![r.clone()], false);
            ctx.close_edge(&r, 'E')?;
            ctx.close_scope(&r)?;
            let env = ctx.query(&r, QueryParams::all(one_step('E'))).await?;
            sub.await?;
            anyhow::Ok(data_of(&env))
        }
    });

    let broker = Broker::new(Settings::non_incremental(), vec!['E']);
    let (result, stats) = broker.run_with_statistics("root", root, None).unwrap();
    assert!(result.is_ok(), "{:?}", result.all_failures());
    assert_eq!(result.result, Some(vec!["late".to_string()]));
    assert!(stats.deadlock.tokens_granted >= 1);
    assert_eq!(stats.units, 2);
}

#[test]
fn test_stuck_checker_fails_instead_of_hanging() {
    init();
    let root = checker(|_ctx: Ctx<Vec<String>>, _roots| async move {
        futures::future::pending::<()>().await;
        anyhow::Ok(Vec::new())
    });

    let broker = Broker::new(Settings::non_incremental(), vec!['E']);
    let result = broker.run("root", root, None).unwrap();
    assert!(!result.is_ok());
    assert_eq!(result.result, None);
    assert!(result.failures.iter().any(|f| f.contains("stuck")));
}

#[test]
fn test_stuck_child_does_not_block_parent_result() {
    init();
    let child = checker(|_ctx: Ctx<Vec<String>>, _roots: Vec<Scope>| async move {
        futures::future::pending::<()>().await;
        anyhow::Ok(Vec::new())
    });
    let root = checker(move |ctx: Ctx<Vec<String>>, _roots| {
        let child = Arc::clone(&child);
        async move {
            let sub = ctx.add("child", child, Vec::new(), false).await?;
            anyhow::Ok(vec![format!("child failures: {}", sub.failures.len())])
        }
    });

    let broker = Broker::new(Settings::non_incremental(), vec!['E']);
    let result = broker.run("root", root, None).unwrap();
    assert_eq!(result.result, Some(vec!["child failures: 1".to_string()]));
    let failures = result.all_failures();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].starts_with("root/child: "));
}

//! Dependency Graph (C2, §4.2): restricts the full recipe dependency graph
//! to packages under consideration this cycle, promoting unresolved
//! internal dependencies into the cycle as they're discovered.
//!
//! Grounded on the teacher's `build_set_graph.rs`, which builds a global
//! `petgraph` graph from `.SRCINFO` dependency lists and then walks it
//! per architecture. The graph-construction shape is kept; architecture
//! fan-out and `.SRCINFO` parsing are dropped since recipes here already
//! expose a flat internal dependency list.

use std::collections::{HashMap, HashSet};

use itertools::Itertools;
use tracing::warn;

use crate::{
    Pkgbase,
    db::Database,
    notify::{NotificationSink, Report},
    reason::{BuildReason, BuildReasons},
    recipe::Recipe,
};

/// `dep_building_map` from §4.2: for every package considered this cycle,
/// the set of internal dependencies the sorter must order it after.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    pub dep_building_map: HashMap<Pkgbase, HashSet<Pkgbase>>,
}

/// Builds [`DependencyGraph`] from the current `build_reasons` map, mutating
/// it in place as dependencies get promoted via `Depended` (§4.2).
pub async fn build_dependency_graph(
    recipes: &HashMap<Pkgbase, Recipe>,
    build_reasons: &mut HashMap<Pkgbase, BuildReasons>,
    database: &dyn Database,
    notifier: &dyn NotificationSink,
) -> DependencyGraph {
    let mut dep_building_map: HashMap<Pkgbase, HashSet<Pkgbase>> = HashMap::new();
    let mut nonexistent: HashMap<Pkgbase, Vec<Pkgbase>> = HashMap::new();

    let mut queue: Vec<Pkgbase> = build_reasons.keys().cloned().collect();
    let mut visited: HashSet<Pkgbase> = HashSet::new();

    while let Some(p) = queue.pop() {
        if !visited.insert(p.clone()) {
            continue;
        }

        let Some(recipe) = recipes.get(&p) else {
            continue;
        };

        let mut deps_of_p = HashSet::new();
        for dep in &recipe.dependencies {
            deps_of_p.insert(dep.target.clone());

            if dep.resolve() {
                continue;
            }

            if !recipes.contains_key(&dep.target) {
                nonexistent.entry(p.clone()).or_default().push(dep.target.clone());
                continue;
            }

            if database
                .is_last_build_failed(&dep.target)
                .await
                .unwrap_or(false)
            {
                warn!(
                    pkgbase = %dep.target,
                    depender = %p,
                    "skipping Depended promotion: dependency's last build failed"
                );
                continue;
            }

            let newly_promoted = !build_reasons.contains_key(&dep.target);
            build_reasons
                .entry(dep.target.clone())
                .or_default()
                .push(BuildReason::Depended(p.clone()));

            if newly_promoted {
                queue.push(dep.target.clone());
            }
        }

        dep_building_map.insert(p.clone(), deps_of_p);
    }

    // Sorted so notifications (and any log output derived from them) come
    // out in a deterministic order rather than `HashMap`'s iteration order.
    for (pkgbase, missing) in nonexistent.iter().sorted_by_key(|(p, _)| (*p).clone()) {
        notifier
            .notify(Report::missing_dependencies(pkgbase.clone(), missing.clone()))
            .await
            .ok();
    }

    DependencyGraph { dep_building_map }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::NullDatabase,
        notify::NullNotificationSink,
        recipe::Dependency,
    };

    fn recipe_with_deps(deps: Vec<Dependency>) -> Recipe {
        Recipe {
            dependencies: deps,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn unresolved_internal_dependency_is_promoted() {
        let mut recipes = HashMap::new();
        recipes.insert(
            Pkgbase::from("pkga"),
            recipe_with_deps(vec![Dependency::unresolved("pkgb", "pkgb")]),
        );
        recipes.insert(Pkgbase::from("pkgb"), recipe_with_deps(vec![]));

        let mut build_reasons = HashMap::new();
        build_reasons.insert(Pkgbase::from("pkga"), BuildReasons(vec![BuildReason::Cmdline]));

        let graph = build_dependency_graph(
            &recipes,
            &mut build_reasons,
            &NullDatabase,
            &NullNotificationSink,
        )
        .await;

        assert!(build_reasons.contains_key(&Pkgbase::from("pkgb")));
        assert!(matches!(
            build_reasons[&Pkgbase::from("pkgb")].0[0],
            BuildReason::Depended(ref d) if *d == Pkgbase::from("pkga")
        ));
        assert!(graph.dep_building_map[&Pkgbase::from("pkga")].contains(&Pkgbase::from("pkgb")));
    }

    #[tokio::test]
    async fn resolved_dependency_is_not_promoted() {
        let mut recipes = HashMap::new();
        recipes.insert(
            Pkgbase::from("pkga"),
            recipe_with_deps(vec![Dependency::always_resolved("pkgb", "pkgb")]),
        );
        recipes.insert(Pkgbase::from("pkgb"), recipe_with_deps(vec![]));

        let mut build_reasons = HashMap::new();
        build_reasons.insert(Pkgbase::from("pkga"), BuildReasons(vec![BuildReason::Cmdline]));

        build_dependency_graph(
            &recipes,
            &mut build_reasons,
            &NullDatabase,
            &NullNotificationSink,
        )
        .await;

        assert!(!build_reasons.contains_key(&Pkgbase::from("pkgb")));
    }

    #[tokio::test]
    async fn nonexistent_dependency_is_reported_but_not_promoted() {
        let mut recipes = HashMap::new();
        recipes.insert(
            Pkgbase::from("pkga"),
            recipe_with_deps(vec![Dependency::unresolved("ghost", "ghost")]),
        );

        let mut build_reasons = HashMap::new();
        build_reasons.insert(Pkgbase::from("pkga"), BuildReasons(vec![BuildReason::Cmdline]));

        build_dependency_graph(
            &recipes,
            &mut build_reasons,
            &NullDatabase,
            &NullNotificationSink,
        )
        .await;

        assert!(!build_reasons.contains_key(&Pkgbase::from("ghost")));
    }
}

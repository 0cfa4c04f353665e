//! Module dependency graph and level planning.
//!
//! An edge `A → B` means "A imports B". Imported modules are healed first:
//! a module's level is 0 when it imports nothing in the healing set, and
//! otherwise one more than the deepest level among its in-set imports.
//!
//! Modules on an import cycle (strongly connected component of size > 1, or
//! a self-import) are excluded from the plan and reported separately. Edges
//! into excluded modules are ignored when levelling the rest.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use healing_state::ModuleId;

use crate::domain::ModuleRecord;

/// Directed import graph restricted to one healing set.
#[derive(Debug, Clone, Default)]
pub struct ModuleGraph {
    records: BTreeMap<ModuleId, ModuleRecord>,
    /// `module → {modules it imports}`, in-set only.
    imports: BTreeMap<ModuleId, BTreeSet<ModuleId>>,
    /// `module → {modules importing it}`, in-set only.
    dependents: BTreeMap<ModuleId, BTreeSet<ModuleId>>,
}

impl ModuleGraph {
    /// Build the graph from module records.
    ///
    /// Imports naming modules outside the set are dropped. Each returned
    /// record has `dependents` filled from the in-set edges. Duplicate ids
    /// keep the last record.
    pub fn build(records: impl IntoIterator<Item = ModuleRecord>) -> Self {
        let records: BTreeMap<ModuleId, ModuleRecord> =
            records.into_iter().map(|r| (r.id.clone(), r)).collect();

        let mut imports: BTreeMap<ModuleId, BTreeSet<ModuleId>> = BTreeMap::new();
        let mut dependents: BTreeMap<ModuleId, BTreeSet<ModuleId>> = BTreeMap::new();
        for id in records.keys() {
            imports.entry(id.clone()).or_default();
            dependents.entry(id.clone()).or_default();
        }

        for (id, record) in &records {
            for target in &record.imports {
                if !records.contains_key(target) {
                    continue;
                }
                imports.entry(id.clone()).or_default().insert(target.clone());
                dependents
                    .entry(target.clone())
                    .or_default()
                    .insert(id.clone());
            }
        }

        let mut graph = Self {
            records,
            imports,
            dependents,
        };
        for (id, record) in graph.records.iter_mut() {
            record.dependents = graph
                .dependents
                .get(id)
                .map(|d| d.iter().cloned().collect())
                .unwrap_or_default();
        }
        graph
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, module: &ModuleId) -> bool {
        self.records.contains_key(module)
    }

    pub fn record(&self, module: &ModuleId) -> Option<&ModuleRecord> {
        self.records.get(module)
    }

    pub fn records(&self) -> impl Iterator<Item = &ModuleRecord> {
        self.records.values()
    }

    /// In-set modules that `module` imports.
    pub fn imports_of(&self, module: &ModuleId) -> Vec<ModuleId> {
        self.imports
            .get(module)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// In-set modules that import `module`.
    pub fn dependents_of(&self, module: &ModuleId) -> Vec<ModuleId> {
        self.dependents
            .get(module)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Import cycles, each sorted, in ascending order of first member.
    ///
    /// Iterative Tarjan so deep import chains cannot overflow the stack.
    pub fn cycles(&self) -> Vec<Vec<ModuleId>> {
        let ids: Vec<&ModuleId> = self.records.keys().collect();
        let index_of: HashMap<&ModuleId, usize> =
            ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let adjacency: Vec<Vec<usize>> = ids
            .iter()
            .map(|id| {
                self.imports
                    .get(*id)
                    .map(|targets| targets.iter().filter_map(|t| index_of.get(t).copied()).collect())
                    .unwrap_or_default()
            })
            .collect();

        let n = ids.len();
        let mut index = vec![usize::MAX; n];
        let mut lowlink = vec![0usize; n];
        let mut on_stack = vec![false; n];
        let mut stack: Vec<usize> = Vec::new();
        let mut next_index = 0usize;
        let mut components: Vec<Vec<usize>> = Vec::new();

        for root in 0..n {
            if index[root] != usize::MAX {
                continue;
            }
            // (node, next edge to examine)
            let mut work: Vec<(usize, usize)> = vec![(root, 0)];
            index[root] = next_index;
            lowlink[root] = next_index;
            next_index += 1;
            stack.push(root);
            on_stack[root] = true;

            while let Some(frame) = work.last_mut() {
                let v = frame.0;
                if let Some(&w) = adjacency[v].get(frame.1) {
                    frame.1 += 1;
                    if index[w] == usize::MAX {
                        index[w] = next_index;
                        lowlink[w] = next_index;
                        next_index += 1;
                        stack.push(w);
                        on_stack[w] = true;
                        work.push((w, 0));
                    } else if on_stack[w] {
                        lowlink[v] = lowlink[v].min(index[w]);
                    }
                    continue;
                }

                work.pop();
                if let Some(&(parent, _)) = work.last() {
                    lowlink[parent] = lowlink[parent].min(lowlink[v]);
                }
                if lowlink[v] == index[v] {
                    let mut component = Vec::new();
                    while let Some(w) = stack.pop() {
                        on_stack[w] = false;
                        component.push(w);
                        if w == v {
                            break;
                        }
                    }
                    components.push(component);
                }
            }
        }

        let mut cycles: Vec<Vec<ModuleId>> = components
            .into_iter()
            .filter(|c| c.len() > 1 || adjacency[c[0]].contains(&c[0]))
            .map(|c| {
                let mut members: Vec<ModuleId> = c.into_iter().map(|i| ids[i].clone()).collect();
                members.sort();
                members
            })
            .collect();
        cycles.sort();
        cycles
    }

    /// Partition the acyclic part of the graph into dependency levels.
    pub fn level_plan(&self) -> LevelPlan {
        let cycles = self.cycles();
        let excluded: BTreeSet<ModuleId> = cycles.iter().flatten().cloned().collect();

        // Kahn over "imports" edges: a module becomes ready once all of its
        // remaining imports have been levelled.
        let mut remaining: BTreeMap<&ModuleId, usize> = BTreeMap::new();
        for id in self.records.keys().filter(|id| !excluded.contains(*id)) {
            let pending = self
                .imports
                .get(id)
                .map(|targets| targets.iter().filter(|t| !excluded.contains(*t)).count())
                .unwrap_or(0);
            remaining.insert(id, pending);
        }

        let mut level_of: BTreeMap<ModuleId, usize> = BTreeMap::new();
        let mut levels: Vec<Level> = Vec::new();
        let mut frontier: Vec<&ModuleId> = remaining
            .iter()
            .filter(|(_, &n)| n == 0)
            .map(|(&id, _)| id)
            .collect();

        while !frontier.is_empty() {
            let index = levels.len();
            let mut next: BTreeSet<&ModuleId> = BTreeSet::new();
            for id in &frontier {
                level_of.insert((*id).clone(), index);
                for dependent in self.dependents.get(*id).into_iter().flatten() {
                    if let Some(n) = remaining.get_mut(dependent) {
                        *n -= 1;
                        if *n == 0 {
                            next.insert(dependent);
                        }
                    }
                }
            }
            levels.push(Level {
                index,
                modules: frontier.iter().map(|id| (*id).clone()).collect(),
            });
            frontier = next.into_iter().collect();
        }

        LevelPlan {
            levels,
            cycles,
            level_of,
        }
    }
}

/// One group of modules that may be healed concurrently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub index: usize,
    /// Sorted module ids.
    pub modules: Vec<ModuleId>,
}

/// Ordered levels plus the modules excluded for being on a cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelPlan {
    pub levels: Vec<Level>,
    pub cycles: Vec<Vec<ModuleId>>,
    #[serde(skip)]
    level_of: BTreeMap<ModuleId, usize>,
}

impl LevelPlan {
    pub fn level_of(&self, module: &ModuleId) -> Option<usize> {
        self.level_of.get(module).copied()
    }

    /// All modules on a cycle, sorted.
    pub fn excluded(&self) -> Vec<ModuleId> {
        let set: BTreeSet<&ModuleId> = self.cycles.iter().flatten().collect();
        set.into_iter().cloned().collect()
    }

    pub fn scheduled_count(&self) -> usize {
        self.levels.iter().map(|l| l.modules.len()).sum()
    }

    /// Check that every in-set import of a scheduled module sits at a strictly
    /// lower level. Returns the first offending `(module, import)` pair.
    pub fn verify(&self, graph: &ModuleGraph) -> Result<(), (ModuleId, ModuleId)> {
        for level in &self.levels {
            for module in &level.modules {
                for import in graph.imports_of(module) {
                    if let Some(l) = self.level_of(&import) {
                        if l >= level.index {
                            return Err((module.clone(), import));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

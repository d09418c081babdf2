use std::fmt;

use serde::Serialize;

use super::handle::ResourceId;

/// Inclusive range of execution slots in which a texture is referenced.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Lifetime {
    pub start: usize,
    pub end: usize,
}

impl Lifetime {
    pub fn at(index: usize) -> Self {
        Self {
            start: index,
            end: index,
        }
    }

    pub fn intersects(&self, other: &Lifetime) -> bool {
        self.end >= other.start && other.end >= self.start
    }

    pub fn contains(&self, index: usize) -> bool {
        self.start <= index && index <= self.end
    }

    fn fold(&mut self, index: usize) {
        self.start = self.start.min(index);
        self.end = self.end.max(index);
    }
}

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Lifetimes of graph-created and imported textures, kept in separate tables.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LifetimeTable {
    graph: Vec<Option<Lifetime>>,
    imported: Vec<Option<Lifetime>>,
}

impl LifetimeTable {
    pub fn new(graph_count: usize, imported_count: usize) -> Self {
        Self {
            graph: vec![None; graph_count],
            imported: vec![None; imported_count],
        }
    }

    /// Folds one reference at execution slot `index` into `resource`'s range.
    pub fn record(&mut self, resource: ResourceId, index: usize) {
        let slot = match resource {
            ResourceId::Graph(i) => &mut self.graph[i],
            ResourceId::Import(i) => &mut self.imported[i],
        };

        match slot {
            Some(lifetime) => lifetime.fold(index),
            None => *slot = Some(Lifetime::at(index)),
        }
    }

    pub fn get(&self, resource: ResourceId) -> Option<Lifetime> {
        match resource {
            ResourceId::Graph(i) => self.graph.get(i).copied().flatten(),
            ResourceId::Import(i) => self.imported.get(i).copied().flatten(),
        }
    }

    pub fn graph(&self) -> &[Option<Lifetime>] {
        &self.graph
    }

    pub fn imported(&self) -> &[Option<Lifetime>] {
        &self.imported
    }
}

/// Walks passes in execution order and folds every reference they make.
pub fn analyze<I>(graph_count: usize, imported_count: usize, references: I) -> LifetimeTable
where
    I: IntoIterator<Item = (usize, ResourceId)>,
{
    let mut table = LifetimeTable::new(graph_count, imported_count);
    for (final_index, resource) in references {
        table.record(resource, final_index);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersection_is_inclusive() {
        let a = Lifetime { start: 0, end: 2 };
        let b = Lifetime { start: 2, end: 5 };
        let c = Lifetime { start: 3, end: 5 };

        assert!(a.intersects(&b));
        assert!(b.intersects(&a));
        assert!(!a.intersects(&c));
        assert!(!c.intersects(&a));
    }

    #[test]
    fn references_widen_the_range() {
        let table = analyze(
            2,
            1,
            [
                (0, ResourceId::Graph(0)),
                (3, ResourceId::Graph(0)),
                (1, ResourceId::Graph(0)),
                (2, ResourceId::Import(0)),
            ],
        );

        assert_eq!(table.get(ResourceId::Graph(0)), Some(Lifetime { start: 0, end: 3 }));
        assert_eq!(table.get(ResourceId::Graph(1)), None);
        assert_eq!(table.get(ResourceId::Import(0)), Some(Lifetime::at(2)));
        assert!(table.get(ResourceId::Graph(0)).unwrap().contains(1));
    }

    #[test]
    fn display_is_bracketed() {
        assert_eq!(Lifetime { start: 1, end: 4 }.to_string(), "[1, 4]");
    }
}

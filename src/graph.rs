//! Labelled directed graph keyed by a hashable vertex id.
//!
//! The LTL driver uses it as the product-graph cache: successors are held by
//! id, never by pointer, so revisiting a vertex does not re-advance the
//! evaluator.

use std::collections::HashMap;
use std::fmt::{self, Write};
use std::hash::Hash;

struct Vertex<I, V, E> {
    info: V,
    successors: Vec<I>,
    edges: Vec<E>,
}

pub struct Graph<I, V = (), E = ()> {
    vertices: HashMap<I, Vertex<I, V, E>>,
}

impl<I, V, E> Default for Graph<I, V, E> {
    fn default() -> Self {
        Graph {
            vertices: HashMap::new(),
        }
    }
}

impl<I: Eq + Hash + Clone, V, E> Graph<I, V, E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a vertex; returns false if it already exists.
    pub fn add_vertex(&mut self, id: I, info: V) -> bool {
        match self.vertices.entry(id) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(Vertex {
                    info,
                    successors: Vec::new(),
                    edges: Vec::new(),
                });
                true
            }
        }
    }

    /// Appends an edge; returns false when the source vertex is missing.
    pub fn add_edge(&mut self, from: &I, to: I, label: E) -> bool {
        match self.vertices.get_mut(from) {
            Some(vertex) => {
                vertex.successors.push(to);
                vertex.edges.push(label);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &I) -> bool {
        self.vertices.contains_key(id)
    }

    pub fn successors(&self, id: &I) -> &[I] {
        self.vertices
            .get(id)
            .map(|v| v.successors.as_slice())
            .unwrap_or(&[])
    }

    pub fn edges(&self, id: &I) -> &[E] {
        self.vertices
            .get(id)
            .map(|v| v.edges.as_slice())
            .unwrap_or(&[])
    }

    pub fn info(&self, id: &I) -> Option<&V> {
        self.vertices.get(id).map(|v| &v.info)
    }

    pub fn info_mut(&mut self, id: &I) -> Option<&mut V> {
        self.vertices.get_mut(id).map(|v| &mut v.info)
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn for_each_info_mut(&mut self, mut f: impl FnMut(&mut V)) {
        for vertex in self.vertices.values_mut() {
            f(&mut vertex.info);
        }
    }

    /// Graphviz dump; formatting of ids, labels and styles is the caller's.
    pub fn to_dot(
        &self,
        out: &mut String,
        id_format: impl Fn(&I) -> String,
        label_format: impl Fn(&I) -> String,
        style_format: impl Fn(&I) -> String,
    ) -> fmt::Result {
        writeln!(out, "digraph state_space {{")?;
        for (id, vertex) in &self.vertices {
            writeln!(
                out,
                "\t{}[label=\"{}\"{}]",
                id_format(id),
                label_format(id),
                style_format(id)
            )?;
            for succ in &vertex.successors {
                writeln!(out, "\t{} -> {}", id_format(id), id_format(succ))?;
            }
        }
        writeln!(out, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edges_keep_labels_aligned() {
        let mut g: Graph<u32, char, &str> = Graph::new();
        assert!(g.add_vertex(1, 'a'));
        assert!(!g.add_vertex(1, 'b'));
        g.add_vertex(2, 'b');

        assert!(g.add_edge(&1, 2, "x"));
        assert!(g.add_edge(&1, 1, "loop"));
        assert!(!g.add_edge(&9, 1, "missing"));

        assert_eq!(g.successors(&1), &[2, 1]);
        assert_eq!(g.edges(&1), &["x", "loop"]);
        assert_eq!(g.info(&1), Some(&'a'));
    }

    #[test]
    fn info_mut_updates_in_place() {
        let mut g: Graph<&str, u32> = Graph::new();
        g.add_vertex("v", 0);
        if let Some(info) = g.info_mut(&"v") {
            *info = 7;
        }
        assert_eq!(g.info(&"v"), Some(&7));
        g.for_each_info_mut(|i| *i += 1);
        assert_eq!(g.info(&"v"), Some(&8));
    }

    #[test]
    fn dot_output_lists_vertices_and_edges() {
        let mut g: Graph<u32> = Graph::new();
        g.add_vertex(1, ());
        g.add_vertex(2, ());
        g.add_edge(&1, 2, ());
        let mut out = String::new();
        g.to_dot(
            &mut out,
            |id| format!("v{id}"),
            |id| format!("{id}"),
            |_| String::new(),
        )
        .unwrap();
        assert!(out.contains("digraph state_space"));
        assert!(out.contains("v1 -> v2"));
    }
}

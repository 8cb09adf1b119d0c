//! Transitive closure of the is-a hierarchy, kept per branch and form.

mod graph;
mod index;
mod query_concept;

pub use graph::{GraphBuilder, GraphError, Node, MAX_CLOSURE_DEPTH, UPDATED_CHECK_DEPTH};
pub use index::SemanticIndexService;
pub use query_concept::QueryConcept;

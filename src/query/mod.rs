// Read-side queries over the code graph

pub mod engine;

pub use engine::{Hierarchy, QueryEngine, QueryResult};

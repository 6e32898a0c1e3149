pub mod document;
pub mod graph;
pub mod provider;

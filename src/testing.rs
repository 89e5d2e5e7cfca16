//! Testing utilities for tuplestream pipelines.
//!
//! - **Assertions**: compare pipeline output with expected tuples
//! - **Fixtures**: small datasets for join and ordering scenarios
//!
//! # Quick Start
//!
//! ```
//! use tuplestream::testing::*;
//! use tuplestream::{fields, tuple};
//!
//! # fn main() -> anyhow::Result<()> {
//! let p = TestPipeline::new();
//! let out = p
//!     .source("n", fields!["n"], vec![tuple![1], tuple![2]])
//!     .filter("even", |t| t.get(0).and_then(|v| v.as_f64()) == Some(2.0))
//!     .collect_seq()?;
//! assert_tuples_equal(&out, &[tuple![2]]);
//! # Ok(())
//! # }
//! ```

pub mod assertions;
pub mod fixtures;

pub use assertions::*;
pub use fixtures::*;

use crate::Pipeline;
use std::fmt::Write as _;

/// A [`Pipeline`] with graph inspection helpers for tests.
#[derive(Clone, Default)]
pub struct TestPipeline {
    pipeline: Pipeline,
}

impl TestPipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.pipeline.node_count()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.pipeline.edge_count()
    }

    /// One line per node: id, kind, name and upstream ids.
    #[must_use]
    pub fn describe_graph(&self) -> String {
        let mut out = String::new();
        for entry in self.pipeline.snapshot() {
            let inputs: Vec<String> = entry.inputs.iter().map(ToString::to_string).collect();
            let _ = writeln!(
                out,
                "{} {} '{}' <- [{}]",
                entry.id,
                entry.node.label(),
                entry.node.name(),
                inputs.join(", ")
            );
        }
        out
    }

    pub fn debug_print_graph(&self) {
        println!("{} nodes, {} edges", self.node_count(), self.edge_count());
        print!("{}", self.describe_graph());
    }
}

impl std::ops::Deref for TestPipeline {
    type Target = Pipeline;

    fn deref(&self) -> &Self::Target {
        &self.pipeline
    }
}

impl AsRef<Pipeline> for TestPipeline {
    fn as_ref(&self) -> &Pipeline {
        &self.pipeline
    }
}

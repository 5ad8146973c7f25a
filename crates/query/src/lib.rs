//! Rivulet Query - Query IR, builder, optimizer and pipeline compiler.
//!
//! This crate provides the relational layer of Rivulet:
//!
//! - `ir`: immutable IR nodes (`Query`, `Expr`, join/order/select clauses)
//!   plus expression constructor helpers
//! - `builder`: the immutable fluent `QueryBuilder`
//! - `eval`: the scalar evaluator (comparisons, logic, strings, arithmetic,
//!   LIKE) with compile-time validation
//! - `optimizer`: rewrites where conjunctions into index probes plus a
//!   residual predicate
//! - `compile`: turns the IR into an incremental `Pipeline` over keyed
//!   multiset deltas
//!
//! # Example
//!
//! ```rust
//! use rivulet_query::ir::{col, eq, gt, lit, CollectionRef};
//! use rivulet_query::{compile, query};
//!
//! let users = CollectionRef::new(1, "users");
//! let q = query()
//!     .from("u", users)
//!     .unwrap()
//!     .where_(gt(col(["u", "age"]), lit(25)))
//!     .build();
//!
//! let pipeline = compile(&q).unwrap();
//! assert_eq!(pipeline.inputs().len(), 1);
//! ```

#![no_std]

extern crate alloc;

pub mod builder;
pub mod compile;
pub mod eval;
pub mod ir;
pub mod optimizer;

pub use builder::{query, QueryBuilder};
pub use compile::{compile, Pipeline, PipelineInput};
pub use eval::{compare_values, eval, eval_predicate, validate_expr};
pub use ir::{CollectionRef, Expr, Query};
pub use optimizer::{auto_index_paths, optimize_where, strip_alias_expr, ProbeResult};

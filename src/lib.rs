//! A small embeddable, streaming query engine for VQL, a SQL-like
//! language for querying structured and semi-structured data sources
//! (files, processes, host APIs) through a pluggable FROM-clause
//! protocol. See `SPEC_FULL.md` for the full module map.

pub mod aggregate;
pub mod args;
pub mod ast;
pub mod cancellation;
pub mod config;
pub mod dict;
pub mod dispatch;
pub mod error;
pub mod functions;
pub mod grouper;
pub mod plugins;
pub mod scope;
pub mod select;
pub mod sorter;
pub mod stored_query;
pub mod value;

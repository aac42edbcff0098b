// File: src/lib.rs
//
// Library interface for the execution engine. Exposes the modules making
// up the value model (component A), pooling discipline (component B),
// prototype resolver (component C), call-stack machine (component D), TAC
// line evaluator (component E), intrinsic calling contract (component F),
// error taxonomy (component G), and host surface (component H) described
// in spec.md §2.

pub mod context;
pub mod errors;
pub mod host;
pub mod intrinsic;
pub mod line;
pub mod machine;
pub mod pool;
pub mod resolver;
pub mod value;

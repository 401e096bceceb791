//! Vectorized byte scanning.
//!
//! Locating delimiters, quotes, and line terminators dominates tokenizing
//! cost, so that single operation is vectorized: fixed-width lanes compare
//! the four interesting bytes against the input and condense the result
//! into bitmasks. The state machine on top stays agnostic of the lane
//! width; it only consumes positions.
//!
//! Both vector paths must agree bit-for-bit with the scalar path for every
//! input; a property test enforces this.

pub mod scanner;

pub use scanner::*;

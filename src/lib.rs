//! A small expression language for measured quantities: every number carries
//! a magnitude (possibly complex), an uncertainty, and an SI unit, and the
//! operators propagate all three.

pub mod builtins;
pub mod error;
pub mod eval;
pub mod lex;
pub mod matrix;
pub mod parse;
pub mod quantity;
pub mod render;
pub mod unit;

pub use error::RuntimeError;
pub use eval::{Interpreter, Value};
pub use lex::Lexer;
pub use matrix::{Cell, Matrix};
pub use parse::Parser;
pub use quantity::Quantity;
pub use unit::{Unit, UnitTable};

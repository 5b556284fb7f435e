pub mod assembler;
pub mod encode;
pub mod error;
pub mod expand;
pub mod expr;
pub mod isa;
pub mod item;
pub mod layout;
pub mod parser;
pub mod reg;

pub use assembler::{assemble, ListingStyle, Options, Output, SourceFile, Symbol};
pub use error::{AsmError, Loc, Warning};

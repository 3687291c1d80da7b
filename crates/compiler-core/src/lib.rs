#![doc(html_root_url = "https://docs.rs/arbor-compiler-core/")]

extern crate alloc;

mod mode;
pub mod tree;

pub use mode::Mode;

pub use ruff_source_file::{
    LineIndex, OneIndexed, PositionEncoding, SourceFile, SourceFileBuilder, SourceLocation,
};

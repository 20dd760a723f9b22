#![allow(dead_code)]

pub mod builders;
pub mod fake_directory;

pub use builders::*;
pub use fake_directory::*;

pub mod seq;
pub mod algo;
pub mod ext;
pub mod index;
pub mod amplicon;
pub mod command;

mod err;
pub use err::{Error, Result};

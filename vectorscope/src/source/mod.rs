pub mod image;
pub mod producer;
pub mod target;

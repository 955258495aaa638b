pub mod biom;
pub mod command;
pub mod file;
pub mod join;
pub mod matrix;
pub mod split;
pub mod streams;
pub mod synthetic;
pub mod system;
pub mod tsv;

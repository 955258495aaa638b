pub mod args;

use clap::Parser;
pub use args::{Arguments, JoinOrder, SampleOrder};

pub fn parse() -> Arguments {
    Arguments::parse()
}

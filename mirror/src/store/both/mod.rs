mod configured;
mod memory;
mod postgres;

pub use configured::*;
pub use memory::*;
pub use postgres::*;

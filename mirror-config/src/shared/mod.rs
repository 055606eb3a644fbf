mod base;
mod connection;
mod fanout;
mod mirror;
mod publication;
mod store;
mod sync;

pub use base::*;
pub use connection::*;
pub use fanout::*;
pub use mirror::*;
pub use publication::*;
pub use store::*;
pub use sync::*;

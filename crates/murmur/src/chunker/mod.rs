mod group;
mod stop;

pub use group::*;
pub use stop::*;

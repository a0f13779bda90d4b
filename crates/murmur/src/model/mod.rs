mod dummy;
mod interface;

pub use dummy::*;
pub use interface::*;

#[cfg(test)]
mod tests;

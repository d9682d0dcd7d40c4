mod central;
mod directory;
mod embedded;

pub use central::*;
pub use directory::*;
pub use embedded::*;

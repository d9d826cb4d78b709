mod blocks;
mod composer;
mod verifier;
mod window;

pub use blocks::*;
pub use composer::*;
pub use verifier::*;
pub use window::*;

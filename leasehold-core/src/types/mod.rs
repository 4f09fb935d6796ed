mod lease;
mod primitives;
mod session;
mod worker;

pub use lease::*;
pub use primitives::*;
pub use session::*;
pub use worker::*;

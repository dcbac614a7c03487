pub mod company;
pub mod record;

pub use company::*;
pub use record::*;

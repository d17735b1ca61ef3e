pub mod trading;
pub mod bar;

pub use trading::*;
pub use bar::*;

//! Core data types: symbols, price points, directives, status enums.

pub mod enums;
pub mod market_data;
pub mod portfolio;
pub mod symbol;

pub use enums::*;
pub use market_data::*;
pub use portfolio::*;
pub use symbol::*;

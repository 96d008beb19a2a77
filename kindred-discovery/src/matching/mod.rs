pub mod compat;
pub mod geo;
pub mod pair;

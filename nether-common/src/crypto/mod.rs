pub mod hash;
pub mod keys;

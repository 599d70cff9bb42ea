pub mod canonical;
pub mod patch;
pub mod raw;

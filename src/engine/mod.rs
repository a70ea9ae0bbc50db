mod expiry;

pub use expiry::*;

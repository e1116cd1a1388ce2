//! API route handlers.

pub mod streamlabs;

//! Domain model module declarations.

pub mod status;

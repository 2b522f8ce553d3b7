//! Core primitives shared by every engine component

pub mod time;

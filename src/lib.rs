//! Quire: a stale-while-revalidate read-through cache in front of a headless
//! blog CMS.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
pub mod source;

// Library root for the first-touchdown pool grading engine.
//
// Leaf-first: events -> matcher -> scoring -> grading -> standings -> cache,
// with the SQLite store and the grading service wiring them together.

pub mod cache;
pub mod db;
pub mod events;
pub mod grading;
pub mod matcher;
pub mod scoring;
pub mod service;
pub mod standings;

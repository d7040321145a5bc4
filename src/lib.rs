// ABOUTME: Library crate for the SSH bridge console exposing the session bridge, handoff and UI for testing

pub mod app;
pub mod bridge;
pub mod components;
pub mod config;
pub mod handoff;
pub mod terminal;

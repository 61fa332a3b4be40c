//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate store, queue, reconciler and remote calls into use-case APIs.
//! - Keep presentation layers decoupled from storage and transport details.

pub mod landmark_service;
pub mod session_service;

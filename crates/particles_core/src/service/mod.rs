//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into use-case level APIs.
//! - Keep callers (HTTP handlers, CLI) decoupled from storage details.

pub mod particle_service;

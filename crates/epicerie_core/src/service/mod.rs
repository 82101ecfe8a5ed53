//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into use-case level APIs.
//! - Enforce the cooperative's booking, cycle and proxy rules.
//! - Keep the CLI decoupled from storage details.

pub mod checkin_service;
pub mod exemption_service;
pub mod generator_service;
pub mod membership_service;
pub mod proxy_service;
pub mod shift_service;

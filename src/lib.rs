//! Medical Document Coding Pipeline
//!
//! This library provides the core functionality for the medcoder system,
//! which derives ICD-10 diagnosis codes from uploaded medical document
//! images using a remote vision-language model, with encrypted image
//! storage and a Redis-backed retrying work queue.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;

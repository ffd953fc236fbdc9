//! Boxoffice - timed-inventory ticket sales
//!
//! This library provides the cart, checkout, payment reconciliation and order
//! fulfillment pipeline, along with its database layer, payment gateway
//! integrations and HTTP handlers.

pub mod cart;
pub mod checkout;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod fulfillment;
pub mod handlers;
pub mod id;
pub mod middleware;
pub mod models;
pub mod payments;
pub mod reconcile;
